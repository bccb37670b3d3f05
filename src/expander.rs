//! Query expansion: a bounded, deterministic set of rewrites of the user's
//! question that run as extra vector searches.

use crate::query::normalize;

pub const MAX_EXPANSIONS: usize = 5;

/// Rewrites keyed on the leading question phrase. `{}` is the subject.
/// Longer prefixes come first so `how does` wins over `how`.
const TEMPLATES: &[(&str, &[&str])] = &[
    ("what is", &["{} is", "{} refers to", "definition of {}"]),
    ("what are", &["{} are", "{} include", "types of {}"]),
    ("how does", &["{} works", "{} mechanism", "working of {}"]),
    ("how do", &["{} works", "{} process", "steps to {}"]),
    ("how should", &["{} should", "best practices {}", "{} guidelines"]),
    ("how can", &["{} can", "ways to {}", "{} approach"]),
    ("which", &["{} options", "available {}", "list of {}"]),
    ("why", &["reason for {}", "purpose of {}", "{} benefits"]),
];

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "can", "could", "did",
    "do", "does", "for", "give", "had", "has", "have", "how", "in", "is",
    "list", "may", "might", "must", "my", "need", "of", "on", "or", "shall",
    "should", "show", "tell", "the", "to", "was", "were", "what", "when",
    "where", "which", "who", "why", "will", "would",
];

const SYNONYMS: &[(&str, &str)] = &[
    ("adoption", "implementation"),
    ("ai", "artificial intelligence"),
    ("benefits", "advantages"),
    ("cost", "price"),
    ("critical", "important"),
    ("database", "datastore"),
    ("enable", "allow"),
    ("enables", "allows"),
    ("enterprise", "business"),
    ("error", "failure"),
    ("goal", "objective"),
    ("help", "assist"),
    ("helps", "assists"),
    ("important", "critical"),
    ("improve", "enhance"),
    ("objective", "goal"),
    ("payment", "amount"),
    ("phase", "stage"),
    ("search", "retrieval"),
    ("security", "protection"),
    ("tool", "technology"),
    ("tools", "technologies"),
];

/// Produce up to [`MAX_EXPANSIONS`] variants of `text`.
///
/// Variants come in a fixed order (template rewrites, then the core
/// statement, then synonym substitutions), are unique ignoring case and
/// punctuation, and never repeat the original query.
pub fn expand(text: &str) -> Vec<String> {
    let words = tokenize(text);
    if words.is_empty() {
        return Vec::new();
    }

    let mut candidates = template_rewrites(&words);
    candidates.extend(core_statement(&words));
    candidates.extend(synonym_variants(&words));

    let mut seen = vec![normalize(text)];
    let mut out = Vec::new();
    for candidate in candidates {
        let key = normalize(&candidate);
        if key.is_empty() || seen.contains(&key) {
            continue;
        }
        seen.push(key);
        out.push(candidate);
        if out.len() == MAX_EXPANSIONS {
            break;
        }
    }
    out
}

fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '-')
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

fn template_rewrites(words: &[String]) -> Vec<String> {
    for (prefix, templates) in TEMPLATES {
        let prefix_words: Vec<&str> = prefix.split(' ').collect();
        let matches = words.len() > prefix_words.len()
            && words.iter().zip(&prefix_words).all(|(w, p)| w == p);
        if !matches {
            continue;
        }

        let subject = words[prefix_words.len()..].join(" ");
        return templates.iter().map(|t| t.replace("{}", &subject)).collect();
    }
    Vec::new()
}

fn core_statement(words: &[String]) -> Option<String> {
    let core: Vec<&str> = words
        .iter()
        .map(String::as_str)
        .filter(|w| !STOP_WORDS.contains(w))
        .collect();
    (!core.is_empty()).then(|| core.join(" "))
}

fn synonym_variants(words: &[String]) -> Vec<String> {
    let mut variants = Vec::new();
    for (i, word) in words.iter().enumerate() {
        let Some((_, synonym)) = SYNONYMS.iter().find(|(w, _)| w == word)
        else {
            continue;
        };
        let mut replaced = words.to_vec();
        replaced[i] = (*synonym).to_string();
        variants.push(replaced.join(" "));
    }
    variants
}
