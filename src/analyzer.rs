//! Structural query analysis and the fusion-weight hint derived from it.
//!
//! Literal tokens (quoted phrases, identifiers) push weight towards keyword
//! retrieval; dates and numbers ask for a balanced mix; everything else is
//! treated as a semantic question.

use std::{fmt, ops::Range, sync::LazyLock};

use regex::Regex;
use serde::Serialize;

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)"|“([^”]+)”"#).unwrap());

static ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // UUID
        r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b",
        // Ticket keys: ABC-123
        r"\b[A-Z][A-Z0-9]+-\d+\b",
        // Uppercase alphanumeric runs
        r"\b[A-Z0-9]{6,}\b",
        // Hash IDs: #12345
        r"#\w*\d\w*",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static DATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b\d{4}-\d{1,2}-\d{1,2}\b",
        r"\b\d{1,2}/\d{1,2}/\d{2,4}\b",
        r"(?i)\b(?:jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?(?:\s+\d{1,2}(?:st|nd|rd|th)?,?)?\s+\d{4}\b",
        r"(?i)\b(?:today|yesterday|tomorrow|(?:last|this|next)\s+(?:week|month|quarter|year))\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static NUMBER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\$\d[\d,]*(?:\.\d+)?",
        r"\b\d+(?:\.\d+)?%",
        r"\b\d+(?:\.\d+)?\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Exact,
    Hybrid,
    Semantic,
}

impl QueryType {
    /// Base `(vector, keyword)` split before any per-signal adjustment.
    fn base_weights(self) -> (f64, f64) {
        match self {
            QueryType::Exact => (0.2, 0.8),
            QueryType::Hybrid => (0.5, 0.5),
            QueryType::Semantic => (0.8, 0.2),
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryType::Exact => "exact",
            QueryType::Hybrid => "hybrid",
            QueryType::Semantic => "semantic",
        };
        f.write_str(name)
    }
}

/// Relative trust in the vector and keyword strategy families.
/// Always sums to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FusionWeights {
    pub vector: f64,
    pub keyword: f64,
}

impl FusionWeights {
    /// Build weights from raw multipliers, renormalizing to sum 1.0.
    pub fn normalized(vector: f64, keyword: f64) -> Self {
        let total = vector + keyword;
        if total > 0.0 && total.is_finite() {
            Self {
                vector: vector / total,
                keyword: keyword / total,
            }
        } else {
            Self::balanced()
        }
    }

    pub fn balanced() -> Self {
        Self {
            vector: 0.5,
            keyword: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryCharacteristics {
    pub has_quoted_phrases: bool,
    pub has_ids: bool,
    pub has_dates: bool,
    pub has_numbers: bool,
    pub quoted_phrases: Vec<String>,
    pub ids: Vec<String>,
    pub dates: Vec<String>,
    pub numbers: Vec<String>,
    pub query_type: QueryType,
}

impl QueryCharacteristics {
    /// Vector/keyword split for this query.
    pub fn weights(&self) -> FusionWeights {
        let (mut vector, mut keyword) = self.query_type.base_weights();

        if self.has_quoted_phrases {
            keyword *= 2.0;
            vector *= 0.5;
        }
        if self.has_ids {
            keyword *= 1.5;
            vector *= 0.7;
        }

        FusionWeights::normalized(vector, keyword)
    }

    /// One line describing what was detected.
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("type={}", self.query_type)];
        if self.has_quoted_phrases {
            parts.push(format!("quoted={:?}", self.quoted_phrases));
        }
        if self.has_ids {
            parts.push(format!("ids={:?}", self.ids));
        }
        if self.has_dates {
            parts.push(format!("dates={:?}", self.dates));
        }
        if self.has_numbers {
            parts.push(format!("numbers={:?}", self.numbers));
        }
        parts.join(" ")
    }
}

/// Classify a raw query. Pure and infallible; empty input is `Semantic`.
pub fn analyze(text: &str) -> QueryCharacteristics {
    let quoted_phrases: Vec<String> = QUOTED
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().trim().to_string())
        .filter(|phrase| !phrase.is_empty())
        .collect();

    let ids = collect_matches(&ID_PATTERNS, text);
    let dates = collect_matches(&DATE_PATTERNS, text);
    let numbers = collect_matches(&NUMBER_PATTERNS, text);

    let has_quoted_phrases = !quoted_phrases.is_empty();
    let has_ids = !ids.is_empty();
    let has_dates = !dates.is_empty();
    let has_numbers = !numbers.is_empty();

    let query_type = if has_quoted_phrases || has_ids {
        QueryType::Exact
    } else if has_dates || has_numbers {
        QueryType::Hybrid
    } else {
        QueryType::Semantic
    };

    QueryCharacteristics {
        has_quoted_phrases,
        has_ids,
        has_dates,
        has_numbers,
        quoted_phrases,
        ids,
        dates,
        numbers,
        query_type,
    }
}

/// Run each pattern in order, keeping matches that do not overlap an
/// earlier one.
fn collect_matches(patterns: &[Regex], text: &str) -> Vec<String> {
    let mut spans: Vec<Range<usize>> = Vec::new();
    let mut found = Vec::new();

    for pattern in patterns {
        for m in pattern.find_iter(text) {
            let overlaps = spans
                .iter()
                .any(|s| m.start() < s.end && s.start < m.end());
            if !overlaps {
                spans.push(m.range());
                found.push(m.as_str().to_string());
            }
        }
    }

    found
}
