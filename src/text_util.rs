/// Maximum number of characters in a snippet, excluding ellipses.
pub const DEFAULT_SNIPPET_MAX_CHARS: usize = 240;

/// Extract a window of `text` around the first query term it contains.
///
/// Terms shorter than three characters are ignored. Falls back to the start
/// of the text when no term matches. Whitespace is collapsed and the
/// window is cut on character boundaries, with `...` marking truncation.
pub fn extract_snippet(text: &str, query: &str, max_chars: usize) -> String {
    let chars: Vec<char> = collapse_whitespace(text).chars().collect();
    if chars.len() <= max_chars {
        return chars.into_iter().collect();
    }

    let lowered: Vec<char> = chars
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect();

    let hit = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .find_map(|term| {
            let needle: Vec<char> = term.to_lowercase().chars().collect();
            lowered.windows(needle.len()).position(|w| w == needle.as_slice())
        });

    let start = match hit {
        Some(pos) => pos.saturating_sub(max_chars / 3),
        None => 0,
    };
    let start = start.min(chars.len().saturating_sub(max_chars));
    let end = (start + max_chars).min(chars.len());

    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str("...");
    }
    snippet.extend(&chars[start..end]);
    if end < chars.len() {
        snippet.push_str("...");
    }
    snippet
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
