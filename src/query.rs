use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A validated search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    text: String,
    k: usize,
    timeout: Option<Duration>,
}

impl Query {
    /// Build a query, rejecting text with nothing searchable in it and a
    /// zero result count.
    pub fn new(text: impl Into<String>, k: usize) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(Error::InvalidQuery("query text is empty".into()));
        }
        if normalize(&text).is_empty() {
            return Err(Error::InvalidQuery(
                "query text has no letters or digits".into(),
            ));
        }
        if k == 0 {
            return Err(Error::InvalidQuery(
                "result count must be at least 1".into(),
            ));
        }
        Ok(Self {
            text,
            k,
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Case, whitespace and punctuation insensitive form of the text.
    pub fn normalized(&self) -> String {
        normalize(&self.text)
    }
}

/// Per-call knobs for [`crate::SearchEngine::search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub use_reranker: bool,
    /// Overall deadline for this call; the engine default applies if unset.
    pub timeout_ms: Option<u64>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            use_reranker: true,
            timeout_ms: None,
        }
    }
}

/// Lowercase, replace punctuation with spaces and collapse whitespace.
pub fn normalize(text: &str) -> String {
    let lowered: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .flat_map(char::to_lowercase)
        .collect();

    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}
