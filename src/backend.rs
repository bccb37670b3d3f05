//! Collaborator boundary: the retrieval backends the engine fans out to and
//! the candidate types they return.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Which retrieval strategy produced a ranked list.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(into = "String", try_from = "String")]
pub enum Strategy {
    Vector,
    Keyword,
    /// Vector search on the n-th expanded query (0-based).
    Expansion(usize),
    /// Vector search on a generated hypothetical answer.
    Hypothetical,
}

/// Fusion weights apply per family, not per strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Vector,
    Keyword,
}

impl Strategy {
    pub fn family(self) -> Family {
        match self {
            Strategy::Keyword => Family::Keyword,
            Strategy::Vector
            | Strategy::Expansion(_)
            | Strategy::Hypothetical => Family::Vector,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Vector => f.write_str("vector"),
            Strategy::Keyword => f.write_str("keyword"),
            Strategy::Expansion(n) => write!(f, "expansion:{n}"),
            Strategy::Hypothetical => f.write_str("hypothetical"),
        }
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "vector" => Ok(Strategy::Vector),
            "keyword" => Ok(Strategy::Keyword),
            "hypothetical" => Ok(Strategy::Hypothetical),
            other => other
                .strip_prefix("expansion:")
                .and_then(|n| n.parse().ok())
                .map(Strategy::Expansion)
                .ok_or_else(|| Error::NotFound {
                    kind: "strategy",
                    name: other.to_string(),
                }),
        }
    }
}

impl From<Strategy> for String {
    fn from(strategy: Strategy) -> Self {
        strategy.to_string()
    }
}

impl TryFrom<String> for Strategy {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// One document as returned by a retrieval backend.
///
/// `doc_id` is the only identity used when merging lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub doc_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub source_strategy: Strategy,
    /// 1-based position within the producing strategy's list.
    pub strategy_rank: usize,
}

impl RetrievalCandidate {
    /// A candidate with empty metadata. Strategy and rank are stamped by
    /// [`RankedList::new`].
    pub fn new(doc_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            text: text.into(),
            metadata: Metadata::new(),
            source_strategy: Strategy::Vector,
            strategy_rank: 0,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Output of one completed strategy, best match first.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedList {
    pub strategy: Strategy,
    pub candidates: Vec<RetrievalCandidate>,
}

impl RankedList {
    /// Tag backend output with the strategy that produced it and its
    /// 1-based ranks.
    pub fn new(strategy: Strategy, candidates: Vec<RetrievalCandidate>) -> Self {
        let candidates = candidates
            .into_iter()
            .enumerate()
            .map(|(i, mut c)| {
                c.source_strategy = strategy;
                c.strategy_rank = i + 1;
                c
            })
            .collect();
        Self {
            strategy,
            candidates,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Dense nearest-neighbour lookup.
pub trait VectorSearch: Send + Sync {
    fn search(&self, text: &str, k: usize) -> Result<Vec<RetrievalCandidate>>;
}

/// Inverted-index (BM25-style) lookup.
pub trait KeywordSearch: Send + Sync {
    fn search(&self, text: &str, k: usize) -> Result<Vec<RetrievalCandidate>>;
}

/// Produces a plausible answer whose text is then used as a vector query.
pub trait HypotheticalAnswerGenerator: Send + Sync {
    fn generate(&self, query: &str) -> Result<String>;
}

/// Scores `(query, document)` pairs jointly. Must return one score per pair.
pub trait CrossEncoder: Send + Sync {
    fn score(&self, query: &str, pairs: &[(String, String)]) -> Result<Vec<f64>>;
}
