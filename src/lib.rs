//! kbfuse - hybrid retrieval over a personal knowledge base.
//!
//! A query is analyzed for exact-match features (quoted phrases, ticket-style
//! identifiers, dates, numbers), expanded into a few reformulations, and
//! fanned out to vector, keyword, expansion and hypothetical-answer
//! strategies in parallel under a deadline. The ranked lists are combined
//! with weighted reciprocal rank fusion, optionally reranked by a
//! cross-encoder, and cached.
//!
//! Backends plug in through the traits in [`backend`]. The crate ships a
//! [Tantivy](https://github.com/quickwit-oss/tantivy) BM25 index and a
//! feature-hashing dense index so the CLI works out of the box.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use kbfuse::{SearchEngine, SearchOptions};
//! use kbfuse::corpus::CorpusDocument;
//! use kbfuse::tantivy_index::KeywordIndex;
//! use kbfuse::vector_index::{DenseIndex, HashingEmbedder};
//!
//! # async fn run(docs: Vec<CorpusDocument>) -> kbfuse::Result<()> {
//! let keyword = KeywordIndex::build(&docs)?;
//! let vector = DenseIndex::build(docs, HashingEmbedder::default())?;
//!
//! let engine = SearchEngine::builder()
//!     .keyword(Arc::new(keyword))
//!     .vector(Arc::new(vector))
//!     .build()?;
//!
//! for hit in engine.search("what is hybrid search?", 5, SearchOptions::default()).await? {
//!     println!("{} (score: {:.3})", hit.doc_id, hit.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod answer;
pub mod backend;
pub mod cache;
pub mod cache_store;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod data_dir;
pub mod engine;
pub mod error;
pub mod expander;
pub mod fusion;
pub mod mcp;
pub mod orchestrator;
pub mod query;
pub mod reranker;
pub mod search;
pub mod tantivy_index;
pub mod text_util;
pub mod vector_index;

pub use answer::{Answer, AnswerGenerator, AnswerOutcome, AnswerSource, Assistant};
pub use backend::{
    CrossEncoder,
    HypotheticalAnswerGenerator,
    KeywordSearch,
    RetrievalCandidate,
    Strategy,
    VectorSearch,
};
pub use cache::CacheService;
pub use cache_store::CacheStore;
pub use config::EngineConfig;
pub use data_dir::DataDir;
pub use engine::{QueryPlan, SearchEngine, SearchHit, SearchReport};
pub use error::{Error, Result};
pub use fusion::{FusedResult, RrfFusion};
pub use query::{Query, SearchOptions};
