//! Answering questions from search hits, with an optional fall back to the
//! language model's own knowledge.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    engine::{SearchEngine, SearchHit},
    error::{Error, Result},
    orchestrator::WorkerPool,
    query::SearchOptions,
};

/// What a language model made of a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    Answered(String),
    /// The model declined: the context (or its own knowledge) does not
    /// cover the question.
    Unanswerable,
}

pub trait AnswerGenerator: Send + Sync {
    /// Answer strictly from `context`.
    fn grounded(&self, question: &str, context: &[SearchHit])
    -> Result<AnswerOutcome>;

    /// Answer without any retrieved context.
    fn general(&self, question: &str) -> Result<AnswerOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    Grounded,
    GeneralKnowledge,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: Option<String>,
    pub source: AnswerSource,
    /// Documents the answer was grounded in. Empty unless `Grounded`.
    pub doc_ids: Vec<String>,
}

impl Answer {
    fn not_found() -> Self {
        Self {
            text: None,
            source: AnswerSource::NotFound,
            doc_ids: Vec::new(),
        }
    }
}

pub struct Assistant {
    engine: SearchEngine,
    generator: Arc<dyn AnswerGenerator>,
    pool: WorkerPool,
    context_size: usize,
    allow_general_knowledge: bool,
    timeout: Duration,
}

impl Assistant {
    pub fn new(engine: SearchEngine, generator: Arc<dyn AnswerGenerator>) -> Self {
        Self {
            engine,
            generator,
            pool: WorkerPool::new(1),
            context_size: 5,
            allow_general_knowledge: true,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn context_size(mut self, k: usize) -> Self {
        self.context_size = k.max(1);
        self
    }

    pub fn allow_general_knowledge(mut self, allow: bool) -> Self {
        self.allow_general_knowledge = allow;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Search, answer from the hits, and fall back to general knowledge
    /// when nothing relevant was found or the grounded answer declined.
    pub async fn ask(&self, question: &str) -> Result<Answer> {
        let hits = self
            .engine
            .search(question, self.context_size, SearchOptions::default())
            .await?;

        if hits.is_empty() {
            debug!("no context found");
        } else {
            let doc_ids: Vec<String> =
                hits.iter().map(|h| h.doc_id.clone()).collect();
            let generator = Arc::clone(&self.generator);
            let owned = question.to_string();
            let grounded = self
                .pool
                .run(self.timeout, move || generator.grounded(&owned, &hits))
                .await;

            match grounded {
                Ok(AnswerOutcome::Answered(text)) => {
                    return Ok(Answer {
                        text: Some(text),
                        source: AnswerSource::Grounded,
                        doc_ids,
                    });
                }
                Ok(AnswerOutcome::Unanswerable) => {
                    debug!("context did not answer the question");
                }
                Err(e) => {
                    warn!(error = %e, "grounded answer failed");
                }
            }
        }

        if !self.allow_general_knowledge {
            return Ok(Answer::not_found());
        }

        let generator = Arc::clone(&self.generator);
        let owned = question.to_string();
        let general = self
            .pool
            .run(self.timeout, move || generator.general(&owned))
            .await
            .map_err(|e| Error::Backend(format!("general answer failed: {e}")))?;

        Ok(match general {
            AnswerOutcome::Answered(text) => Answer {
                text: Some(text),
                source: AnswerSource::GeneralKnowledge,
                doc_ids: Vec::new(),
            },
            AnswerOutcome::Unanswerable => Answer::not_found(),
        })
    }
}
