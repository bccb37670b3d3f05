use std::{collections::HashMap, sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::{
    backend::CrossEncoder,
    cache::{CacheService, rerank_key},
    fusion::FusedResult,
    orchestrator::WorkerPool,
};

/// Outcome of a rerank pass.
#[derive(Debug, Clone)]
pub struct Reranked {
    pub results: Vec<FusedResult>,
    /// `false` when the input came back unchanged.
    pub applied: bool,
}

impl Reranked {
    fn unchanged(results: Vec<FusedResult>) -> Self {
        Self {
            results,
            applied: false,
        }
    }
}

/// Reorders the head of a fused list with a cross-encoder.
///
/// Any failure (error, timeout, wrong number of scores, non-finite scores)
/// leaves the input order untouched.
pub struct Reranker {
    encoder: Arc<dyn CrossEncoder>,
    caches: Arc<CacheService>,
    pool: WorkerPool,
    timeout: Duration,
}

impl Reranker {
    pub fn new(
        encoder: Arc<dyn CrossEncoder>,
        caches: Arc<CacheService>,
        pool: WorkerPool,
        timeout: Duration,
    ) -> Self {
        Self {
            encoder,
            caches,
            pool,
            timeout,
        }
    }

    /// Rerank the first `top_n` candidates; the tail keeps its fused order
    /// and scores. Head scores become cross-encoder scores min-max
    /// normalized into `[floor, 1]`, where `floor` is the best tail score
    /// (0 without a tail), so scores never rise down the list.
    pub async fn rerank(
        &self,
        query: &str,
        normalized_query: &str,
        mut candidates: Vec<FusedResult>,
        top_n: usize,
    ) -> Reranked {
        let head_len = top_n.min(candidates.len());
        if head_len < 2 {
            return Reranked::unchanged(candidates);
        }

        let tail = candidates.split_off(head_len);
        let head = candidates;
        let head_ids: Vec<&str> =
            head.iter().map(|r| r.doc_id.as_str()).collect();
        let key = rerank_key(normalized_query, &head_ids);

        if let Some(ordering) = self.caches.rerank().get(&key)
            && let Some(reordered) = apply_ordering(&head, &ordering)
        {
            debug!(head = head_len, "rerank ordering served from cache");
            return Reranked {
                results: join(above_tail(reordered, &tail), tail),
                applied: true,
            };
        }

        let pairs: Vec<(String, String)> = head
            .iter()
            .map(|r| (query.to_string(), r.text.clone()))
            .collect();
        let encoder = Arc::clone(&self.encoder);
        let owned_query = query.to_string();
        let scored = self
            .pool
            .run(self.timeout, move || encoder.score(&owned_query, &pairs))
            .await;

        let scores = match scored {
            Ok(scores) if scores.len() != head_len => {
                warn!(
                    expected = head_len,
                    got = scores.len(),
                    "cross-encoder returned wrong number of scores"
                );
                return Reranked::unchanged(join(head, tail));
            }
            Ok(scores) if scores.iter().any(|s| !s.is_finite()) => {
                warn!("cross-encoder returned non-finite scores");
                return Reranked::unchanged(join(head, tail));
            }
            Ok(scores) => scores,
            Err(e) => {
                warn!(error = %e, "reranking skipped");
                return Reranked::unchanged(join(head, tail));
            }
        };

        let ordering = order_by_scores(&head, &scores);
        self.caches.rerank().insert(key, ordering.clone());

        let reordered = apply_ordering(&head, &ordering)
            .unwrap_or_else(|| head.clone());
        debug!(head = head_len, "reranked candidates");

        Reranked {
            results: join(above_tail(reordered, &tail), tail),
            applied: true,
        }
    }
}

/// `(doc_id, normalized score)` sorted by score, ties keep fused order.
fn order_by_scores(head: &[FusedResult], scores: &[f64]) -> Vec<(String, f64)> {
    let (min, max) = scores
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &s| {
            (lo.min(s), hi.max(s))
        });
    let range = max - min;

    let mut indexed: Vec<(usize, f64)> =
        scores.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    indexed
        .into_iter()
        .map(|(i, s)| {
            let normalized = if range > f64::EPSILON {
                (s - min) / range
            } else {
                0.5
            };
            (head[i].doc_id.clone(), normalized)
        })
        .collect()
}

/// Reorder `head` to match `ordering`. `None` if the two disagree on the
/// set of documents.
fn apply_ordering(
    head: &[FusedResult],
    ordering: &[(String, f64)],
) -> Option<Vec<FusedResult>> {
    if ordering.len() != head.len() {
        return None;
    }
    let by_id: HashMap<&str, &FusedResult> =
        head.iter().map(|r| (r.doc_id.as_str(), r)).collect();

    ordering
        .iter()
        .map(|(id, score)| {
            by_id.get(id.as_str()).map(|r| FusedResult {
                score: *score,
                ..(*r).clone()
            })
        })
        .collect()
}

/// Map head scores from `[0, 1]` onto `[floor, 1]`, `floor` being the
/// first tail score.
fn above_tail(mut head: Vec<FusedResult>, tail: &[FusedResult]) -> Vec<FusedResult> {
    let floor = tail.first().map_or(0.0, |r| r.score.clamp(0.0, 1.0));
    for r in &mut head {
        r.score = (floor + r.score * (1.0 - floor)).min(1.0);
    }
    head
}

fn join(mut head: Vec<FusedResult>, tail: Vec<FusedResult>) -> Vec<FusedResult> {
    head.extend(tail);
    head
}
