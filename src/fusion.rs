//! Weighted Reciprocal Rank Fusion.
//!
//! Each list contributes `1 / (K + rank)` per candidate. Candidates seen by
//! only one strategy family are scaled by that family's weight; candidates
//! both families agree on keep their full score. Final scores are min-max
//! normalized into `[0, 1]`.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::{
    analyzer::FusionWeights,
    backend::{Family, Metadata, RankedList, Strategy},
};

/// Score assigned to every result when all fused scores are equal.
const FLAT_SCORE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedResult {
    pub doc_id: String,
    pub text: String,
    pub metadata: Metadata,
    /// Normalized score in `[0, 1]`.
    pub score: f64,
    /// Weighted RRF sum before normalization.
    pub raw_score: f64,
    pub strategies: BTreeSet<Strategy>,
    /// Best 1-based rank across the contributing lists.
    pub best_rank: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct RrfFusion {
    k: u32,
}

impl Default for RrfFusion {
    fn default() -> Self {
        Self { k: 60 }
    }
}

impl RrfFusion {
    pub fn new(k: u32) -> Self {
        Self { k: k.max(1) }
    }

    /// Score added for a candidate at 1-based `rank`.
    pub fn contribution(&self, rank: usize) -> f64 {
        1.0 / (f64::from(self.k) + rank as f64)
    }

    /// Merge ranked lists into one ordering.
    ///
    /// The result depends only on the set of lists, not their order. A
    /// `doc_id` repeated inside one list counts once, at its best rank.
    pub fn fuse(
        &self,
        lists: &[RankedList],
        weights: FusionWeights,
    ) -> Vec<FusedResult> {
        let mut ordered: Vec<&RankedList> = lists.iter().collect();
        ordered.sort_by_key(|l| l.strategy);

        let mut by_doc: HashMap<&str, Accumulator> = HashMap::new();
        for list in ordered {
            let mut seen_in_list = HashSet::new();
            for (i, candidate) in list.candidates.iter().enumerate() {
                if !seen_in_list.insert(candidate.doc_id.as_str()) {
                    continue;
                }
                let rank = i + 1;
                let acc = by_doc
                    .entry(candidate.doc_id.as_str())
                    .or_insert_with(|| Accumulator {
                        text: &candidate.text,
                        metadata: &candidate.metadata,
                        sum: 0.0,
                        strategies: BTreeSet::new(),
                        families: HashSet::new(),
                        best_rank: rank,
                    });
                acc.sum += self.contribution(rank);
                acc.strategies.insert(list.strategy);
                acc.families.insert(list.strategy.family());
                acc.best_rank = acc.best_rank.min(rank);
            }
        }

        let mut fused: Vec<FusedResult> = by_doc
            .into_iter()
            .map(|(doc_id, acc)| {
                let raw_score = acc.sum * family_scale(&acc.families, weights);
                FusedResult {
                    doc_id: doc_id.to_string(),
                    text: acc.text.clone(),
                    metadata: acc.metadata.clone(),
                    score: raw_score,
                    raw_score,
                    strategies: acc.strategies,
                    best_rank: acc.best_rank,
                }
            })
            .collect();

        normalize_scores(&mut fused);
        sort_results(&mut fused);

        debug!(
            lists = lists.len(),
            results = fused.len(),
            vector_weight = weights.vector,
            keyword_weight = weights.keyword,
            "fused ranked lists"
        );

        fused
    }
}

struct Accumulator<'a> {
    text: &'a String,
    metadata: &'a Metadata,
    sum: f64,
    strategies: BTreeSet<Strategy>,
    families: HashSet<Family>,
    best_rank: usize,
}

fn family_scale(families: &HashSet<Family>, weights: FusionWeights) -> f64 {
    let vector = families.contains(&Family::Vector);
    let keyword = families.contains(&Family::Keyword);
    match (vector, keyword) {
        (true, false) => weights.vector,
        (false, true) => weights.keyword,
        _ => 1.0,
    }
}

/// Min-max normalize `score` in place; a flat distribution maps to 0.5.
pub(crate) fn normalize_scores(results: &mut [FusedResult]) {
    let (min, max) = results.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY),
        |(lo, hi), r| (lo.min(r.score), hi.max(r.score)),
    );
    let range = max - min;

    for r in results.iter_mut() {
        r.score = if range > f64::EPSILON {
            (r.score - min) / range
        } else {
            FLAT_SCORE
        };
    }
}

/// Score descending, then best rank, then `doc_id`.
pub(crate) fn sort_results(results: &mut [FusedResult]) {
    results.sort_by(|a, b| {
        b.raw_score
            .total_cmp(&a.raw_score)
            .then(a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
}
