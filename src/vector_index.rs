//! Brute-force dense index over feature-hashed term vectors.
//!
//! Not a neural embedding: vectors are L2-normalized counts of word and
//! character-trigram features hashed into a fixed number of buckets. It
//! gives the CLI a working vector strategy with no model download.

use std::collections::HashMap;

use candle_core::{Device, Tensor};
use rayon::prelude::*;
use tracing::info;

use crate::{
    backend::{RetrievalCandidate, VectorSearch},
    corpus::CorpusDocument,
    error::{Error, Result},
};

pub const DEFAULT_DIMENSIONS: usize = 512;

/// Similarities at or below this are treated as "no shared features".
const MIN_SIMILARITY: f32 = 1e-4;

const TRIGRAM_WEIGHT: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// FNV-1a bucket for a feature.
    fn bucket(&self, feature: &str) -> usize {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in feature.as_bytes() {
            h ^= u64::from(*b);
            h = h.wrapping_mul(0x100000001b3);
        }
        (h % self.dimensions as u64) as usize
    }

    fn features(text: &str) -> HashMap<String, f32> {
        let mut features: HashMap<String, f32> = HashMap::new();
        let words = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() >= 2)
            .map(str::to_lowercase);

        for word in words {
            let padded: Vec<char> =
                format!("^{word}$").chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                *features.entry(format!("#{gram}")).or_default() +=
                    TRIGRAM_WEIGHT;
            }
            *features.entry(word).or_default() += 1.0;
        }
        features
    }

    /// Unit-length vector; all zeros when the text has no features.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for (feature, weight) in Self::features(text) {
            vector[self.bucket(&feature)] += weight;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

/// Cosine-similarity index. Similarity for all documents is a single
/// `[N, D] x [D, 1]` matmul.
pub struct DenseIndex {
    embedder: HashingEmbedder,
    documents: Vec<CorpusDocument>,
    matrix: Option<Tensor>,
}

impl DenseIndex {
    pub fn build(
        documents: Vec<CorpusDocument>,
        embedder: HashingEmbedder,
    ) -> Result<Self> {
        let matrix = if documents.is_empty() {
            None
        } else {
            let flat: Vec<f32> = documents
                .par_iter()
                .flat_map_iter(|d| embedder.embed(&d.text))
                .collect();
            let tensor = Tensor::from_vec(
                flat,
                (documents.len(), embedder.dimensions()),
                &Device::Cpu,
            )
            .map_err(map_candle_err)?;
            Some(tensor)
        };

        info!(
            documents = documents.len(),
            dimensions = embedder.dimensions(),
            "built dense index"
        );

        Ok(Self {
            embedder,
            documents,
            matrix,
        })
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn similarities(&self, matrix: &Tensor, text: &str) -> Result<Vec<f32>> {
        let query = Tensor::from_vec(
            self.embedder.embed(text),
            (self.embedder.dimensions(), 1),
            &Device::Cpu,
        )
        .map_err(map_candle_err)?;

        matrix
            .matmul(&query)
            .and_then(|sims| sims.squeeze(1))
            .and_then(|sims| sims.to_vec1::<f32>())
            .map_err(map_candle_err)
    }
}

impl VectorSearch for DenseIndex {
    fn search(&self, text: &str, k: usize) -> Result<Vec<RetrievalCandidate>> {
        let Some(matrix) = &self.matrix else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(usize, f32)> = self
            .similarities(matrix, text)?
            .into_iter()
            .enumerate()
            .filter(|(_, s)| *s > MIN_SIMILARITY)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(i, _)| {
                let doc = &self.documents[i];
                RetrievalCandidate::new(doc.id.clone(), doc.text.clone())
                    .with_metadata(doc.metadata.clone())
            })
            .collect())
    }
}

fn map_candle_err(e: candle_core::Error) -> Error {
    Error::Backend(format!("tensor computation error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Metadata;

    fn doc(id: &str, text: &str) -> CorpusDocument {
        CorpusDocument {
            id: id.to_string(),
            text: text.to_string(),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn empty_text_embeds_to_zero() {
        let v = HashingEmbedder::new(64).embed("");
        assert_eq!(v.len(), 64);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn embeddings_are_unit_length_and_deterministic() {
        let e = HashingEmbedder::default();
        let a = e.embed("hybrid search combines vectors and keywords");
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(a, e.embed("hybrid search combines vectors and keywords"));
    }

    #[test]
    fn closest_document_ranks_first() {
        let index = DenseIndex::build(
            vec![
                doc("cook", "a recipe for baking sourdough bread at home"),
                doc("hybrid", "hybrid search combines vector search with keyword search"),
                doc("cars", "maintenance schedule for electric cars"),
            ],
            HashingEmbedder::default(),
        )
        .unwrap();

        let results = index.search("what is hybrid search?", 3).unwrap();
        assert_eq!(results[0].doc_id, "hybrid");
        assert!(results.len() <= 3);
    }

    #[test]
    fn k_limits_results() {
        let index = DenseIndex::build(
            vec![doc("a", "search one"), doc("b", "search two"), doc("c", "search three")],
            HashingEmbedder::default(),
        )
        .unwrap();
        assert_eq!(index.search("search", 2).unwrap().len(), 2);
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = DenseIndex::build(Vec::new(), HashingEmbedder::default()).unwrap();
        assert!(index.is_empty());
        assert!(index.search("anything", 5).unwrap().is_empty());
    }
}
