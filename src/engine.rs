//! The search pipeline: analyze, expand, fan out, fuse, rerank, cache.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{task::JoinSet, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    analyzer::{self, FusionWeights, QueryCharacteristics},
    backend::{
        CrossEncoder, HypotheticalAnswerGenerator, KeywordSearch, Metadata,
        Strategy, VectorSearch,
    },
    cache::{CacheService, CachedSearch, result_key},
    cache_store::CacheStore,
    config::EngineConfig,
    error::{Error, Result},
    expander,
    fusion::{FusedResult, RrfFusion},
    orchestrator::{Backends, StrategyOrchestrator, WorkerPool},
    query::{Query, SearchOptions},
    reranker::Reranker,
};

/// One ranked document returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub score: f64,
}

impl From<FusedResult> for SearchHit {
    fn from(r: FusedResult) -> Self {
        Self {
            doc_id: r.doc_id,
            text: r.text,
            metadata: r.metadata,
            score: r.score,
        }
    }
}

/// Hits plus how they were produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchReport {
    pub hits: Vec<SearchHit>,
    pub launched: usize,
    /// Zero means no strategy returned in time, as opposed to strategies
    /// that returned nothing.
    pub completed: usize,
    pub contributing: Vec<Strategy>,
    pub cached: bool,
    pub reranked: bool,
}

/// What a search for a query would do, without running it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPlan {
    pub query: String,
    pub normalized: String,
    pub characteristics: QueryCharacteristics,
    pub weights: FusionWeights,
    pub expansions: Vec<String>,
    pub strategies: Vec<Strategy>,
    pub rerank_available: bool,
}

#[derive(Default)]
pub struct SearchEngineBuilder {
    config: EngineConfig,
    vector: Option<Arc<dyn VectorSearch>>,
    keyword: Option<Arc<dyn KeywordSearch>>,
    hypothetical: Option<Arc<dyn HypotheticalAnswerGenerator>>,
    cross_encoder: Option<Arc<dyn CrossEncoder>>,
    caches: Option<Arc<CacheService>>,
}

impl SearchEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn vector(mut self, backend: Arc<dyn VectorSearch>) -> Self {
        self.vector = Some(backend);
        self
    }

    pub fn keyword(mut self, backend: Arc<dyn KeywordSearch>) -> Self {
        self.keyword = Some(backend);
        self
    }

    pub fn hypothetical(
        mut self,
        generator: Arc<dyn HypotheticalAnswerGenerator>,
    ) -> Self {
        self.hypothetical = Some(generator);
        self
    }

    pub fn cross_encoder(mut self, encoder: Arc<dyn CrossEncoder>) -> Self {
        self.cross_encoder = Some(encoder);
        self
    }

    /// Share caches with another engine, or pre-warm them. A fresh
    /// [`CacheService`] sized from the config is used otherwise.
    pub fn caches(mut self, caches: Arc<CacheService>) -> Self {
        self.caches = Some(caches);
        self
    }

    pub fn build(self) -> Result<SearchEngine> {
        self.config.validate()?;
        let vector = self.vector.ok_or_else(|| {
            Error::Config("a vector search backend is required".into())
        })?;
        let keyword = self.keyword.ok_or_else(|| {
            Error::Config("a keyword search backend is required".into())
        })?;

        let caches = self
            .caches
            .unwrap_or_else(|| Arc::new(CacheService::from_config(&self.config)));
        let orchestrator = StrategyOrchestrator::new(
            Backends {
                vector,
                keyword,
                hypothetical: self.hypothetical,
            },
            Arc::clone(&caches),
            &self.config,
        );
        let reranker = self.cross_encoder.map(|encoder| {
            Reranker::new(
                encoder,
                Arc::clone(&caches),
                WorkerPool::new(self.config.max_workers),
                self.config.rerank_timeout(),
            )
        });

        info!(
            workers = self.config.max_workers,
            reranker = reranker.is_some(),
            "search engine ready"
        );

        Ok(SearchEngine {
            inner: Arc::new(Inner {
                fusion: RrfFusion::new(self.config.rrf_k),
                config: self.config,
                orchestrator,
                reranker,
                caches,
            }),
        })
    }
}

struct Inner {
    config: EngineConfig,
    fusion: RrfFusion,
    orchestrator: StrategyOrchestrator,
    reranker: Option<Reranker>,
    caches: Arc<CacheService>,
}

/// Cheap to clone; clones share backends, workers and caches.
#[derive(Clone)]
pub struct SearchEngine {
    inner: Arc<Inner>,
}

impl SearchEngine {
    pub fn builder() -> SearchEngineBuilder {
        SearchEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn caches(&self) -> &CacheService {
        &self.inner.caches
    }

    pub fn has_reranker(&self) -> bool {
        self.inner.reranker.is_some()
    }

    /// Ranked hits for `text`. Empty when nothing was found or nothing
    /// completed in time; an error only for invalid input.
    pub async fn search(
        &self,
        text: &str,
        k: usize,
        options: SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        Ok(self.search_detailed(text, k, options).await?.hits)
    }

    pub async fn search_detailed(
        &self,
        text: &str,
        k: usize,
        options: SearchOptions,
    ) -> Result<SearchReport> {
        let mut query = Query::new(text, k)?;
        if let Some(ms) = options.timeout_ms {
            if ms == 0 {
                return Err(Error::InvalidQuery(
                    "timeout must be positive".into(),
                ));
            }
            query = query.with_timeout(Duration::from_millis(ms));
        }
        self.run(&query, options.use_reranker).await
    }

    /// Run several searches concurrently. Results are in input order.
    pub async fn search_batch(
        &self,
        queries: &[String],
        k: usize,
        options: SearchOptions,
    ) -> Vec<Result<Vec<SearchHit>>> {
        let mut tasks = JoinSet::new();
        for (i, text) in queries.iter().enumerate() {
            let engine = self.clone();
            let text = text.clone();
            tasks.spawn(async move { (i, engine.search(&text, k, options).await) });
        }

        let mut results: Vec<Option<Result<Vec<SearchHit>>>> =
            queries.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((i, result)) => results[i] = Some(result),
                Err(e) => warn!(error = %e, "batch search task failed"),
            }
        }

        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| {
                    Err(Error::Backend("search task did not finish".into()))
                })
            })
            .collect()
    }

    pub fn explain(&self, text: &str) -> Result<QueryPlan> {
        let query = Query::new(text, 1)?;
        let characteristics = analyzer::analyze(query.text());
        let expansions = expander::expand(query.text());
        let strategies =
            self.inner.orchestrator.planned_strategies(expansions.len());

        Ok(QueryPlan {
            query: query.text().to_string(),
            normalized: query.normalized(),
            weights: characteristics.weights(),
            characteristics,
            expansions,
            strategies,
            rerank_available: self.has_reranker(),
        })
    }

    /// Warm the caches from `store`. Never fails; bad rows are skipped.
    pub fn load_cache(&self, store: &CacheStore) -> usize {
        self.inner.caches.load_from(store)
    }

    pub fn persist_cache(&self, store: &CacheStore) -> Result<()> {
        self.inner.caches.persist_to(store)
    }

    async fn run(&self, query: &Query, use_reranker: bool) -> Result<SearchReport> {
        let inner = &self.inner;
        let normalized = query.normalized();
        let characteristics = analyzer::analyze(query.text());
        let weights = characteristics.weights();
        let expansions = expander::expand(query.text());
        let strategies = inner.orchestrator.planned_strategies(expansions.len());
        let rerank = use_reranker && inner.reranker.is_some();

        let key = result_key(
            &normalized,
            query.k(),
            &strategy_set(inner.config.strategy_set_version, &strategies),
            weights,
            rerank,
        );

        if let Some(cached) = inner.caches.results().get(&key) {
            debug!(query = %normalized, "result cache hit");
            return Ok(SearchReport {
                completed: cached.contributing.len(),
                launched: cached.launched,
                contributing: cached.contributing,
                hits: cached.hits,
                cached: true,
                reranked: cached.reranked,
            });
        }

        debug!(
            query = %normalized,
            query_type = %characteristics.query_type,
            vector_weight = weights.vector,
            keyword_weight = weights.keyword,
            expansions = expansions.len(),
            "searching"
        );

        let timeout = query.timeout().unwrap_or(inner.config.overall_timeout());
        let deadline = Instant::now() + timeout;

        let retrieval =
            inner.orchestrator.retrieve(query, &expansions, deadline).await;
        let mut fused = inner.fusion.fuse(&retrieval.lists, weights);

        let mut reranked = false;
        let mut rerank_failed = false;
        if rerank && let Some(reranker) = &inner.reranker {
            let top_n = query.k().saturating_mul(inner.config.rerank_factor);
            let head_len = top_n.min(fused.len());
            let pass = tokio::time::timeout_at(
                deadline,
                reranker.rerank(query.text(), &normalized, fused.clone(), top_n),
            )
            .await;
            match pass {
                Ok(outcome) => {
                    reranked = outcome.applied;
                    rerank_failed = !outcome.applied && head_len >= 2;
                    fused = outcome.results;
                }
                Err(_) => {
                    warn!("overall deadline reached before reranking finished");
                    rerank_failed = head_len >= 2;
                }
            }
        }

        fused.truncate(query.k());
        let hits: Vec<SearchHit> = fused.into_iter().map(SearchHit::from).collect();
        let contributing = retrieval.contributing();

        if retrieval.is_degraded() || rerank_failed {
            debug!(
                launched = retrieval.launched,
                completed = retrieval.completed,
                rerank_failed,
                "degraded result not cached"
            );
        } else {
            inner.caches.results().insert(
                key,
                CachedSearch {
                    hits: hits.clone(),
                    launched: retrieval.launched,
                    contributing: contributing.clone(),
                    reranked,
                },
            );
        }

        Ok(SearchReport {
            hits,
            launched: retrieval.launched,
            completed: retrieval.completed,
            contributing,
            cached: false,
            reranked,
        })
    }
}

/// Identifies the strategy mix for cache keys.
fn strategy_set(version: u32, strategies: &[Strategy]) -> String {
    let names: Vec<String> = strategies.iter().map(Strategy::to_string).collect();
    format!("v{version};{}", names.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RetrievalCandidate;

    struct Empty;

    impl VectorSearch for Empty {
        fn search(&self, _text: &str, _k: usize) -> Result<Vec<RetrievalCandidate>> {
            Ok(Vec::new())
        }
    }

    impl KeywordSearch for Empty {
        fn search(&self, _text: &str, _k: usize) -> Result<Vec<RetrievalCandidate>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn build_requires_vector_and_keyword() {
        let err = SearchEngine::builder()
            .keyword(Arc::new(Empty))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));

        let err = SearchEngine::builder()
            .vector(Arc::new(Empty))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let err = SearchEngine::builder()
            .config(EngineConfig {
                cache_capacity: 0,
                ..EngineConfig::default()
            })
            .vector(Arc::new(Empty))
            .keyword(Arc::new(Empty))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn explain_describes_the_plan() {
        let engine = SearchEngine::builder()
            .vector(Arc::new(Empty))
            .keyword(Arc::new(Empty))
            .build()
            .unwrap();

        let plan = engine.explain("What is hybrid search?").unwrap();
        assert_eq!(plan.normalized, "what is hybrid search");
        assert_eq!(plan.characteristics.query_type, analyzer::QueryType::Semantic);
        assert_eq!(
            plan.strategies,
            vec![
                Strategy::Vector,
                Strategy::Keyword,
                Strategy::Expansion(0),
                Strategy::Expansion(1)
            ]
        );
        assert!(!plan.rerank_available);
        assert!(engine.explain("  ").is_err());
    }

    #[tokio::test]
    async fn zero_timeout_is_rejected() {
        let engine = SearchEngine::builder()
            .vector(Arc::new(Empty))
            .keyword(Arc::new(Empty))
            .build()
            .unwrap();
        let err = engine
            .search(
                "rust",
                3,
                SearchOptions {
                    use_reranker: false,
                    timeout_ms: Some(0),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[test]
    fn strategy_set_names_every_strategy() {
        assert_eq!(
            strategy_set(2, &[Strategy::Vector, Strategy::Expansion(0)]),
            "v2;vector,expansion:0"
        );
    }
}
