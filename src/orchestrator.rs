//! Concurrent fan-out of retrieval strategies.
//!
//! Backends are synchronous, so every call runs on the blocking pool behind
//! a semaphore owned by that backend. A call that misses its own budget, or
//! is still running when the overall deadline passes, is abandoned: the
//! thread runs to completion but its result is dropped. An abandoned call
//! keeps its backend's worker until it returns, so a hung backend can only
//! exhaust its own workers.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use tokio::{
    sync::Semaphore,
    task::{JoinError, JoinSet},
    time::Instant,
};
use tracing::{debug, warn};

use crate::{
    backend::{
        HypotheticalAnswerGenerator, KeywordSearch, RankedList,
        RetrievalCandidate, Strategy, VectorSearch,
    },
    cache::{CacheService, hypothetical_key},
    config::EngineConfig,
    error::{Error, Result},
    query::Query,
};

/// Bound on concurrent calls into one backend.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    /// Workers not held by a running or abandoned call.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `f` on a blocking thread once a worker is free.
    ///
    /// `budget` covers both the wait for a worker and the call itself. The
    /// worker stays occupied until `f` returns, even after a timeout.
    pub async fn run<T, F>(&self, budget: Duration, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let call = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| Error::Backend("worker pool closed".into()))?;
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                f()
            })
            .await
            .map_err(|e| Error::Backend(format!("backend call panicked: {e}")))?
        };

        tokio::time::timeout(budget, call).await.map_err(|_| {
            Error::Backend(format!("timed out after {}ms", budget.as_millis()))
        })?
    }
}

/// The retrieval collaborators the engine fans out to.
#[derive(Clone)]
pub struct Backends {
    pub vector: Arc<dyn VectorSearch>,
    pub keyword: Arc<dyn KeywordSearch>,
    pub hypothetical: Option<Arc<dyn HypotheticalAnswerGenerator>>,
}

/// One [`WorkerPool`] per backend.
#[derive(Clone)]
struct Lanes {
    vector: WorkerPool,
    keyword: WorkerPool,
    hypothetical: WorkerPool,
}

impl Lanes {
    fn new(size: usize) -> Self {
        Self {
            vector: WorkerPool::new(size),
            keyword: WorkerPool::new(size),
            hypothetical: WorkerPool::new(size),
        }
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    /// Completed lists, ordered by strategy.
    pub lists: Vec<RankedList>,
    pub launched: usize,
    /// Strategies that returned, including those with no matches.
    pub completed: usize,
    pub failures: Vec<(Strategy, String)>,
}

impl Retrieval {
    /// Some launched strategy failed or timed out.
    pub fn is_degraded(&self) -> bool {
        self.completed < self.launched
    }

    pub fn contributing(&self) -> Vec<Strategy> {
        self.lists.iter().map(|l| l.strategy).collect()
    }
}

pub struct StrategyOrchestrator {
    backends: Backends,
    caches: Arc<CacheService>,
    lanes: Lanes,
    per_call_timeout: Duration,
    hypothetical_timeout: Duration,
    expansion_probes: usize,
    candidate_multiplier: usize,
}

impl StrategyOrchestrator {
    /// Each backend gets `config.max_workers` workers of its own.
    pub fn new(
        backends: Backends,
        caches: Arc<CacheService>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            backends,
            caches,
            lanes: Lanes::new(config.max_workers),
            per_call_timeout: config.per_call_timeout(),
            hypothetical_timeout: config.hypothetical_timeout(),
            expansion_probes: config.expansion_probes,
            candidate_multiplier: config.candidate_multiplier,
        }
    }

    /// Strategies a query with `expansions` variants would launch.
    pub fn planned_strategies(&self, expansions: usize) -> Vec<Strategy> {
        let mut strategies = vec![Strategy::Vector, Strategy::Keyword];
        strategies.extend(
            (0..expansions.min(self.expansion_probes)).map(Strategy::Expansion),
        );
        if self.backends.hypothetical.is_some() {
            strategies.push(Strategy::Hypothetical);
        }
        strategies
    }

    pub async fn retrieve(
        &self,
        query: &Query,
        expansions: &[String],
        deadline: Instant,
    ) -> Retrieval {
        let fetch = query.k().saturating_mul(self.candidate_multiplier);
        let planned = self.planned_strategies(expansions.len());

        let mut tasks = JoinSet::new();
        let mut task_strategies = HashMap::with_capacity(planned.len());
        for &strategy in &planned {
            let text = match strategy {
                Strategy::Expansion(i) => expansions[i].clone(),
                _ => query.text().to_string(),
            };
            let call = self.call(strategy, text, query.normalized(), fetch);
            let handle = tasks.spawn(async move { (strategy, call.await) });
            task_strategies.insert(handle.id(), strategy);
        }

        debug!(launched = planned.len(), fetch, "fanned out strategies");

        let mut retrieval = Retrieval {
            launched: planned.len(),
            ..Retrieval::default()
        };
        let mut pending: HashSet<Strategy> = planned.iter().copied().collect();

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((strategy, outcome)))) => {
                    pending.remove(&strategy);
                    match outcome {
                        Ok(candidates) => {
                            debug!(
                                %strategy,
                                candidates = candidates.len(),
                                "strategy completed"
                            );
                            retrieval.completed += 1;
                            retrieval
                                .lists
                                .push(RankedList::new(strategy, candidates));
                        }
                        Err(e) => {
                            warn!(%strategy, error = %e, "strategy failed");
                            retrieval.failures.push((strategy, e.to_string()));
                        }
                    }
                }
                Ok(Some(Err(e))) => {
                    if let Some(strategy) =
                        record_task_error(&mut retrieval, &task_strategies, &e)
                    {
                        pending.remove(&strategy);
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        pending = pending.len(),
                        "overall deadline reached, abandoning strategies"
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        let mut abandoned: Vec<Strategy> = pending.into_iter().collect();
        abandoned.sort();
        retrieval.failures.extend(
            abandoned
                .into_iter()
                .map(|s| (s, "overall deadline exceeded".to_string())),
        );
        retrieval.lists.sort_by_key(|l| l.strategy);
        retrieval.failures.sort_by_key(|(s, _)| *s);
        retrieval
    }

    /// Future for one strategy. Owns everything it touches so it can be
    /// spawned.
    fn call(
        &self,
        strategy: Strategy,
        text: String,
        normalized: String,
        fetch: usize,
    ) -> impl Future<Output = Result<Vec<RetrievalCandidate>>> + Send + 'static
    {
        let lanes = self.lanes.clone();
        let budget = self.per_call_timeout;
        let vector = Arc::clone(&self.backends.vector);
        let keyword = Arc::clone(&self.backends.keyword);
        let generator = self.backends.hypothetical.clone();
        let caches = Arc::clone(&self.caches);
        let hypothetical_timeout = self.hypothetical_timeout;

        async move {
            match strategy {
                Strategy::Keyword => {
                    lanes
                        .keyword
                        .run(budget, move || keyword.search(&text, fetch))
                        .await
                }
                Strategy::Vector | Strategy::Expansion(_) => {
                    lanes
                        .vector
                        .run(budget, move || vector.search(&text, fetch))
                        .await
                }
                Strategy::Hypothetical => {
                    let generator = generator.ok_or_else(|| {
                        Error::Backend("no hypothetical generator".into())
                    })?;
                    let answer = hypothetical_answer(
                        &lanes.hypothetical,
                        &caches,
                        generator,
                        text,
                        &normalized,
                        hypothetical_timeout,
                    )
                    .await?;
                    lanes
                        .vector
                        .run(budget, move || vector.search(&answer, fetch))
                        .await
                }
            }
        }
    }
}

/// Attribute a panicked or cancelled strategy task to its strategy and
/// record it as a failure.
fn record_task_error(
    retrieval: &mut Retrieval,
    task_strategies: &HashMap<tokio::task::Id, Strategy>,
    error: &JoinError,
) -> Option<Strategy> {
    let Some(&strategy) = task_strategies.get(&error.id()) else {
        warn!(error = %error, "unknown strategy task failed");
        return None;
    };
    warn!(%strategy, error = %error, "strategy task failed");
    let reason = if error.is_panic() {
        "strategy panicked".to_string()
    } else {
        format!("strategy task failed: {error}")
    };
    retrieval.failures.push((strategy, reason));
    Some(strategy)
}

async fn hypothetical_answer(
    pool: &WorkerPool,
    caches: &CacheService,
    generator: Arc<dyn HypotheticalAnswerGenerator>,
    query: String,
    normalized: &str,
    budget: Duration,
) -> Result<String> {
    let key = hypothetical_key(normalized);
    if let Some(answer) = caches.hypothetical().get(&key) {
        return Ok(answer);
    }

    let answer = pool.run(budget, move || generator.generate(&query)).await?;
    if answer.trim().is_empty() {
        return Err(Error::Backend("empty hypothetical answer".into()));
    }
    caches.hypothetical().insert(key, answer.clone());
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Fixed(Vec<&'static str>);

    impl VectorSearch for Fixed {
        fn search(&self, _text: &str, k: usize) -> Result<Vec<RetrievalCandidate>> {
            Ok(self
                .0
                .iter()
                .take(k)
                .map(|id| RetrievalCandidate::new(*id, *id))
                .collect())
        }
    }

    impl KeywordSearch for Fixed {
        fn search(&self, text: &str, k: usize) -> Result<Vec<RetrievalCandidate>> {
            VectorSearch::search(self, text, k)
        }
    }

    struct Failing;

    impl KeywordSearch for Failing {
        fn search(&self, _text: &str, _k: usize) -> Result<Vec<RetrievalCandidate>> {
            Err(Error::Backend("index offline".into()))
        }
    }

    struct Slow(Duration);

    impl KeywordSearch for Slow {
        fn search(&self, _text: &str, _k: usize) -> Result<Vec<RetrievalCandidate>> {
            std::thread::sleep(self.0);
            Ok(vec![RetrievalCandidate::new("late", "late")])
        }
    }

    #[derive(Default)]
    struct CountingGenerator(AtomicUsize);

    impl HypotheticalAnswerGenerator for CountingGenerator {
        fn generate(&self, query: &str) -> Result<String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!("an answer about {query}"))
        }
    }

    fn orchestrator(backends: Backends, config: &EngineConfig) -> StrategyOrchestrator {
        StrategyOrchestrator::new(
            backends,
            Arc::new(CacheService::from_config(config)),
            config,
        )
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn all_strategies_complete() {
        let config = EngineConfig::default();
        let orch = orchestrator(
            Backends {
                vector: Arc::new(Fixed(vec!["v1", "v2"])),
                keyword: Arc::new(Fixed(vec!["k1"])),
                hypothetical: None,
            },
            &config,
        );
        let query = Query::new("what is rust", 3).unwrap();
        let expansions = vec!["rust is".to_string(), "rust refers to".to_string()];

        let r = orch.retrieve(&query, &expansions, far_deadline()).await;

        assert_eq!(r.launched, 4);
        assert_eq!(r.completed, 4);
        assert!(!r.is_degraded());
        assert_eq!(
            r.contributing(),
            vec![
                Strategy::Vector,
                Strategy::Keyword,
                Strategy::Expansion(0),
                Strategy::Expansion(1)
            ]
        );
    }

    #[tokio::test]
    async fn failing_backend_is_reported_not_propagated() {
        let config = EngineConfig::default();
        let orch = orchestrator(
            Backends {
                vector: Arc::new(Fixed(vec!["v1"])),
                keyword: Arc::new(Failing),
                hypothetical: None,
            },
            &config,
        );
        let query = Query::new("rust", 3).unwrap();

        let r = orch.retrieve(&query, &[], far_deadline()).await;

        assert_eq!(r.launched, 2);
        assert_eq!(r.completed, 1);
        assert!(r.is_degraded());
        assert_eq!(r.failures.len(), 1);
        assert_eq!(r.failures[0].0, Strategy::Keyword);
    }

    #[tokio::test]
    async fn per_call_timeout_abandons_slow_backend() {
        let config = EngineConfig {
            per_call_timeout_ms: 50,
            ..EngineConfig::default()
        };
        let orch = orchestrator(
            Backends {
                vector: Arc::new(Fixed(vec!["v1"])),
                keyword: Arc::new(Slow(Duration::from_millis(400))),
                hypothetical: None,
            },
            &config,
        );
        let query = Query::new("rust", 3).unwrap();

        let started = std::time::Instant::now();
        let r = orch.retrieve(&query, &[], far_deadline()).await;

        assert!(started.elapsed() < Duration::from_millis(350));
        assert_eq!(r.completed, 1);
        assert!(r.failures[0].1.contains("timed out"));
    }

    #[tokio::test]
    async fn overall_deadline_is_a_hard_ceiling() {
        let config = EngineConfig::default();
        let orch = orchestrator(
            Backends {
                vector: Arc::new(Fixed(vec!["v1"])),
                keyword: Arc::new(Slow(Duration::from_millis(500))),
                hypothetical: None,
            },
            &config,
        );
        let query = Query::new("rust", 3).unwrap();

        let started = std::time::Instant::now();
        let deadline = Instant::now() + Duration::from_millis(80);
        let r = orch.retrieve(&query, &[], deadline).await;

        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(r.completed, 1);
        assert_eq!(
            r.failures,
            vec![(Strategy::Keyword, "overall deadline exceeded".to_string())]
        );
    }

    #[tokio::test]
    async fn hypothetical_answer_is_cached_by_normalized_query() {
        let config = EngineConfig::default();
        let generator = Arc::new(CountingGenerator::default());
        let orch = orchestrator(
            Backends {
                vector: Arc::new(Fixed(vec!["v1"])),
                keyword: Arc::new(Fixed(vec![])),
                hypothetical: Some(generator.clone()),
            },
            &config,
        );

        let first = Query::new("What is Rust?", 3).unwrap();
        let second = Query::new("what is rust", 10).unwrap();
        let r = orch.retrieve(&first, &[], far_deadline()).await;
        orch.retrieve(&second, &[], far_deadline()).await;

        assert!(r.contributing().contains(&Strategy::Hypothetical));
        assert_eq!(generator.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hung_keyword_backend_only_exhausts_its_own_workers() {
        let config = EngineConfig {
            max_workers: 2,
            per_call_timeout_ms: 30,
            ..EngineConfig::default()
        };
        let orch = orchestrator(
            Backends {
                vector: Arc::new(Fixed(vec!["v1"])),
                keyword: Arc::new(Slow(Duration::from_secs(1))),
                hypothetical: None,
            },
            &config,
        );

        for word in ["one", "two", "three", "four"] {
            let query = Query::new(word, 3).unwrap();
            let r = orch.retrieve(&query, &[], far_deadline()).await;
            assert_eq!(r.completed, 1, "query {word}");
            assert_eq!(r.contributing(), vec![Strategy::Vector]);
        }
        assert_eq!(orch.lanes.keyword.available(), 0);
        assert_eq!(orch.lanes.vector.available(), 2);
    }

    #[tokio::test]
    async fn panicked_task_is_recorded_against_its_strategy() {
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut task_strategies = HashMap::new();
        let handle = tasks.spawn(async {
            panic!("backend bug");
        });
        task_strategies.insert(handle.id(), Strategy::Keyword);

        let error = match tasks.join_next().await {
            Some(Err(e)) => e,
            other => panic!("expected a join error, got {other:?}"),
        };
        let mut retrieval = Retrieval {
            launched: 1,
            ..Retrieval::default()
        };
        let strategy = record_task_error(&mut retrieval, &task_strategies, &error);

        assert_eq!(strategy, Some(Strategy::Keyword));
        assert_eq!(
            retrieval.failures,
            vec![(Strategy::Keyword, "strategy panicked".to_string())]
        );
        assert!(retrieval.is_degraded());
    }

    #[test]
    fn expansion_probes_are_capped() {
        let config = EngineConfig {
            expansion_probes: 1,
            ..EngineConfig::default()
        };
        let orch = orchestrator(
            Backends {
                vector: Arc::new(Fixed(vec![])),
                keyword: Arc::new(Fixed(vec![])),
                hypothetical: None,
            },
            &config,
        );
        assert_eq!(
            orch.planned_strategies(5),
            vec![Strategy::Vector, Strategy::Keyword, Strategy::Expansion(0)]
        );
    }
}
