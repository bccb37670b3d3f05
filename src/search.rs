//! Running searches against an on-disk knowledge base and printing the
//! results for the command line.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    backend::{Metadata, Strategy},
    cache_store::CacheStore,
    cli::SearchArgs,
    config::EngineConfig,
    corpus,
    data_dir::DataDir,
    engine::{QueryPlan, SearchEngine, SearchReport},
    error::Result,
    query::SearchOptions,
    tantivy_index::KeywordIndex,
    text_util::{DEFAULT_SNIPPET_MAX_CHARS, extract_snippet},
    vector_index::{DenseIndex, HashingEmbedder},
};

/// Where the engine's inputs live, after applying command-line overrides.
#[derive(Debug, Clone)]
pub struct Paths {
    pub config: PathBuf,
    pub corpus: PathBuf,
    pub cache: PathBuf,
}

impl Paths {
    pub fn resolve(
        data_dir: &DataDir,
        config: Option<&Path>,
        corpus: Option<&Path>,
    ) -> Self {
        Self {
            config: config
                .map(Path::to_path_buf)
                .unwrap_or_else(|| data_dir.config_file()),
            corpus: corpus
                .map(Path::to_path_buf)
                .unwrap_or_else(|| data_dir.corpus_file()),
            cache: data_dir.cache_db(),
        }
    }
}

/// A ready engine plus the snapshot store its caches were warmed from.
pub struct LoadedEngine {
    pub engine: SearchEngine,
    /// `None` when the snapshot could not be opened; the engine then runs
    /// cold and nothing is persisted.
    pub store: Option<CacheStore>,
    pub documents: usize,
}

impl LoadedEngine {
    /// Write the warm caches back to disk. Failures are logged, not
    /// returned: a lost snapshot only costs a cold start.
    pub fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = self.engine.persist_cache(store) {
            warn!(error = %e, "failed to persist cache snapshot");
        }
    }
}

/// Build keyword and dense indexes over the corpus and warm the caches.
pub fn load_engine(paths: &Paths) -> Result<LoadedEngine> {
    let config = EngineConfig::load(&paths.config)?;
    let documents = corpus::load(&paths.corpus)?;
    let count = documents.len();

    let keyword = KeywordIndex::build(&documents)?;
    let vector = DenseIndex::build(documents, HashingEmbedder::default())?;

    let engine = SearchEngine::builder()
        .config(config)
        .keyword(Arc::new(keyword))
        .vector(Arc::new(vector))
        .build()?;

    let store = match CacheStore::open(&paths.cache) {
        Ok(store) => Some(store),
        Err(e) => {
            warn!(
                path = %paths.cache.display(),
                error = %e,
                "cache snapshot unreadable, starting cold"
            );
            None
        }
    };
    let restored = store.as_ref().map_or(0, |s| engine.load_cache(s));
    info!(documents = count, restored, "engine loaded");

    Ok(LoadedEngine {
        engine,
        store,
        documents: count,
    })
}

pub async fn execute_search(
    engine: &SearchEngine,
    args: &SearchArgs,
) -> Result<SearchReport> {
    let options = SearchOptions {
        use_reranker: !args.no_rerank,
        timeout_ms: args.timeout_ms,
    };
    engine.search_detailed(&args.query, args.count, options).await
}

/// JSON shape of a search, shared by `search --json` and the MCP server.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutput {
    pub query: String,
    pub result_count: usize,
    pub cached: bool,
    pub reranked: bool,
    pub launched: usize,
    pub completed: usize,
    pub contributing: Vec<Strategy>,
    pub results: Vec<SearchOutputItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutputItem {
    pub rank: usize,
    pub doc_id: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    pub metadata: Metadata,
}

impl SearchOutput {
    pub fn new(query: &str, report: &SearchReport, include_snippet: bool) -> Self {
        let results = report
            .hits
            .iter()
            .enumerate()
            .map(|(i, hit)| SearchOutputItem {
                rank: i + 1,
                doc_id: hit.doc_id.clone(),
                score: hit.score,
                snippet: include_snippet.then(|| {
                    extract_snippet(&hit.text, query, DEFAULT_SNIPPET_MAX_CHARS)
                }),
                metadata: hit.metadata.clone(),
            })
            .collect::<Vec<_>>();

        Self {
            query: query.to_string(),
            result_count: results.len(),
            cached: report.cached,
            reranked: report.reranked,
            launched: report.launched,
            completed: report.completed,
            contributing: report.contributing.clone(),
            results,
        }
    }
}

pub fn format_human(report: &SearchReport, query: &str) {
    if report.hits.is_empty() {
        if report.completed == 0 && report.launched > 0 {
            println!("No results: no search strategy finished in time.");
        } else {
            println!("No results found.");
        }
        return;
    }

    for (i, hit) in report.hits.iter().enumerate() {
        println!("{:>3}. [{:.3}] {}", i + 1, hit.score, hit.doc_id);
        let snippet = extract_snippet(&hit.text, query, 120);
        if !snippet.is_empty() {
            println!("     {snippet}");
        }
    }

    let mut footer = format!("\n{} result(s)", report.hits.len());
    if report.cached {
        footer.push_str(", cached");
    }
    if report.reranked {
        footer.push_str(", reranked");
    }
    if report.completed < report.launched {
        footer.push_str(&format!(
            ", {}/{} strategies completed",
            report.completed, report.launched
        ));
    }
    println!("{footer}");
}

pub fn format_json(report: &SearchReport, query: &str) -> Result<()> {
    let output = SearchOutput::new(query, report, true);
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

pub fn format_plan_human(plan: &QueryPlan) {
    println!("Query:       {}", plan.query);
    println!("Normalized:  {}", plan.normalized);
    println!("Type:        {}", plan.characteristics.query_type);
    println!("Features:    {}", plan.characteristics.summary());
    println!(
        "Weights:     vector {:.2}, keyword {:.2}",
        plan.weights.vector, plan.weights.keyword
    );
    println!("Expansions:");
    for expansion in &plan.expansions {
        println!("  - {expansion}");
    }
    let strategies: Vec<String> =
        plan.strategies.iter().map(Strategy::to_string).collect();
    println!("Strategies:  {}", strategies.join(", "));
    println!(
        "Reranker:    {}",
        if plan.rerank_available {
            "available"
        } else {
            "not configured"
        }
    );
}

pub fn format_plan_json(plan: &QueryPlan) -> Result<()> {
    println!("{}", serde_json::to_string(plan)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SearchHit;

    fn make_search_args(query: &str) -> SearchArgs {
        SearchArgs {
            query: query.to_string(),
            count: 10,
            json: false,
            no_rerank: false,
            timeout_ms: None,
        }
    }

    fn write_corpus(dir: &Path) {
        std::fs::write(
            dir.join("corpus.jsonl"),
            concat!(
                "{\"id\": \"hybrid\", \"text\": \"Hybrid search combines vector search with keyword search.\"}\n",
                "{\"id\": \"ticket\", \"text\": \"Ticket ABC-123 tracks the indexing outage.\", \"metadata\": {\"source\": \"tracker\"}}\n",
                "{\"id\": \"bread\", \"text\": \"A recipe for sourdough bread.\"}\n",
            ),
        )
        .unwrap();
    }

    fn report(hits: Vec<SearchHit>) -> SearchReport {
        SearchReport {
            hits,
            launched: 3,
            completed: 3,
            contributing: vec![Strategy::Vector, Strategy::Keyword],
            cached: false,
            reranked: false,
        }
    }

    #[test]
    fn paths_default_to_data_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let paths = Paths::resolve(&data_dir, None, None);
        assert_eq!(paths.corpus, data_dir.corpus_file());
        assert_eq!(paths.config, data_dir.config_file());

        let corpus = tmp.path().join("other.jsonl");
        let paths = Paths::resolve(&data_dir, None, Some(&corpus));
        assert_eq!(paths.corpus, corpus);
    }

    #[test]
    fn load_engine_requires_corpus() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let paths = Paths::resolve(&data_dir, None, None);
        assert!(load_engine(&paths).is_err());
    }

    #[test]
    fn corrupt_snapshot_starts_cold() {
        let tmp = tempfile::tempdir().unwrap();
        write_corpus(tmp.path());
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        std::fs::write(data_dir.cache_db(), b"not a database").unwrap();
        let paths = Paths::resolve(&data_dir, None, None);

        let loaded = load_engine(&paths).unwrap();
        assert!(loaded.store.is_none());
        loaded.persist();
    }

    #[tokio::test]
    async fn search_over_corpus_and_persist() {
        let tmp = tempfile::tempdir().unwrap();
        write_corpus(tmp.path());
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let paths = Paths::resolve(&data_dir, None, None);

        let loaded = load_engine(&paths).unwrap();
        assert_eq!(loaded.documents, 3);

        let report = execute_search(&loaded.engine, &make_search_args("ABC-123"))
            .await
            .unwrap();
        assert_eq!(report.hits[0].doc_id, "ticket");
        assert!(!report.cached);

        loaded.persist();
        drop(loaded);

        let reloaded = load_engine(&paths).unwrap();
        let again = execute_search(&reloaded.engine, &make_search_args("ABC-123"))
            .await
            .unwrap();
        assert!(again.cached);
        let ids = |r: &SearchReport| {
            r.hits.iter().map(|h| h.doc_id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(&again), ids(&report));
    }

    #[test]
    fn output_numbers_results_and_snippets() {
        let mut metadata = Metadata::new();
        metadata.insert("source".into(), "tracker".into());
        let report = report(vec![
            SearchHit {
                doc_id: "a".into(),
                text: "first document".into(),
                metadata,
                score: 1.0,
            },
            SearchHit {
                doc_id: "b".into(),
                text: "second document".into(),
                metadata: Metadata::new(),
                score: 0.0,
            },
        ]);

        let output = SearchOutput::new("document", &report, true);
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["resultCount"], 2);
        assert_eq!(value["results"][1]["rank"], 2);
        assert_eq!(value["results"][0]["snippet"], "first document");
        assert_eq!(value["results"][0]["metadata"]["source"], "tracker");
        assert_eq!(value["contributing"][1], "keyword");

        let bare = serde_json::to_value(SearchOutput::new("document", &report, false))
            .unwrap();
        assert!(bare["results"][0].get("snippet").is_none());
    }
}
