use clap::Parser;
use kbfuse::{
    cache_store::{CacheStore, CacheTable},
    cli::{CacheAction, Cli, Command},
    config::EngineConfig,
    corpus,
    data_dir::DataDir,
    error::{self, Error},
    mcp,
    search::{self, Paths},
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("KBFUSE_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn runtime() -> error::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Config(format!("failed to start tokio runtime: {e}")))
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let paths =
        Paths::resolve(&data_dir, cli.config.as_deref(), cli.corpus.as_deref());

    match cli.command {
        Command::Search(args) => {
            let loaded = search::load_engine(&paths)?;
            let report =
                runtime()?.block_on(search::execute_search(&loaded.engine, &args))?;
            loaded.persist();

            if args.json {
                search::format_json(&report, &args.query)?;
            } else {
                search::format_human(&report, &args.query);
            }
        }
        Command::Explain(args) => {
            let loaded = search::load_engine(&paths)?;
            let plan = loaded.engine.explain(&args.query)?;
            if args.json {
                search::format_plan_json(&plan)?;
            } else {
                search::format_plan_human(&plan);
            }
        }
        Command::Cache { action } => {
            let store = CacheStore::open(&paths.cache)?;
            match action {
                CacheAction::Stats { json } => cache_stats(&store, json)?,
                CacheAction::Clear => {
                    store.clear()?;
                    println!("Cleared cache at {}", paths.cache.display());
                }
            }
        }
        Command::Status(args) => {
            cmd_status(&data_dir, &paths, args.json)?;
        }
        Command::Mcp => {
            mcp::run_mcp(paths)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn cache_stats(store: &CacheStore, json: bool) -> error::Result<()> {
    let mut counts = Vec::with_capacity(CacheTable::ALL.len());
    for table in CacheTable::ALL {
        counts.push((table.name(), store.count(table)?));
    }

    if json {
        let map: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(name, count)| (name.to_string(), json!(count)))
            .collect();
        println!("{}", serde_json::Value::Object(map));
    } else {
        for (name, count) in &counts {
            println!("{name}\t{count}");
        }
    }
    Ok(())
}

fn cmd_status(
    data_dir: &DataDir,
    paths: &Paths,
    json: bool,
) -> error::Result<()> {
    let config = EngineConfig::load(&paths.config)?;
    let documents = match corpus::load(&paths.corpus) {
        Ok(docs) => Some(docs.len()),
        Err(Error::NotFound { .. }) => None,
        Err(e) => return Err(e),
    };
    let cached = if paths.cache.exists() {
        CacheStore::open(&paths.cache)
            .and_then(|store| store.count(CacheTable::Results))
            .map(Some)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "cache snapshot unreadable");
                None
            })
    } else {
        Some(0)
    };

    if json {
        println!(
            "{}",
            json!({
                "data_dir": data_dir.root().display().to_string(),
                "config": paths.config.display().to_string(),
                "corpus": paths.corpus.display().to_string(),
                "documents": documents,
                "cached_results": cached,
                "engine": config,
            })
        );
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Config: {}", paths.config.display());
        match documents {
            Some(n) => println!("Corpus: {} ({n} documents)", paths.corpus.display()),
            None => println!("Corpus: {} (missing)", paths.corpus.display()),
        }
        match cached {
            Some(n) => println!("Cached results: {n}"),
            None => println!("Cached results: unreadable"),
        }
        println!(
            "Timeouts: {}ms per call, {}ms overall",
            config.per_call_timeout_ms, config.overall_timeout_ms
        );
        println!("Workers: {}", config.max_workers);
    }
    Ok(())
}
