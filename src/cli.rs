use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "kbfuse",
    about = "Hybrid keyword and vector search over a personal knowledge base"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Engine config file (default: <data-dir>/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Corpus file, JSON Lines or a JSON array (default: <data-dir>/corpus.jsonl)
    #[arg(long, global = true)]
    pub corpus: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Search the knowledge base
    Search(SearchArgs),
    /// Show how a query would be analyzed, expanded and searched
    Explain(ExplainArgs),
    /// Inspect or clear the persisted result cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Show system status and statistics
    Status(StatusArgs),
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Skip cross-encoder reranking
    #[arg(long)]
    pub no_rerank: bool,

    /// Overall time budget for this search, in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

// -- Explain --

#[derive(Debug, Parser)]
pub struct ExplainArgs {
    /// The query to analyze
    pub query: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Cache --

#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show the number of persisted entries per cache
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete every persisted cache entry
    Clear,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "kbfuse",
            &mut std::io::stdout(),
        );
    }
}
