//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use harvester_core::fetch::constants::{DEFAULT_ENTITY_ENDPOINT, DEFAULT_PAGE_ENDPOINT};

/// Incrementally harvest a paginated, rate-limited API into local files.
///
/// Progress is checkpointed after every page or round, so an interrupted run
/// picks up where it stopped without writing any record twice.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/harvester/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// File holding the API key [default: api.key]
    #[arg(short = 'k', long, global = true, value_name = "PATH")]
    pub key_file: Option<PathBuf>,

    /// Base URL of the JSON API
    #[arg(long, global = true, value_name = "URL")]
    pub api_base: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Harvesting modes.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Page through the source by timestamp cursor
    Pages(PagesArgs),
    /// Fetch the records of a list of entity ids
    Entities(EntitiesArgs),
}

/// Output file encoding.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One JSON object per line
    Jsonl,
    /// Tab-separated values with a header row
    Tsv,
}

/// Where progress is checkpointed.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// JSON file replaced atomically
    File,
    /// SQLite database
    Sqlite,
    /// Nothing persisted (dry run)
    Memory,
}

/// Output and checkpoint flags shared by both modes.
#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Output file (appended to)
    #[arg(short, long, value_name = "PATH")]
    pub output: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Jsonl)]
    pub format: OutputFormat,

    /// Checkpoint location
    #[arg(long, value_name = "PATH")]
    pub checkpoint: PathBuf,

    /// Checkpoint store
    #[arg(long, value_enum, default_value_t = StoreKind::File)]
    pub store: StoreKind,
}

/// Batch round flags shared by both modes.
#[derive(Args, Debug, Clone, Default)]
pub struct BatchArgs {
    /// Items per round (1-500) [default: 100]
    #[arg(short = 'b', long, value_parser = clap::value_parser!(u16).range(1..=500))]
    pub batch_size: Option<u16>,

    /// Concurrent fetches per round (1-500) [default: batch size]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u16).range(1..=500))]
    pub concurrency: Option<u16>,

    /// Minimum milliseconds between round starts (0 to disable) [default: 5000]
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=600_000))]
    pub round_interval_ms: Option<u64>,

    /// Attempts per page fetch or entity (1-10) [default: 3]
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_attempts: Option<u32>,
}

/// Arguments of the `pages` command.
#[derive(Args, Debug, Clone)]
pub struct PagesArgs {
    /// Start cursor when there is no checkpoint ("YYYY-MM-DD" or "YYYY-MM-DD HH:MM:SS")
    #[arg(long, value_name = "TIMESTAMP")]
    pub since: Option<String>,

    /// API endpoint to page through
    #[arg(long, default_value = DEFAULT_PAGE_ENDPOINT)]
    pub endpoint: String,

    /// Game mode filter sent as `m`
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub mode: Option<u8>,

    /// Page size ceiling of the endpoint (1-500) [default: 500]
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=500))]
    pub page_size: Option<u16>,

    /// Stop after this many pages
    #[arg(long, value_name = "N")]
    pub max_pages: Option<usize>,

    /// Add the enrichment field to every record
    #[arg(long)]
    pub enrich: bool,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(flatten)]
    pub batch: BatchArgs,
}

/// Arguments of the `entities` command.
#[derive(Args, Debug, Clone)]
pub struct EntitiesArgs {
    /// Entity ids to fetch
    pub ids: Vec<String>,

    /// File with one entity id per line
    #[arg(long, value_name = "PATH")]
    pub ids_file: Option<PathBuf>,

    /// API endpoint queried per entity
    #[arg(long, default_value = DEFAULT_ENTITY_ENDPOINT)]
    pub endpoint: String,

    /// Game mode sent as `m`
    #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub mode: u8,

    /// Records requested per entity (1-100)
    #[arg(short, long, default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub limit: u32,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(flatten)]
    pub batch: BatchArgs,
}
