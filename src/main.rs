//! CLI entry point for the harvester tool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use harvester_core::fetch::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_API_BASE, DEFAULT_ENRICH_BASE, DEFAULT_ENRICH_FIELD,
    DEFAULT_ENRICH_SCRIPT_ID, REQUEST_TIMEOUT_SECS,
};
use harvester_core::{
    ApiClient, BatchFetcher, Cursor, CursorPaginator, CursorStore, DEFAULT_BATCH_SIZE,
    DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_ATTEMPTS, DEFAULT_PAGE_SIZE, DEFAULT_ROUND_INTERVAL,
    DEFAULT_START_CURSOR, EntityHarvester, EntityOptions, Enrichment, FileCursorStore,
    HtmlScriptEnricher, HttpTimeouts, MemoryCursorStore, PaginatorOptions, RequeuePolicy,
    RoundThrottle, SinkFormat, SqliteCursorStore, open_sink,
};
use tracing::{debug, info, warn};

mod app_config;
mod cli;

use app_config::{FileConfig, VerbositySetting, load_config};
use cli::{BatchArgs, Cli, Command, EntitiesArgs, OutputArgs, OutputFormat, PagesArgs, StoreKind};

/// Default location of the API key.
const DEFAULT_KEY_FILE: &str = "api.key";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();
    let loaded = load_config(cli.config.as_deref())?;
    let file_config = loaded.config.unwrap_or_default();

    // Priority: RUST_LOG env var > -q > -v > config verbosity > default (info)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(default_log_level(&cli, file_config.verbosity))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?cli, config_path = ?loaded.path, "CLI arguments parsed");
    info!("Harvester starting");

    let stop = Arc::new(AtomicBool::new(false));
    let stop_signal = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current page");
            stop_signal.store(true, Ordering::SeqCst);
        }
    });

    let key_path = cli
        .key_file
        .clone()
        .or_else(|| file_config.key_file.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_KEY_FILE));
    let api_key = read_api_key(&key_path)?;

    let timeouts = http_timeouts(&file_config);
    let api_base = cli
        .api_base
        .clone()
        .or_else(|| file_config.api_base.clone())
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
    let api = ApiClient::new(&api_base, api_key, timeouts)?;

    match cli.command {
        Command::Pages(args) => run_pages(args, &api, &file_config, timeouts, stop).await,
        Command::Entities(args) => run_entities(args, &api, &file_config, stop).await,
    }
}

fn default_log_level(cli: &Cli, configured: Option<VerbositySetting>) -> &'static str {
    if cli.quiet {
        return "error";
    }
    match (cli.verbose, configured) {
        (0, Some(VerbositySetting::Quiet)) => "error",
        (0, Some(VerbositySetting::Verbose | VerbositySetting::Debug)) | (1, _) => "debug",
        (0, _) => "info",
        _ => "trace",
    }
}

fn read_api_key(path: &Path) -> Result<String> {
    let key = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read API key file '{}'", path.display()))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("API key file '{}' is empty", path.display());
    }
    Ok(key.to_string())
}

fn http_timeouts(config: &FileConfig) -> HttpTimeouts {
    HttpTimeouts {
        connect: Duration::from_secs(config.connect_timeout_secs.unwrap_or(CONNECT_TIMEOUT_SECS)),
        request: Duration::from_secs(config.request_timeout_secs.unwrap_or(REQUEST_TIMEOUT_SECS)),
    }
}

/// Round settings after applying CLI flags over the config file.
struct RoundSettings {
    batch_size: usize,
    concurrency: usize,
    interval: Duration,
    max_attempts: u32,
    fetch_timeout: Duration,
}

impl RoundSettings {
    fn resolve(args: &BatchArgs, config: &FileConfig) -> Self {
        let batch_size = args
            .batch_size
            .map(usize::from)
            .or(config.batch_size)
            .unwrap_or(DEFAULT_BATCH_SIZE);
        let concurrency = args
            .concurrency
            .map(usize::from)
            .or(config.concurrency)
            .unwrap_or(batch_size);
        let interval = args
            .round_interval_ms
            .or(config.round_interval_ms)
            .map_or(DEFAULT_ROUND_INTERVAL, Duration::from_millis);

        Self {
            batch_size,
            concurrency,
            interval,
            max_attempts: args
                .max_attempts
                .or(config.max_attempts)
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            fetch_timeout: config
                .fetch_timeout_secs
                .map_or(DEFAULT_FETCH_TIMEOUT, Duration::from_secs),
        }
    }

    fn fetcher(&self) -> Result<BatchFetcher> {
        let throttle = Arc::new(RoundThrottle::new(self.interval));
        let fetcher = BatchFetcher::new(self.batch_size, self.concurrency, throttle)
            .context("Invalid batch settings")?;
        Ok(fetcher.with_fetch_timeout(self.fetch_timeout))
    }
}

async fn open_store(kind: StoreKind, path: &Path) -> Result<Arc<dyn CursorStore>> {
    Ok(match kind {
        StoreKind::File => Arc::new(FileCursorStore::new(path)),
        StoreKind::Sqlite => Arc::new(
            SqliteCursorStore::open(path)
                .await
                .with_context(|| format!("Failed to open checkpoint database '{}'", path.display()))?,
        ),
        StoreKind::Memory => {
            warn!("Memory store selected; progress will not survive this process");
            Arc::new(MemoryCursorStore::new())
        }
    })
}

fn sink_format(format: OutputFormat) -> SinkFormat {
    match format {
        OutputFormat::Jsonl => SinkFormat::JsonLines,
        OutputFormat::Tsv => SinkFormat::Tsv,
    }
}

async fn run_pages(
    args: PagesArgs,
    api: &ApiClient,
    config: &FileConfig,
    timeouts: HttpTimeouts,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    let since = args.since.as_deref().unwrap_or(DEFAULT_START_CURSOR);
    let start_cursor = Cursor::parse(since).context("Invalid --since value")?;
    let rounds = RoundSettings::resolve(&args.batch, config);

    let mut options = PaginatorOptions::new(start_cursor);
    options.page_size = args
        .page_size
        .map(usize::from)
        .or(config.page_size)
        .unwrap_or(DEFAULT_PAGE_SIZE);
    options.max_fetch_attempts = rounds.max_attempts;
    options.fetch_timeout = rounds.fetch_timeout;
    options.max_pages = args.max_pages;

    let enrich_field = config
        .enrich_field
        .clone()
        .unwrap_or_else(|| DEFAULT_ENRICH_FIELD.to_string());
    let trailing_columns = if args.enrich {
        vec![enrich_field.clone()]
    } else {
        Vec::new()
    };

    let store = open_store(args.output.store, &args.output.checkpoint).await?;
    let mut sink = open_output(&args.output, trailing_columns).await?;

    let page_interval = config.page_interval_ms.map_or(Duration::ZERO, Duration::from_millis);
    let mut paginator = CursorPaginator::new(Arc::new(api.paged(&args.endpoint, args.mode)), store, options)
        .with_page_throttle(Arc::new(RoundThrottle::new(page_interval)))
        .with_stop_flag(stop);

    if args.enrich {
        let enricher = HtmlScriptEnricher::new(
            config.enrich_base.as_deref().unwrap_or(DEFAULT_ENRICH_BASE),
            config
                .enrich_script_id
                .as_deref()
                .unwrap_or(DEFAULT_ENRICH_SCRIPT_ID),
            &enrich_field,
            timeouts,
        )?;
        paginator = paginator.with_enrichment(Enrichment::new(
            Arc::new(enricher),
            rounds.fetcher()?,
            enrich_field,
        ));
    }

    let summary = paginator.run(sink.as_mut()).await?;
    info!(
        pages = summary.pages,
        written = summary.written,
        duplicates = summary.duplicates,
        write_failures = summary.write_failures,
        enrichment_failures = summary.enrichment_failures,
        final_cursor = ?summary.final_cursor.as_ref().map(Cursor::as_str),
        interrupted = summary.interrupted,
        "Harvest complete"
    );
    if summary.write_failures > 0 {
        warn!(
            failures = summary.write_failures,
            "Some records could not be written; the checkpoint is held before them so the next run fetches them again"
        );
    }
    Ok(())
}

async fn run_entities(
    args: EntitiesArgs,
    api: &ApiClient,
    config: &FileConfig,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    let mut ids = args.ids.clone();
    if let Some(path) = &args.ids_file {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read ids file '{}'", path.display()))?;
        ids.extend(
            raw.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }
    if ids.is_empty() {
        info!("No entity ids provided. Pass ids as arguments or with --ids-file.");
        return Ok(());
    }

    let rounds = RoundSettings::resolve(&args.batch, config);
    let store = open_store(args.output.store, &args.output.checkpoint).await?;
    let mut sink = open_output(&args.output, Vec::new()).await?;

    let options = EntityOptions {
        requeue: RequeuePolicy::with_max_attempts(rounds.max_attempts),
        ..EntityOptions::default()
    };
    let harvester = EntityHarvester::new(
        Arc::new(api.entity(&args.endpoint, args.mode, args.limit)),
        store,
        rounds.fetcher()?,
        options,
    )
    .with_stop_flag(stop);

    let summary = harvester.run(ids, sink.as_mut()).await?;
    info!(
        rounds = summary.rounds,
        completed = summary.completed,
        already_completed = summary.already_completed,
        requeued = summary.requeued,
        dropped = summary.dropped.len(),
        written = summary.written,
        duplicates = summary.duplicates,
        interrupted = summary.interrupted,
        "Entity harvest complete"
    );
    for id in &summary.dropped {
        warn!(entity = %id, "Entity not harvested");
    }
    Ok(())
}

async fn open_output(
    output: &OutputArgs,
    trailing_columns: Vec<String>,
) -> Result<Box<dyn harvester_core::RecordSink>> {
    open_sink(sink_format(output.format), &output.output, trailing_columns)
        .await
        .with_context(|| format!("Failed to open output '{}'", output.output.display()))
}
