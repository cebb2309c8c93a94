//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use regenrich_core::pipeline::{
    self, CacheMode, PipelineOptions, PipelineReport, ProgressReporter,
};
use regenrich_lookup::RegistryClient;
use regenrich_shared::{AppConfig, init_config, load_config, load_config_from, resolve_api_key};
use regenrich_storage::CacheStore;
use tokio::sync::watch;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// regenrich: enrich registration numbers in a spreadsheet with registry data.
#[derive(Parser)]
#[command(
    name = "regenrich",
    version,
    about = "Enrich a spreadsheet of business registration numbers with registry data.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.regenrich/regenrich.toml.
    #[arg(long, global = true, env = "REGENRICH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Enrich a spreadsheet and write the report.
    Run(RunArgs),

    /// Inspect the lookup cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments for `regenrich run`.
#[derive(Args)]
pub(crate) struct RunArgs {
    /// Source spreadsheet (.xlsx, .xls, .ods).
    #[arg(short, long)]
    pub input: PathBuf,

    /// Report destination (.xlsx). Overwritten if present.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Look up every identifier again, ignoring what was attempted before.
    #[arg(long, conflicts_with = "cache_only")]
    pub skip_cache: bool,

    /// Report from the cache only; never call the registry.
    #[arg(long)]
    pub cache_only: bool,

    /// Cache database path (overrides config).
    #[arg(long)]
    pub cache: Option<PathBuf>,

    /// Worksheet to read (defaults to the first sheet).
    #[arg(long)]
    pub sheet: Option<String>,
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Show how many identifiers are cached and attempted.
    Stats {
        /// Cache database path (overrides config).
        #[arg(long)]
        cache: Option<PathBuf>,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "regenrich=info",
        1 => "regenrich=debug",
        _ => "regenrich=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Run(args) => cmd_run(config_path.as_deref(), args).await,
        Command::Cache { action } => match action {
            CacheAction::Stats { cache } => {
                cmd_cache_stats(config_path.as_deref(), cache.as_deref()).await
            }
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

fn cache_path(config: &AppConfig, flag: Option<&Path>) -> Result<PathBuf> {
    Ok(match flag {
        Some(p) => p.to_path_buf(),
        None => config.cache.resolved_path()?,
    })
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, args: RunArgs) -> Result<()> {
    let config = resolve_config(config_path)?;

    let mode = if args.cache_only {
        CacheMode::CacheOnly
    } else if args.skip_cache {
        CacheMode::SkipCache
    } else {
        CacheMode::Normal
    };

    // The credential is only needed when the registry will be called.
    let lookup = match mode {
        CacheMode::CacheOnly => None,
        _ => {
            let key = resolve_api_key(&config)?;
            let client = RegistryClient::new(config.api.endpoint()?, key, config.api.timeout())?;
            Some(Arc::new(client))
        }
    };

    let mut options = PipelineOptions::from_config(&config, args.input, args.output);
    options.mode = mode;
    if args.sheet.is_some() {
        options.sheet_name = args.sheet;
    }

    let cache_file = cache_path(&config, args.cache.as_deref())?;
    let cache = pipeline::open_cache(&cache_file).await;
    if cache.is_none() && mode == CacheMode::CacheOnly {
        return Err(eyre!(
            "--cache-only requested but the cache at '{}' could not be opened",
            cache_file.display()
        ));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(watch_interrupts(shutdown_tx));

    info!(
        input = %options.input.display(),
        output = %options.output.display(),
        cache = %cache_file.display(),
        ?mode,
        "starting enrichment"
    );

    let reporter = CliProgress::new();
    let report = pipeline::run_pipeline(
        &options,
        lookup,
        cache.as_ref(),
        &reporter,
        Some(shutdown_rx),
    )
    .await;
    reporter.spinner.finish_and_clear();
    let report = report?;

    print_summary(&report, &options.output);
    Ok(())
}

/// What to do about a Ctrl-C press.
#[derive(Debug, PartialEq, Eq)]
enum InterruptAction {
    /// Finish the current wave, then stop.
    Drain,
    /// Exit immediately.
    Abort,
}

/// Escalates repeated Ctrl-C presses: drain first, abort on the second.
struct Interrupts {
    shutdown_tx: watch::Sender<bool>,
    presses: u8,
}

impl Interrupts {
    fn new(shutdown_tx: watch::Sender<bool>) -> Self {
        Self {
            shutdown_tx,
            presses: 0,
        }
    }

    fn on_press(&mut self) -> InterruptAction {
        self.presses = self.presses.saturating_add(1);
        if self.presses == 1 {
            let _ = self.shutdown_tx.send(true);
            InterruptAction::Drain
        } else {
            InterruptAction::Abort
        }
    }
}

async fn watch_interrupts(shutdown_tx: watch::Sender<bool>) {
    let mut interrupts = Interrupts::new(shutdown_tx);
    while tokio::signal::ctrl_c().await.is_ok() {
        match interrupts.on_press() {
            InterruptAction::Drain => {
                warn!("interrupt received, finishing the current wave (Ctrl-C again to abort)");
            }
            InterruptAction::Abort => {
                warn!("second interrupt, aborting");
                std::process::exit(130);
            }
        }
    }
}

fn print_summary(report: &PipelineReport, output: &Path) {
    println!();
    if report.interrupted() {
        println!("  Enrichment interrupted; report contains data gathered so far.");
    } else {
        println!("  Enrichment complete!");
    }
    println!("  Rows:        {}", report.rows);
    println!("  Identifiers: {}", report.identifiers);
    println!("  From cache:  {}", report.cached);
    println!("  Looked up:   {}", report.pending);
    if let Some(batch) = &report.batch {
        println!(
            "  Waves:       {}/{} ({} chunks ok, {} failed)",
            batch.waves_run, batch.waves_planned, batch.chunks_ok, batch.chunks_failed
        );
    }
    println!("  Matched:     {}", report.matched_rows);
    if report.cache_degraded {
        println!("  Cache:       unavailable, results were not persisted");
    }
    println!("  Report:      {}", output.display());
    println!("  Time:        {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn wave_finished(&self, current: usize, total: usize, records: usize) {
        self.spinner
            .set_message(format!("Looking up [wave {current}/{total}] {records} records so far"));
    }

    fn done(&self, _report: &PipelineReport) {
        self.spinner.finish_and_clear();
    }
}

async fn cmd_cache_stats(config_path: Option<&Path>, flag: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let path = cache_path(&config, flag)?;
    if !path.exists() {
        return Err(eyre!("no cache found at '{}'", path.display()));
    }

    let store = CacheStore::open(&path).await?;
    let stats = store.stats().await?;

    println!();
    println!("  Cache:     {}", path.display());
    println!("  Records:   {}", stats.records);
    println!("  Attempted: {}", stats.attempted);
    println!(
        "  No data:   {}",
        stats.attempted.saturating_sub(stats.records)
    );
    println!();
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
