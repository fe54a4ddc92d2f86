//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use url::Url;

use paperdigest_core::pipeline::{
    ConverterSettings, DigestRunResult, LlmSettings, ProgressReporter, RunConfig, SummaryFormat,
    run_digest,
};
use paperdigest_fetcher::FetchOptions;
use paperdigest_shared::{
    AppConfig, init_config, load_config, load_config_from, validate_api_keys,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// paperdigest — daily research paper digests.
#[derive(Parser)]
#[command(
    name = "paperdigest",
    version,
    about = "Scrape, rank, and summarize the latest research papers into a daily digest.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

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
    /// Run the full digest pipeline.
    Run {
        /// Config file path (defaults to ~/.paperdigest/paperdigest.toml).
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Run date as YYYY-MM-DD (defaults to today).
        #[arg(short, long)]
        date: Option<String>,

        /// Output directory (overrides the config file).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Number of papers to select (overrides the config file).
        #[arg(short, long)]
        shortlist: Option<usize>,
    },

    /// Scrape the listing and print the candidates without ranking or
    /// summarizing.
    Fetch {
        /// Config file path (defaults to ~/.paperdigest/paperdigest.toml).
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of candidates to collect (overrides the config file).
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
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
        0 => "paperdigest=info",
        1 => "paperdigest=debug",
        _ => "paperdigest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            config,
            date,
            out,
            shortlist,
        } => cmd_run(config.as_deref(), date.as_deref(), out, shortlist).await,
        Command::Fetch { config, count } => cmd_fetch(config.as_deref(), count).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    config_path: Option<&Path>,
    date: Option<&str>,
    out: Option<PathBuf>,
    shortlist: Option<usize>,
) -> Result<()> {
    let config = load_config_or_default(config_path)?;

    // Fail before any network work if the keys are missing
    validate_api_keys(&config)?;

    let date = match date {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|e| eyre!("invalid date '{raw}': {e} (expected YYYY-MM-DD)"))?,
        None => chrono::Utc::now().date_naive(),
    };

    let output_root = match out {
        Some(p) => p,
        None => expand_home(&config.output.dir)?,
    };

    let run_config = build_run_config(&config, output_root, date, shortlist)?;

    info!(
        listing = %run_config.listing_url,
        shortlist = run_config.shortlist,
        out = %run_config.output_root.display(),
        "starting digest run"
    );

    let reporter = CliProgress::new();
    let result = run_digest(&run_config, &reporter).await?;

    println!();
    match &result.digest_path {
        Some(path) => {
            println!("  Digest written!");
            println!("  Path:       {}", path.display());
        }
        None => {
            println!("  No digest written: every selected paper was dropped.");
        }
    }
    println!("  Discovered: {}", result.discovered);
    println!("  Ranked:     {}", result.ranked);
    println!("  Summarized: {}", result.summarized);
    if !result.dropped.is_empty() {
        println!("  Dropped:    {}", result.dropped.len());
        for drop in &result.dropped {
            println!("    - {} ({}: {})", drop.title, drop.stage, drop.reason);
        }
    }
    println!("  Time:       {:.1}s", result.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_fetch(config_path: Option<&Path>, count: Option<usize>) -> Result<()> {
    let config = load_config_or_default(config_path)?;

    let listing_url = Url::parse(&config.fetcher.listing_url)
        .map_err(|e| eyre!("invalid listing URL '{}': {e}", config.fetcher.listing_url))?;

    let opts = FetchOptions {
        listing_url,
        target_count: count.unwrap_or(config.fetcher.target_count),
        max_pages: config.fetcher.max_pages,
        request_delay_ms: config.fetcher.request_delay_ms,
    };

    info!(listing = %opts.listing_url, target = opts.target_count, "fetching listing");

    let records = paperdigest_fetcher::fetch_listing(&opts).await?;

    println!();
    println!("  {} candidate papers:", records.len());
    for (i, record) in records.iter().enumerate() {
        println!("  {:>3}. {} ({})", i + 1, record.title, record.publication_date);
        if let Some(code) = &record.code_link {
            println!("       code: {code} ({} stars)", record.stars);
        }
    }
    println!();

    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Config plumbing
// ---------------------------------------------------------------------------

fn load_config_or_default(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(p) => Ok(load_config_from(p)?),
        None => Ok(load_config()?),
    }
}

/// Expand a leading `~/` against the user's home directory.
fn expand_home(dir: &str) -> Result<PathBuf> {
    if let Some(rest) = dir.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| eyre!("could not determine home directory"))?;
        return Ok(home.join(rest));
    }
    Ok(PathBuf::from(dir))
}

fn build_run_config(
    config: &AppConfig,
    output_root: PathBuf,
    date: NaiveDate,
    shortlist: Option<usize>,
) -> Result<RunConfig> {
    let listing_url = Url::parse(&config.fetcher.listing_url)
        .map_err(|e| eyre!("invalid listing URL '{}': {e}", config.fetcher.listing_url))?;

    // validate_api_keys already confirmed these are present
    let llm_key = std::env::var(&config.llm.api_key_env)
        .map_err(|_| eyre!("{} is not set", config.llm.api_key_env))?;
    let converter_key = std::env::var(&config.converter.api_key_env)
        .map_err(|_| eyre!("{} is not set", config.converter.api_key_env))?;

    Ok(RunConfig {
        listing_url,
        target_count: config.fetcher.target_count,
        max_pages: config.fetcher.max_pages,
        request_delay_ms: config.fetcher.request_delay_ms,
        shortlist: shortlist.unwrap_or(config.ranker.shortlist),
        rank_max_tokens: config.ranker.max_tokens,
        llm: LlmSettings {
            api_key: llm_key,
            base_url: config.llm.base_url.clone(),
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
        },
        converter: ConverterSettings {
            api_key: converter_key,
            base_url: config.converter.base_url.clone(),
            poll_interval: Duration::from_millis(config.converter.poll_interval_ms),
            timeout: Duration::from_secs(config.converter.timeout_secs),
            max_pdf_bytes: config.converter.max_pdf_bytes,
        },
        summary: SummaryFormat {
            language: config.summary.language.clone(),
            target_length: config.summary.target_length.clone(),
            audience: config.summary.audience.clone(),
            sections: config.summary.sections.clone(),
        },
        output_root,
        date,
    })
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
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn paper_processed(&self, title: &str, stage: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("{stage} [{current}/{total}] {title}"));
    }

    fn paper_dropped(&self, title: &str, stage: &str, reason: &str) {
        self.spinner.println(format!("  ! dropped at {stage}: {title} ({reason})"));
    }

    fn done(&self, _result: &DigestRunResult) {
        self.spinner.finish_and_clear();
    }
}
