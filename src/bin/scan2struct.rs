//! CLI binary for scan2struct.
//!
//! A thin shim over the library crate: maps flags to `PipelineConfig`,
//! wires local stores (filesystem or HTTP blobs, SQLite, JSON documents),
//! runs one job and prints the response envelope as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use scan2struct::storage::{BlobStore, FsBlobStore, HttpBlobStore, JsonDocumentStore, SqliteRecordStore};
use scan2struct::{
    DocumentType, ExtractedAsset, JobStatus, Pipeline, PipelineConfig, PipelineObserver, Response,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Spinner while the job is in its single-step stages, then a bar over the
/// region candidates. Region events arrive out of order from concurrent
/// tasks; the bar only counts them.
struct CliObserver {
    bar: ProgressBar,
    failed: AtomicUsize,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Rasterising pages…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            failed: AtomicUsize::new(0),
        })
    }
}

impl PipelineObserver for CliObserver {
    fn on_status(&self, _job_id: Uuid, status: JobStatus) {
        match status {
            JobStatus::Rasterized => {
                self.bar.set_prefix("Extracting");
                self.bar.set_message("Waiting for the oracle…");
            }
            JobStatus::RegionsProcessed => {
                self.bar.set_prefix("Linking");
                self.bar.set_message("");
            }
            JobStatus::Linked => self.bar.set_prefix("Persisting"),
            JobStatus::CleanedUp | JobStatus::Failed => self.bar.finish_and_clear(),
            _ => {}
        }
    }

    fn on_pages_rendered(&self, _job_id: Uuid, page_count: usize) {
        self.bar
            .println(format!("{} {} pages rasterised", cyan("◆"), page_count));
    }

    fn on_regions_start(&self, _job_id: Uuid, total: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} regions  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total as u64);
        self.bar.set_prefix("Cropping");
    }

    fn on_region_stored(&self, _job_id: Uuid, asset: &ExtractedAsset) {
        self.bar.println(format!(
            "  {} {:<28} {}",
            green("✓"),
            asset.region_id(),
            dim(&format!(
                "{}x{}  {} bytes",
                asset.storage.crop.width, asset.storage.crop.height, asset.storage.byte_size
            )),
        ));
        self.bar.inc(1);
    }

    fn on_region_failed(&self, _job_id: Uuid, region_id: &str, error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.bar
            .println(format!("  {} {:<28} {}", red("✗"), region_id, red(error)));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process an exam paper with local stores under ./scan2struct-out
  scan2struct exam.pdf

  # Let the oracle decide the document type, write the envelope to a file
  scan2struct --document-type auto scan.pdf -o result.json

  # Upload crops to an S3-compatible bucket behind a CDN
  scan2struct --blob-endpoint https://bucket.s3.example.com \
              --asset-base-url https://cdn.example.com exam.pdf

ENVIRONMENT VARIABLES:
  ANTHROPIC_API_KEY / OPENAI_API_KEY   Provider credentials (auto-detected)
  SCAN2STRUCT_PROVIDER                 Provider name (openai, anthropic, gemini, ollama)
  SCAN2STRUCT_MODEL                    Model ID
  PDFIUM_DYNAMIC_LIB_PATH              Directory containing libpdfium
  RUST_LOG                             Log filter (overrides --verbose)
"#;

/// Turn scanned documents into structured records and cropped image assets.
#[derive(Parser, Debug)]
#[command(
    name = "scan2struct",
    version,
    about = "Turn scanned documents into structured records and cropped image assets",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Document type hint: exam or auto.
    #[arg(short = 't', long, env = "SCAN2STRUCT_DOCUMENT_TYPE", default_value = "exam")]
    document_type: String,

    /// Write the JSON envelope to this file instead of stdout.
    #[arg(short, long, env = "SCAN2STRUCT_OUTPUT")]
    output: Option<PathBuf>,

    /// Directory for local stores (assets, SQLite database, JSON documents).
    #[arg(long, env = "SCAN2STRUCT_STORE_DIR", default_value = "scan2struct-out")]
    store_dir: PathBuf,

    /// Working-storage root for per-job temp files.
    #[arg(long, env = "SCAN2STRUCT_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// S3-compatible bucket URL; crops are PUT there instead of the store dir.
    #[arg(long, env = "SCAN2STRUCT_BLOB_ENDPOINT")]
    blob_endpoint: Option<String>,

    /// Bearer token for the blob endpoint.
    #[arg(long, env = "SCAN2STRUCT_BLOB_TOKEN", hide_env_values = true)]
    blob_token: Option<String>,

    /// Public base URL of stored assets.
    #[arg(long, env = "SCAN2STRUCT_ASSET_BASE_URL")]
    asset_base_url: Option<String>,

    /// Leading path segment of every asset key.
    #[arg(long, env = "SCAN2STRUCT_KEY_PREFIX", default_value = "exam-images")]
    key_prefix: String,

    /// LLM model ID.
    #[arg(long, env = "SCAN2STRUCT_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "SCAN2STRUCT_PROVIDER")]
    provider: Option<String>,

    /// Longest rendered page edge in pixels.
    #[arg(long, env = "SCAN2STRUCT_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// Extra pixels around every cropped region.
    #[arg(long, env = "SCAN2STRUCT_CROP_PADDING", default_value_t = 0)]
    crop_padding: u32,

    /// Maximum regions processed at once (default: all).
    #[arg(long, env = "SCAN2STRUCT_REGION_CONCURRENCY")]
    region_concurrency: Option<usize>,

    /// Max oracle output tokens.
    #[arg(long, env = "SCAN2STRUCT_MAX_TOKENS", default_value_t = 20_000)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "SCAN2STRUCT_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries on oracle transport failure.
    #[arg(long, env = "SCAN2STRUCT_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Path to a text file replacing the built-in extraction prompt.
    #[arg(long, env = "SCAN2STRUCT_PROMPT")]
    prompt: Option<PathBuf>,

    /// Choices expected per item (0 disables the check).
    #[arg(long, env = "SCAN2STRUCT_EXPECTED_CHOICES", default_value_t = 5)]
    expected_choices: usize,

    /// Include error detail in error envelopes.
    #[arg(long, env = "SCAN2STRUCT_EXPOSE_ERRORS")]
    expose_errors: bool,

    /// HTTP timeout for URL inputs and blob uploads, in seconds.
    #[arg(long, env = "SCAN2STRUCT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Disable progress bar.
    #[arg(long, env = "SCAN2STRUCT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SCAN2STRUCT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except the envelope and errors.
    #[arg(short, long, env = "SCAN2STRUCT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let document_type: DocumentType = cli
        .document_type
        .parse()
        .context("Invalid --document-type")?;
    let config = build_config(&cli).await?;
    let expose = config.expose_error_detail;

    std::fs::create_dir_all(&cli.store_dir)
        .with_context(|| format!("Failed to create {:?}", cli.store_dir))?;
    let mut builder = Pipeline::builder(config)
        .blob_store(build_blob_store(&cli)?)
        .relational_store(Arc::new(
            SqliteRecordStore::open(&cli.store_dir.join("records.db"))
                .context("Failed to open SQLite record store")?,
        ))
        .document_store(Arc::new(JsonDocumentStore::new(
            cli.store_dir.join("documents"),
        )));
    if show_progress {
        builder = builder.observer(CliObserver::new());
    }
    let pipeline = builder.build().context("Failed to build pipeline")?;

    let result = pipeline.process_input(&cli.input, document_type).await;
    let response = Response::from_result(result, expose);

    let json = serde_json::to_string_pretty(&response.body).context("Failed to serialise envelope")?;
    match cli.output {
        Some(ref path) => {
            write_atomic(path, &json).await?;
            if !cli.quiet {
                eprintln!("{} envelope written to {}", cyan("◆"), path.display());
            }
        }
        None => println!("{json}"),
    }

    if !cli.quiet {
        let mark = if response.is_success() { green("✔") } else { red("✘") };
        eprintln!("{} HTTP {}", mark, response.status);
    }
    if !response.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .max_rendered_pixels(cli.max_pixels)
        .crop_padding(cli.crop_padding)
        .key_prefix(cli.key_prefix.clone())
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .expected_choice_count(cli.expected_choices)
        .expose_error_detail(cli.expose_errors)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref dir) = cli.work_dir {
        builder = builder.work_dir(dir);
    }
    if let Some(n) = cli.region_concurrency {
        builder = builder.region_concurrency(n);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref path) = cli.prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}

fn build_blob_store(cli: &Cli) -> Result<Arc<dyn BlobStore>> {
    if let Some(ref endpoint) = cli.blob_endpoint {
        let mut store = HttpBlobStore::new(endpoint.clone(), cli.download_timeout)
            .context("Failed to create HTTP blob store")?;
        if let Some(ref base) = cli.asset_base_url {
            store = store.with_public_base_url(base.clone());
        }
        if let Some(ref token) = cli.blob_token {
            store = store.with_bearer_token(token.clone());
        }
        return Ok(Arc::new(store));
    }

    let root = cli.store_dir.join("assets");
    let base_url = match cli.asset_base_url {
        Some(ref url) => url.clone(),
        None => file_url(&root)?,
    };
    Ok(Arc::new(FsBlobStore::new(root, base_url)))
}

fn file_url(dir: &Path) -> Result<String> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    let abs = dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve {:?}", dir))?;
    Ok(format!("file://{}", abs.display()))
}

/// Atomic write: write to temp, then rename.
async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .with_context(|| format!("Failed to write {:?}", tmp_path))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to rename into {:?}", path))?;
    Ok(())
}
