//! CLI binary for edgequake-ocr.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `OcrConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_ocr::{
    check_model, discover, process_batch, process_item, write_report, BatchInput,
    BatchProgressCallback, BatchReport, OcrConfig, OutputFormat, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

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
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

/// Shorten `s` to at most `max` characters, marking the cut with an ellipsis.
fn ellipsize(s: &str, max: usize) -> String {
    match s.char_indices().nth(max.saturating_sub(1)) {
        Some((idx, _)) if s.chars().count() > max => format!("{}\u{2026}", &s[..idx]),
        _ => s.to_string(),
    }
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per finished
/// file. Items may finish out of order when `--concurrency > 1`.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<PathBuf, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_batch_start` tells us how many files there are.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Scanning");
        bar.set_message("Looking for images…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("OCR");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, path: &Path) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(path))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.activate_bar(total);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total} file(s)…"))
        ));
    }

    fn on_item_start(&self, path: &Path, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(path.to_path_buf(), Instant::now());
        }
        self.bar.set_message(display_name(path));
    }

    fn on_item_complete(&self, path: &Path, _total: usize, text_len: usize) {
        let secs = self.elapsed_secs(path);
        self.bar.println(format!(
            "  {} {:<40}  {:<8}  {}",
            green("✓"),
            ellipsize(&path.display().to_string(), 40),
            dim(&format!("{text_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, path: &Path, _total: usize, error: &str) {
        let secs = self.elapsed_secs(path);
        self.errors.fetch_add(1, Ordering::SeqCst);

        self.bar.println(format!(
            "  {} {}  {}",
            red("✗"),
            red(&ellipsize(error, 100)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, successful: usize) {
        let failed = total.saturating_sub(successful);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} file(s) processed successfully",
                green("✔"),
                bold(&successful.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} file(s) processed  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&successful.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

/// Lenient format parsing: an unknown name selects the text template.
fn parse_format(s: &str) -> Result<OutputFormat, String> {
    Ok(OutputFormat::from_name(s))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One image, Markdown to stdout
  eqocr receipt.jpg

  # Plain text, no image clean-up
  eqocr --format text --no-preprocess photo.png

  # A whole folder tree, two requests in flight, report to a file
  eqocr -r -c 2 scans/ -o report.json

  # Force the extracted text into a given language
  eqocr --language "Simplified Chinese" menu.jpg

  # Is the model loaded?
  eqocr --check-model --model llava:7b

FORMATS:
  markdown (default)  headings, lists, emphasis, pipe tables
  text                plain text, original line breaks
  json                one JSON object, re-indented with two spaces
  structured          labelled sections, tables as rows
  key_value           one "key: value" pair per line

SUPPORTED INPUTS:
  .png .jpg .jpeg .tif .tiff .pdf (first page only)
  Directories are scanned for these extensions; files named explicitly are
  always attempted.

ENVIRONMENT VARIABLES:
  OLLAMA_HOST         Inference endpoint when --endpoint is not given
  PDFIUM_LIB_PATH     pdfium shared library (file or directory) for PDF inputs
  RUST_LOG            Overrides the log filter
  EQOCR_*             Every flag can be set as EQOCR_<FLAG>, e.g. EQOCR_MODEL

SETUP:
  1. Start the server:  ollama serve
  2. Pull a model:      ollama pull llama3.2-vision:11b
  3. Run:               eqocr scan.png
"#;

/// Extract text from images and PDFs with a local vision model.
#[derive(Parser, Debug)]
#[command(
    name = "eqocr",
    version,
    about = "Extract text from images and PDFs with a local vision model",
    long_about = "Send images (PNG, JPEG, TIFF) and the first page of PDFs to an \
Ollama-compatible vision model and print the extracted text as Markdown, plain text, \
JSON, labelled sections or key-value pairs. Images are cleaned up (grayscale, CLAHE, \
non-local-means denoising) before they are sent.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Files or directories to process.
    #[arg(required_unless_present = "check_model")]
    inputs: Vec<PathBuf>,

    /// Output format: markdown, text, json, structured, key_value.
    /// Unrecognised names fall back to text.
    #[arg(
        short,
        long,
        env = "EQOCR_FORMAT",
        default_value = "markdown",
        value_parser = parse_format
    )]
    format: OutputFormat,

    /// Vision model name.
    #[arg(long, env = "EQOCR_MODEL", default_value = edgequake_ocr::DEFAULT_MODEL)]
    model: String,

    /// Inference endpoint (defaults to OLLAMA_HOST, then http://localhost:11434).
    #[arg(long, env = "EQOCR_ENDPOINT")]
    endpoint: Option<String>,

    /// Number of files processed at once.
    #[arg(short, long, env = "EQOCR_CONCURRENCY", default_value_t = 1,
          value_parser = clap::value_parser!(u64).range(1..))]
    concurrency: u64,

    /// Descend into subdirectories.
    #[arg(short, long, env = "EQOCR_RECURSIVE")]
    recursive: bool,

    /// Send images as decoded, without grayscale/CLAHE/denoise.
    #[arg(long, env = "EQOCR_NO_PREPROCESS")]
    no_preprocess: bool,

    /// Retries per file when the endpoint fails.
    #[arg(long, env = "EQOCR_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Per-request timeout in seconds.
    #[arg(long, env = "EQOCR_TIMEOUT",
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Language the model should write the text in.
    #[arg(long, env = "EQOCR_LANGUAGE")]
    language: Option<String>,

    /// Text file whose contents replace the format's prompt.
    #[arg(long, env = "EQOCR_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Write the text (single file) or the JSON report (batch) here.
    #[arg(short, long, env = "EQOCR_OUTPUT")]
    output: Option<PathBuf>,

    /// Print the batch report as JSON.
    #[arg(long, env = "EQOCR_JSON")]
    json: bool,

    /// Only check whether the model is loaded on the endpoint.
    #[arg(long)]
    check_model: bool,

    /// Disable progress bar.
    #[arg(long, env = "EQOCR_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "EQOCR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "EQOCR_QUIET")]
    quiet: bool,
}

impl Cli {
    /// A lone path that is not a directory gets single-file output.
    fn single_file(&self) -> Option<&Path> {
        match self.inputs.as_slice() {
            [only] if !only.is_dir() => Some(only),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Keep library INFO logs quiet while the progress bar is drawing.
    let show_progress =
        !cli.quiet && !cli.no_progress && !cli.json && !cli.check_model && cli.single_file().is_none();
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

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Model check ──────────────────────────────────────────────────────
    if cli.check_model {
        let loaded = check_model(&config)
            .await
            .context("Model check failed")?;
        if loaded {
            println!("{} model '{}' is loaded", green("✔"), config.model);
            return Ok(ExitCode::SUCCESS);
        }
        println!(
            "{} model '{}' is not loaded at {}",
            red("✘"),
            config.model,
            config.resolved_endpoint()
        );
        return Ok(ExitCode::FAILURE);
    }

    // ── Single file ──────────────────────────────────────────────────────
    if let Some(path) = cli.single_file() {
        return match process_item(path, &config).await {
            Ok(text) => {
                emit_text(&cli, &text).await?;
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                eprintln!("{} {}", red("✘"), e);
                Ok(ExitCode::FAILURE)
            }
        };
    }

    // ── Batch ────────────────────────────────────────────────────────────
    let input = expand_inputs(&cli.inputs, cli.recursive);
    let report = process_batch(input, &config)
        .await
        .context("Batch failed")?;

    if let Some(ref output_path) = cli.output {
        write_report(&report, output_path)
            .await
            .context("Failed to write report")?;
        if !cli.quiet {
            eprintln!("   report  →  {}", bold(&output_path.display().to_string()));
        }
    } else if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else {
        print_report(&report)?;
    }

    if !cli.quiet && !show_progress {
        eprintln!(
            "Processed {}/{} file(s), {} failed",
            report.statistics.successful, report.statistics.total, report.statistics.failed
        );
    }

    Ok(if report.statistics.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Map CLI args to `OcrConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<OcrConfig> {
    let mut builder = OcrConfig::builder()
        .model(cli.model.clone())
        .format(cli.format)
        .concurrency(usize::try_from(cli.concurrency).unwrap_or(usize::MAX))
        .recursive(cli.recursive)
        .preprocess(!cli.no_preprocess)
        .max_retries(cli.max_retries);

    if let Some(ref endpoint) = cli.endpoint {
        builder = builder.endpoint(endpoint.clone());
    }
    if let Some(secs) = cli.timeout {
        builder = builder.request_timeout_secs(secs);
    }
    if let Some(ref language) = cli.language {
        builder = builder.language(language.clone());
    }
    if let Some(ref path) = cli.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.custom_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Directories expand to their supported files; files are kept as given.
fn expand_inputs(inputs: &[PathBuf], recursive: bool) -> BatchInput {
    let paths = inputs
        .iter()
        .flat_map(|p| {
            if p.is_dir() {
                discover(&BatchInput::Path(p.clone()), recursive)
            } else {
                vec![p.clone()]
            }
        })
        .collect::<Vec<_>>();
    BatchInput::List(paths)
}

async fn emit_text(cli: &Cli, text: &str) -> Result<()> {
    if let Some(ref output_path) = cli.output {
        tokio::fs::write(output_path, text)
            .await
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        if !cli.quiet {
            eprintln!("{}  →  {}", green("✔"), bold(&output_path.display().to_string()));
        }
        return Ok(());
    }

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(text.as_bytes())
        .context("Failed to write to stdout")?;
    if !text.ends_with('\n') {
        handle.write_all(b"\n").ok();
    }
    Ok(())
}

/// Human-readable report: texts to stdout, failures to stderr.
fn print_report(report: &BatchReport) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for (path, text) in &report.results {
        writeln!(handle, "==> {path} <==")
            .and_then(|_| writeln!(handle, "{}", text.trim_end()))
            .and_then(|_| writeln!(handle))
            .context("Failed to write to stdout")?;
    }
    for err in report.errors.values() {
        eprintln!("{} {}", red("✗"), err);
    }
    Ok(())
}
