//! CLI binary for edgequake-doc2md.
//!
//! `doc2md` (or `doc2md serve`) starts the web UI; `doc2md convert` runs the
//! same pipeline over local files.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_doc2md::server::{self, AppState};
use edgequake_doc2md::{
    convert_paths, write_atomic, BatchProgressCallback, BatchReport, ConversionConfig,
    FileSeparator, ProgressCallback, ServerConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar over the batch plus a log line per file. The bar grows when an
/// archive is expanded.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

fn truncate(msg: &str, max: usize) -> String {
    if msg.chars().count() > max {
        let head: String = msg.chars().take(max - 1).collect();
        format!("{head}\u{2026}")
    } else {
        msg.to_string()
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        self.bar.set_length(total_files as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting {total_files} file(s)…"))
        ));
    }

    fn on_file_start(&self, _index: usize, total: usize, name: &str) {
        self.bar.set_length(total as u64);
        self.bar.set_message(truncate(name, 40));
    }

    fn on_file_complete(&self, _index: usize, _total: usize, name: &str, markdown_len: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            name,
            dim(&format!("{markdown_len} chars"))
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, _index: usize, total: usize, name: &str, error: &str) {
        self.bar.set_length(total as u64);
        self.bar
            .println(format!("  {} {}  {}", red("✗"), name, red(&truncate(error, 80))));
        self.bar.inc(1);
    }

    fn on_file_skipped(&self, _index: usize, total: usize, name: &str, reason: &str) {
        self.bar.set_length(total as u64);
        self.bar.println(format!(
            "  {} {}  {}",
            yellow("–"),
            name,
            dim(&truncate(reason, 80))
        ));
        self.bar.inc(1);
    }

    fn on_archive_expanded(&self, archive: &str, members: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            cyan("▸"),
            archive,
            dim(&format!("{members} member(s)"))
        ));
    }

    fn on_batch_complete(&self, total: usize, succeeded: usize) {
        self.bar.finish_and_clear();
        let failed = total.saturating_sub(succeeded);
        if failed == 0 {
            eprintln!("{} {} file(s) converted", green("✔"), bold(&succeeded.to_string()));
        } else {
            eprintln!(
                "{} {}/{} file(s) converted  ({} not converted)",
                if succeeded == 0 { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Start the web UI on http://127.0.0.1:8501
  doc2md

  # Listen on all interfaces, 50 MB upload limit
  doc2md serve --host 0.0.0.0 --max-upload-mb 50

  # Convert files and print one combined document
  doc2md convert report.pdf slides.pptx data.xlsx

  # One .md per input, plus a combined file
  doc2md convert docs.zip -o out/ --combined out/all.md

  # Describe images with a specific key and model
  doc2md convert --api-key sk-... --model gpt-4o-mini photo.png

SUPPORTED FILES:
  PDF, DOCX, PPTX, XLSX/XLS/XLSM/XLSB/ODS, CSV, JSON, XML, HTML, TXT/MD,
  PNG/JPEG/GIF/WEBP/BMP/TIFF and ZIP archives of these.
  Legacy .doc and .ppt are rejected; save them as .docx / .pptx.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          Server-side key used when no session key is given
  EDGEQUAKE_LLM_PROVIDER  Vision provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Model for EDGEQUAKE_LLM_PROVIDER
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  RUST_LOG                Log filter, e.g. edgequake_doc2md=debug
"#;

/// Convert documents to Markdown, with optional AI image descriptions.
#[derive(Parser, Debug)]
#[command(
    name = "doc2md",
    version,
    about = "Convert documents to Markdown, with optional AI image descriptions",
    args_conflicts_with_subcommands = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Server options when no subcommand is given.
    #[command(flatten)]
    serve: ServeArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOC2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOC2MD_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the web UI (the default).
    Serve(ServeArgs),
    /// Convert local files without starting a server.
    Convert(ConvertArgs),
}

/// Options shared by both modes.
#[derive(Args, Debug, Clone)]
struct ConversionArgs {
    /// Per-file size limit in MB.
    #[arg(long, env = "DOC2MD_MAX_UPLOAD_MB", default_value_t = 200)]
    max_upload_mb: u64,

    /// Vision model ID (default: gpt-4o).
    #[arg(long, env = "DOC2MD_MODEL")]
    model: Option<String>,

    /// Vision provider for the server-side key: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "DOC2MD_PROVIDER")]
    provider: Option<String>,

    /// Per-image vision call timeout in seconds.
    #[arg(long, env = "DOC2MD_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Never pick up a vision key from the environment.
    #[arg(long, env = "DOC2MD_NO_ENV_KEY")]
    no_env_key: bool,

    /// Separator in the combined document: none, heading, hr, or custom string.
    #[arg(long, env = "DOC2MD_SEPARATOR", default_value = "heading")]
    separator: String,
}

#[derive(Args, Debug, Clone)]
struct ServeArgs {
    /// Interface to bind.
    #[arg(long, env = "DOC2MD_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on.
    #[arg(long, env = "DOC2MD_PORT", default_value_t = 8501)]
    port: u16,

    /// Idle sessions are dropped after this many seconds.
    #[arg(long, env = "DOC2MD_SESSION_TTL", default_value_t = 3600)]
    session_ttl: u64,

    #[command(flatten)]
    conversion: ConversionArgs,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Files or ZIP archives to convert.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Write one `.md` per converted file into this directory.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the combined document to this file.
    #[arg(long)]
    combined: Option<PathBuf>,

    /// Vision API key for this run (OpenAI-compatible).
    #[arg(long, env = "DOC2MD_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Print the batch report as JSON instead of Markdown.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOC2MD_NO_PROGRESS")]
    no_progress: bool,

    #[command(flatten)]
    conversion: ConversionArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let show_progress = match &cli.command {
        Some(Command::Convert(args)) => !cli.quiet && !args.no_progress && !args.json,
        _ => false,
    };

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar gives all the feedback that matters in convert mode.
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

    match cli.command {
        None => run_server(cli.serve).await,
        Some(Command::Serve(args)) => run_server(args).await,
        Some(Command::Convert(args)) => run_convert(args, show_progress, cli.quiet).await,
    }
}

/// Map shared flags to `ConversionConfig`.
fn build_config(
    args: &ConversionArgs,
    api_key: Option<&str>,
    progress: Option<ProgressCallback>,
) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .max_file_size(args.max_upload_mb.saturating_mul(1024 * 1024))
        .api_timeout_secs(args.api_timeout)
        .caption_from_env(!args.no_env_key)
        .file_separator(FileSeparator::parse(&args.separator));

    if let Some(ref model) = args.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
        builder = builder.api_key(key.trim());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn run_server(args: ServeArgs) -> Result<()> {
    let config = build_config(&args.conversion, None, None)?;
    let server_config = ServerConfig {
        host: args.host,
        port: args.port,
        session_ttl_secs: args.session_ttl,
    };
    let addr = server_config.bind_addr();
    server::serve(AppState::new(config, server_config))
        .await
        .with_context(|| format!("Server on {addr} failed"))
}

async fn run_convert(args: ConvertArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&args.conversion, args.api_key.as_deref(), progress)?;

    let report = convert_paths(&args.files, &config)
        .await
        .context("Conversion failed")?;

    if let Some(ref dir) = args.output {
        for r in report.successes() {
            let path = dir.join(&r.download_name);
            write_atomic(&path, &r.markdown)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
    }

    let combined = report.combined_markdown(&config.file_separator);
    if let Some(ref path) = args.combined {
        write_atomic(path, &combined)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    if args.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if args.output.is_none() && args.combined.is_none() {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(combined.as_bytes())
            .context("Failed to write to stdout")?;
        if !combined.is_empty() && !combined.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if !quiet && !args.json {
        print_summary(&report, show_progress);
    }

    if report.stats.total > 0 && report.stats.succeeded == 0 {
        anyhow::bail!("no file could be converted");
    }
    Ok(())
}

/// Problems per file, then one stats line when the bar didn't print its own.
fn print_summary(report: &BatchReport, bar_shown: bool) {
    for r in &report.results {
        if let Some(ref issue) = r.issue {
            eprintln!("  {} {}: {}", red("✗"), r.source_name, issue.message);
        }
        for w in &r.warnings {
            eprintln!("  {} {}: {}", yellow("⚠"), r.source_name, w.message);
        }
    }
    let s = &report.stats;
    if !bar_shown {
        eprintln!(
            "Converted {}/{} files in {}ms",
            s.succeeded, s.total, s.duration_ms
        );
    }
    if s.images_captioned > 0 || s.caption_failures > 0 {
        eprintln!(
            "   {} images described  /  {} caption failures",
            dim(&s.images_captioned.to_string()),
            dim(&s.caption_failures.to_string()),
        );
    }
}
