//! CLI driver for ead-pdf-harvest.
//!
//! A thin shim over the library crate: loads the YAML configuration, sets up
//! logging, runs the selected stages against one finding aid, and prints the
//! run summary.

use anyhow::{Context, Result};
use clap::Parser;
use ead_pdf_harvest::config::LoggingSettings;
use ead_pdf_harvest::{
    harvest, HarvestConfig, PipelineProgressCallback, ProgressCallback, RunOptions, RunSummary,
    Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One progress bar, reset at the start of every stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold:>15}  \
             [{bar:42.green/238}] {pos:>4}/{len} items  ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage, total_items: usize) {
        self.bar.reset();
        self.bar.set_length(total_items as u64);
        self.bar.set_prefix(stage.name());
        self.bar.set_message("");
    }

    fn on_item_done(&self, _stage: Stage, src_url: &str) {
        self.bar.set_message(dim(src_url));
        self.bar.inc(1);
    }

    fn on_item_skipped(&self, _stage: Stage, src_url: &str, reason: &str) {
        // Truncate very long reasons to keep output tidy.
        let reason = match reason.char_indices().nth(100) {
            Some((cut, _)) => format!("{}\u{2026}", &reason[..cut]),
            None => reason.to_string(),
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), src_url, dim(&reason)));
        self.bar.inc(1);
    }

    fn on_stage_complete(&self, stage: Stage, processed: usize, skipped: usize, failed: usize) {
        let mark = if failed == 0 { green("✔") } else { cyan("⚠") };
        self.bar.println(format!(
            "{mark} {:<15}  {} processed  {} skipped  {} failed",
            bold(stage.name()),
            processed,
            skipped,
            if failed == 0 {
                failed.to_string()
            } else {
                red(&failed.to_string())
            },
        ));
    }
}

const AFTER_HELP: &str = r#"STAGES (in order):
  harvest          scan the finding aid for PDF links and download each PDF
  extract          pdfimages: raw page bitmaps per PDF
  normalize        orient + convert: TIFF masters with bit depth, size and ICC profile
  compress         kdu_compress: JPEG 2000 deliverables
  manifest         folder manifest + XSLT: one package document per PDF
  finalize         move PDFs and TIFFs to their permanent roots
  update-document  rewrite each <dao> in the finding aid

EXAMPLES:
  # Full run
  pdf-harvest MC216.EAD.xml

  # Download and extract only
  pdf-harvest --stop-after extract MC216.EAD.xml

  # Re-run from compression using the saved checkpoint
  pdf-harvest --resume-from compress MC216.EAD.xml

  # Machine-readable summary
  pdf-harvest --json --no-progress MC216.EAD.xml > summary.json

ENVIRONMENT VARIABLES:
  RUST_LOG              Override the log filter (e.g. ead_pdf_harvest=debug)
  PDF_HARVEST_CONFIG    Path to the YAML configuration
"#;

#[derive(Parser, Debug)]
#[command(
    name = "pdf-harvest",
    version,
    about = "Harvest PDFs linked from an EAD finding aid into image packages",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// EAD finding aid to scan and update in place.
    ead: PathBuf,

    /// YAML configuration file.
    #[arg(short, long, env = "PDF_HARVEST_CONFIG", default_value = "etc/harvest.yaml")]
    config: PathBuf,

    /// First stage to run; later stages read the checkpoint.
    #[arg(long, value_parser = parse_stage, default_value = "harvest")]
    resume_from: Stage,

    /// Last stage to run.
    #[arg(long, value_parser = parse_stage, default_value = "update-document")]
    stop_after: Stage,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,

    /// Log errors only and print nothing else.
    #[arg(short, long)]
    quiet: bool,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Print the run summary as JSON on stdout.
    #[arg(long)]
    json: bool,
}

fn parse_stage(s: &str) -> Result<Stage, String> {
    s.parse()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = HarvestConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs on stderr when the progress bar is
    // active; the optional log file always gets them.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    let _guard = init_logging(filter, cli.verbose, &config.logging)
        .context("Failed to set up logging")?;

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };

    let options = RunOptions {
        resume_from: cli.resume_from,
        stop_after: cli.stop_after,
    };
    let summary = harvest(&cli.ead, config, &options, progress)
        .await
        .with_context(|| format!("Harvest of {} failed", cli.ead.display()))?;

    if cli.json {
        let json = serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?;
        println!("{json}");
    } else if !cli.quiet {
        print_summary(&summary, show_progress);
    }

    Ok(())
}

/// Stderr logging, plus a daily-rolling file when `logging.directory` is set.
///
/// The returned guard flushes the file writer on drop; keep it alive for
/// the whole run.
fn init_logging(
    stderr_filter: &str,
    verbose: bool,
    logging: &LoggingSettings,
) -> Result<Option<WorkerGuard>> {
    let stderr_layer = fmt::layer().with_writer(io::stderr).with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(stderr_filter)),
    );

    let Some(dir) = &logging.directory else {
        tracing_subscriber::registry().with(stderr_layer).init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, &logging.file_prefix);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_filter = if verbose { "debug" } else { "info" };
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(EnvFilter::new(file_filter));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(Some(guard))
}

fn print_summary(summary: &RunSummary, progress_shown: bool) {
    if summary.early_exit {
        eprintln!("{} No new PDFs found; nothing to do", cyan("◆"));
        return;
    }
    // The progress callback already printed one line per stage.
    if !progress_shown {
        for report in &summary.stages {
            eprintln!(
                "{:<15}  {} processed  {} skipped  {} failed",
                report.stage.name(),
                report.processed,
                report.skipped,
                report.failed
            );
        }
    }
    let failed = summary.total_failed();
    if failed == 0 {
        eprintln!("{} Run complete", green("✔"));
    } else {
        eprintln!(
            "{} Run complete with {} item failures (see log)",
            cyan("⚠"),
            red(&failed.to_string())
        );
    }
}
