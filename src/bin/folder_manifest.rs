//! Build a folder manifest from files and directories.
//!
//! Standalone front end to [`ead_pdf_harvest::ManifestBuilder`], the same
//! code the `manifest` stage runs for each item.

use anyhow::{Context, Result};
use clap::Parser;
use ead_pdf_harvest::manifest::DEFAULT_URN_PREFIX;
use ead_pdf_harvest::ManifestBuilder;
use std::io;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "folder-manifest",
    version,
    about = "Describe a folder's PDF, TIFF and JP2 files in one XML manifest",
    arg_required_else_help = true
)]
struct Cli {
    /// Where to write the manifest.
    #[arg(short, long)]
    output: PathBuf,

    /// A file, or a directory whose files are all included. Repeatable.
    #[arg(short, long = "input", required = true, num_args = 1)]
    inputs: Vec<PathBuf>,

    /// Object identifier, e.g. `MC216/c0003`. Every input path must contain it.
    #[arg(long)]
    objid: String,

    /// Identifier of the package document the manifest will become.
    #[arg(long)]
    docid: String,

    #[arg(long, default_value = DEFAULT_URN_PREFIX)]
    urn_prefix: String,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let doc = ManifestBuilder::new(&cli.objid, &cli.docid)
        .urn_prefix(&cli.urn_prefix)
        .build(cli.inputs.as_slice())
        .context("Failed to describe inputs")?;
    doc.write_to(&cli.output)
        .with_context(|| format!("Failed to write {}", cli.output.display()))?;

    info!(
        representations = doc.representation_count(),
        "Wrote {}",
        cli.output.display()
    );
    Ok(())
}
