//! Stage 2: pull the embedded page bitmaps out of each PDF.
//!
//! Output goes to `<bitmaps_root>/<object id>/x-NNN.{pbm,pgm,ppm,…}`. A
//! directory that already has content is treated as a manual-intervention
//! point: it is never cleaned automatically, and the item is skipped.

use crate::config::HarvestConfig;
use crate::error::ItemError;
use crate::item::{is_populated_dir, WorkItem};
use crate::process::{run_logged, Invocation, ProcessRunner};
use std::path::Path;
use tracing::debug;

/// `pdfimages <pdf> <dir>/x`
pub fn extraction_invocation(config: &HarvestConfig, pdf: &Path, out_dir: &Path) -> Invocation {
    Invocation::new(&config.utilities.pdfimages)
        .arg(pdf)
        .arg(out_dir.join("x"))
}

pub(crate) async fn extract(
    config: &HarvestConfig,
    runner: &dyn ProcessRunner,
    item: &mut WorkItem,
) -> Result<(), ItemError> {
    item.require_fetched()?;
    let pdf = match &item.pdf_path {
        Some(p) if p.is_file() => p.clone(),
        Some(p) => {
            return Err(ItemError::MissingPrerequisite(format!(
                "{} does not exist",
                p.display()
            )))
        }
        None => return Err(ItemError::MissingPrerequisite("pdf_path is unset".into())),
    };

    let out_dir = item.path_under(&config.directories.bitmaps_root, None);
    item.bitmaps_dir = Some(out_dir.clone());
    if !out_dir.exists() {
        tokio::fs::create_dir_all(&out_dir)
            .await
            .map_err(|e| ItemError::io(&out_dir, e))?;
        debug!("Made {}", out_dir.display());
    } else if is_populated_dir(&out_dir) {
        return Err(ItemError::DirectoryNotEmpty { path: out_dir });
    }

    run_logged(runner, &extraction_invocation(config, &pdf, &out_dir)).await
}
