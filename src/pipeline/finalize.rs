//! Stage 6: move the PDF and the master TIFFs from the working roots to the
//! final roots.
//!
//! Only items with every artifact in place are touched. The two moves are
//! independent and best effort: if the final PDF is already there the TIFFs
//! are still moved, and vice versa. An existing final artifact is never
//! replaced; the item keeps pointing at its working copy. Roots on different
//! file systems are crossed by copying, and only then is the source removed.

use crate::config::HarvestConfig;
use crate::error::ItemError;
use crate::item::WorkItem;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub(crate) async fn finalize(config: &HarvestConfig, item: &mut WorkItem) -> Result<(), ItemError> {
    item.require_fetched()?;
    let problems = item.missing_artifacts();
    if !problems.is_empty() {
        return Err(ItemError::MissingPrerequisite(problems.join("; ")));
    }

    let mut conflict: Option<PathBuf> = None;

    if let Some(pdf) = item.pdf_path.clone() {
        let target = item.path_under(&config.directories.pdfs_final_root, Some("pdf"));
        match relocate(&pdf, &target).await? {
            Relocation::Moved | Relocation::AlreadyThere => item.pdf_path = Some(target),
            Relocation::TargetExists => conflict = conflict.or(Some(target)),
        }
    }

    if let Some(tiffs) = item.tiffs_dir.clone() {
        let target = item.path_under(&config.directories.tiffs_final_root, None);
        match relocate(&tiffs, &target).await? {
            Relocation::Moved | Relocation::AlreadyThere => item.tiffs_dir = Some(target),
            Relocation::TargetExists => conflict = conflict.or(Some(target)),
        }
    }

    match conflict {
        Some(path) => Err(ItemError::OutputExists { path }),
        None => Ok(()),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Relocation {
    Moved,
    AlreadyThere,
    TargetExists,
}

async fn relocate(from: &Path, to: &Path) -> Result<Relocation, ItemError> {
    if from == to {
        return Ok(Relocation::AlreadyThere);
    }
    if to.exists() {
        error!("{} exists, will not replace it with {}", to.display(), from.display());
        return Ok(Relocation::TargetExists);
    }
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ItemError::io(parent, e))?;
    }

    match tokio::fs::rename(from, to).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!("{} is on another file system; copying instead", to.display());
            let (src, dst) = (from.to_path_buf(), to.to_path_buf());
            tokio::task::spawn_blocking(move || copy_then_remove(&src, &dst))
                .await
                .map_err(|e| ItemError::TaskFailed(format!("copy task panicked: {e}")))?
                .map_err(|e| ItemError::io(from, e))?;
        }
        Err(e) => return Err(ItemError::io(from, e)),
    }
    info!("Moved {} to {}", from.display(), to.display());
    Ok(Relocation::Moved)
}

/// Copy `from` to `to`, then delete `from`.
///
/// Only regular files and directories are copied; anything else fails the
/// move. On failure the partial copy is removed and `from` is untouched.
fn copy_then_remove(from: &Path, to: &Path) -> io::Result<()> {
    if to.symlink_metadata().is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", to.display()),
        ));
    }
    let is_dir = std::fs::symlink_metadata(from)?.is_dir();
    if let Err(e) = copy_tree(from, to) {
        let cleanup = if is_dir {
            std::fs::remove_dir_all(to)
        } else {
            std::fs::remove_file(to)
        };
        match cleanup {
            Err(c) if c.kind() != io::ErrorKind::NotFound => {
                warn!("Could not remove partial copy {}: {c}", to.display());
            }
            _ => {}
        }
        return Err(e);
    }
    if is_dir {
        std::fs::remove_dir_all(from)
    } else {
        std::fs::remove_file(from)
    }
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    let file_type = std::fs::symlink_metadata(from)?.file_type();
    if file_type.is_file() {
        std::fs::copy(from, to)?;
        return Ok(());
    }
    if !file_type.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is neither a file nor a directory", from.display()),
        ));
    }
    std::fs::create_dir(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        copy_tree(&entry.path(), &to.join(entry.file_name()))?;
    }
    Ok(())
}
