//! Exclusive run lock.
//!
//! Pipeline runs mutate the finding aid and the working roots in place, so
//! two runs against the same configuration must not overlap. The lock is a
//! file created with `create_new` under the temporary directory; it holds the
//! owning process id and is removed when the guard drops.
//!
//! A lock left behind by a run that died without dropping its guard is
//! recognised by its recorded process no longer existing, and is replaced.

use crate::error::HarvestError;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use sysinfo::{Pid, System};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Take the lock or fail fast if another run holds it.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, HarvestError> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| HarvestError::LockFailed {
                path: path.clone(),
                source,
            })?;
        }

        let mut file = match create(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let Some(pid) = stale_owner(&path) else {
                    return Err(HarvestError::LockHeld { path });
                };
                warn!("Removing stale {} left by process {pid}", path.display());
                std::fs::remove_file(&path).map_err(|source| HarvestError::LockFailed {
                    path: path.clone(),
                    source,
                })?;
                match create(&path) {
                    Ok(file) => file,
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                        return Err(HarvestError::LockHeld { path });
                    }
                    Err(source) => return Err(HarvestError::LockFailed { path, source }),
                }
            }
            Err(source) => return Err(HarvestError::LockFailed { path, source }),
        };
        if let Err(e) = writeln!(file, "{}", std::process::id()) {
            warn!("Could not record the owner of {}: {e}", path.display());
        }
        debug!("Acquired {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn create(path: &Path) -> std::io::Result<std::fs::File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// The recorded owner, if it is no longer running.
///
/// An unreadable or empty lock is treated as live: its owner may not have
/// written the pid yet.
fn stale_owner(path: &Path) -> Option<u32> {
    let pid: u32 = std::fs::read_to_string(path).ok()?.trim().parse().ok()?;
    let mut system = System::new();
    if system.refresh_process(Pid::from_u32(pid)) {
        None
    } else {
        Some(pid)
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Could not remove {}: {e}", self.path.display());
        }
    }
}
