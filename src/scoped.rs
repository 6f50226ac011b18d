//! Temporary working-directory changes.
//!
//! The working directory belongs to the whole process. Holding two guards at
//! once from different threads or tasks leaves the directory in whatever
//! state the last drop produced, so callers must not interleave them.

use std::env;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Switches the process into a directory and switches back on drop.
#[derive(Debug)]
#[must_use = "the previous working directory is restored when the guard is dropped"]
pub struct WorkingDirGuard {
    original: PathBuf,
}

impl WorkingDirGuard {
    pub fn enter(target: &Path) -> io::Result<Self> {
        let original = env::current_dir()?;
        env::set_current_dir(target)?;
        debug!(from = %original.display(), to = %target.display(), "Entered directory");
        Ok(Self { original })
    }

    pub fn original(&self) -> &Path {
        &self.original
    }
}

impl Drop for WorkingDirGuard {
    fn drop(&mut self) {
        if let Err(e) = env::set_current_dir(&self.original) {
            warn!(
                original = %self.original.display(),
                error = %e,
                "Failed to restore working directory"
            );
        }
    }
}
