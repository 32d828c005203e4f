//! Advisory workspace lock

use crate::error::PipelineError;
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Lock file created in the workspace root for the duration of a run
pub const LOCK_FILE_NAME: &str = ".repoforge.lock";

/// Exclusive claim on a workspace root, released on drop
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
}

impl WorkspaceLock {
    /// Create the lock file, failing with `WorkspaceBusy` if it already exists.
    ///
    /// The workspace root is created when missing.
    pub fn acquire(root: &Path, run_id: Uuid) -> Result<Self, PipelineError> {
        fs::create_dir_all(root).map_err(|e| PipelineError::io(root, e))?;
        let path = root.join(LOCK_FILE_NAME);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path)
                    .map(|s| s.trim().replace('\n', ", "))
                    .unwrap_or_else(|_| "unknown holder".to_string());
                return Err(PipelineError::WorkspaceBusy {
                    root: root.to_path_buf(),
                    holder,
                });
            }
            Err(e) => return Err(PipelineError::io(&path, e)),
        };

        // Construct first so the file is removed even if the write fails
        let lock = Self { path };
        writeln!(
            file,
            "pid={}\nrun_id={}\nstarted_at={}",
            std::process::id(),
            run_id,
            Utc::now().to_rfc3339()
        )
        .map_err(|e| PipelineError::io(&lock.path, e))?;

        debug!("Acquired workspace lock {}", lock.path.display());
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Released workspace lock {}", self.path.display()),
            Err(e) => warn!(
                "Failed to remove workspace lock {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}
