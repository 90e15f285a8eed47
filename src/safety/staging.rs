//! Program staging for run-scoped artifacts
//!
//! Every execution gets its own file named by a fresh UUID, opened with
//! create-new semantics, so concurrent executions never share an artifact.
//! The artifact is removed when the [`StagedProgram`] guard is released or
//! dropped.

use crate::config::types::{Result, RunnerError};
use crate::observability::audit::events;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Directory where submitted programs are materialized for the interpreter
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
    extension: String,
}

impl StagingArea {
    /// Create the staging root if it does not exist yet.
    pub fn new(root: PathBuf, extension: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&root).map_err(|e| {
            RunnerError::Staging(format!(
                "Failed to create staging directory {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(Self {
            root,
            extension: extension.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Write `source` verbatim to a new, uniquely named artifact.
    pub fn stage(&self, source: &str) -> Result<StagedProgram> {
        let run_id = Uuid::new_v4().simple().to_string();
        let path = self.root.join(format!("{}.{}", run_id, self.extension));

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                RunnerError::Staging(format!(
                    "Failed to create staged program {}: {}",
                    path.display(),
                    e
                ))
            })?;

        // The guard exists before the write so a failed write still removes the file.
        let staged = StagedProgram {
            run_id,
            path,
            released: false,
        };

        file.write_all(source.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| {
                RunnerError::Staging(format!(
                    "Failed to write staged program {}: {}",
                    staged.path.display(),
                    e
                ))
            })?;

        Ok(staged)
    }

    /// Remove artifacts older than `max_age` left behind by a crashed runner.
    pub fn sweep_stale(&self, max_age: Duration) -> Result<usize> {
        let mut removed = 0;
        let now = SystemTime::now();

        let entries = fs::read_dir(&self.root).map_err(|e| {
            RunnerError::Staging(format!(
                "Failed to read staging directory {}: {}",
                self.root.display(),
                e
            ))
        })?;

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    log::warn!("Failed to read directory entry: {}", e);
                    continue;
                }
            };

            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(self.extension.as_str()) {
                continue;
            }

            let modified = match entry.metadata().and_then(|m| {
                if m.is_file() {
                    m.modified()
                } else {
                    Err(ErrorKind::InvalidInput.into())
                }
            }) {
                Ok(m) => m,
                Err(e) => {
                    log::debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            // Future timestamps count as fresh.
            let age = now.duration_since(modified).unwrap_or_default();
            if age < max_age {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    log::info!("Removed stale staged program: {}", path.display());
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => log::warn!("Failed to remove stale program {}: {}", path.display(), e),
            }
        }

        Ok(removed)
    }
}

/// A staged program on disk. Removed on [`StagedProgram::release`] or drop.
#[derive(Debug)]
pub struct StagedProgram {
    run_id: String,
    path: PathBuf,
    released: bool,
}

impl StagedProgram {
    /// Unique token naming this artifact; doubles as the run id in audit events
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the artifact. Idempotent; failures are logged, never returned.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Released staged program {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("Staged program {} already removed", self.path.display())
            }
            Err(e) => {
                log::warn!(
                    "Failed to remove staged program {}: {}",
                    self.path.display(),
                    e
                );
                events::cleanup_failure(&self.path, &e.to_string());
            }
        }
    }
}

impl Drop for StagedProgram {
    fn drop(&mut self) {
        self.release();
    }
}
