//! Run-progress persistence and progress-bar utilities.
//!
//! `ProgressFile` persists the last fully processed row so an interrupted run
//! (quota, error, user stop) resumes where it left off. The bar helpers give
//! consistent styling, with a log-only mode that hides bars for
//! tail-friendly output.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::warn;
use serde::{Deserialize, Serialize};

// ============================================================================
// Run progress
// ============================================================================

/// Persisted resume state for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    /// 1-based row index of the last row fully processed and staged.
    pub last_processed_row: usize,
    /// Unix timestamp of the last save, informational only.
    pub updated_at: Option<u64>,
}

impl RunProgress {
    pub fn at_row(row: usize) -> Self {
        RunProgress {
            last_processed_row: row,
            updated_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .ok()
                .map(|d| d.as_secs()),
        }
    }
}

/// JSON file holding a [`RunProgress`]. A corrupt or missing file reads as
/// "no progress" rather than failing the run.
pub struct ProgressFile {
    path: PathBuf,
}

impl ProgressFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ProgressFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Option<RunProgress> {
        let contents = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(progress) => Some(progress),
            Err(err) => {
                warn!(
                    "ignoring corrupt progress file {}: {err}",
                    self.path.display()
                );
                None
            }
        }
    }

    pub fn save(&self, progress: &RunProgress) -> Result<()> {
        let json = serde_json::to_string_pretty(progress)?;
        fs::write(&self.path, json)
            .with_context(|| format!("failed to write progress file {}", self.path.display()))
    }

    /// Remove the file on clean completion. Missing file is fine.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!("failed to remove progress file {}", self.path.display())
            }),
        }
    }
}

// ============================================================================
// Progress bars
// ============================================================================

/// Global flag for log-only mode (set from args in main)
pub static LOG_ONLY: AtomicBool = AtomicBool::new(false);

pub fn set_log_only(value: bool) {
    LOG_ONLY.store(value, Ordering::Relaxed);
}

pub fn is_log_only() -> bool {
    LOG_ONLY.load(Ordering::Relaxed)
}

/// Create a progress bar with consistent styling.
/// In log-only mode, the progress bar is hidden.
pub fn create_progress_bar(len: u64, msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if is_log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, ETA: {eta})")
                .unwrap()
                .progress_chars("=> "),
        );
    }
    pb.set_message(msg.to_string());
    pb
}

/// Create a spinner for indeterminate progress.
/// In log-only mode, the spinner is hidden.
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if is_log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{msg} {spinner} [{elapsed_precise}]")
                .unwrap(),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
    }
    pb.set_message(msg.to_string());
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let file = ProgressFile::new(dir.path().join("progress.json"));
        assert_eq!(file.load(), None);

        let progress = RunProgress::at_row(42);
        file.save(&progress).unwrap();
        assert_eq!(file.load(), Some(progress));

        file.clear().unwrap();
        assert_eq!(file.load(), None);
        // clearing again is not an error
        file.clear().unwrap();
    }

    #[test]
    fn test_corrupt_progress_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        fs::write(&path, "{not json").unwrap();
        let file = ProgressFile::new(&path);
        assert_eq!(file.load(), None);
    }
}
