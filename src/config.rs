//! TOML configuration for the CLI.
//!
//! Validation is fatal at startup: threshold ordering and credentials for
//! every requested source are checked before any row is touched.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::processor::SourceSelection;
use crate::runner::RunOptions;
use crate::scoring::MatchThresholds;
use crate::sheet::ColumnMap;

// ============================================================================
// Row range
// ============================================================================

/// Which rows to process: `"all"` (row 2 to the end, skipping the header),
/// `"7"` (one row), `"5-40"`, or `"5-end"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub start: usize,
    pub end: Option<usize>,
}

impl Default for RowRange {
    fn default() -> Self {
        RowRange { start: 2, end: None }
    }
}

impl FromStr for RowRange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(RowRange::default());
        }
        let parse_row = |part: &str| -> Result<usize> {
            let row: usize = part
                .trim()
                .parse()
                .with_context(|| format!("invalid row number {part:?}"))?;
            if row == 0 {
                bail!("row numbers are 1-based, got 0");
            }
            Ok(row)
        };
        match s.split_once('-') {
            None => {
                let row = parse_row(s)?;
                Ok(RowRange { start: row, end: Some(row) })
            }
            Some((start, end)) => {
                let start = parse_row(start)?;
                let end = if end.trim().eq_ignore_ascii_case("end") {
                    None
                } else {
                    let end = parse_row(end)?;
                    if end < start {
                        bail!("row range end {end} is before start {start}");
                    }
                    Some(end)
                };
                Ok(RowRange { start, end })
            }
        }
    }
}

impl<'de> Deserialize<'de> for RowRange {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Config sections
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct Config {
    pub sheet: SheetConfig,
    #[serde(default)]
    pub columns: ColumnMap,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub spotify: Option<SpotifyConfig>,
    #[serde(default)]
    pub youtube: Option<YoutubeConfig>,
    #[serde(default)]
    pub llm: Option<LlmConfig>,
}

#[derive(Debug, Deserialize)]
pub struct SheetConfig {
    /// Path to the local sheet database.
    pub path: PathBuf,
    #[serde(default = "default_progress_file")]
    pub progress_file: PathBuf,
}

fn default_progress_file() -> PathBuf {
    PathBuf::from("music-linker-progress.json")
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub rows: RowRange,
    /// Any subset of {"spotify", "youtube"}.
    pub sources: Vec<String>,
    pub resume: bool,
    pub exact_threshold: u32,
    pub high_threshold: u32,
    pub delay_ms: u64,
    pub jitter_ms: u64,
    pub commit_every: usize,
    pub write_attempts: u32,
    /// Write end-of-run counters as JSON here, when set.
    pub stats_file: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        let options = RunOptions::default();
        let thresholds = MatchThresholds::default();
        RunConfig {
            rows: RowRange::default(),
            sources: vec!["spotify".to_string(), "youtube".to_string()],
            resume: options.resume,
            exact_threshold: thresholds.exact,
            high_threshold: thresholds.high,
            delay_ms: options.row_delay.as_millis() as u64,
            jitter_ms: options.row_jitter.as_millis() as u64,
            commit_every: options.commit_every,
            write_attempts: options.write_attempts,
            stats_file: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
pub struct YoutubeConfig {
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
}

// ============================================================================
// Loading and validation
// ============================================================================

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.thresholds().validate()?;
        if self.run.sources.is_empty() {
            bail!("at least one source must be requested");
        }
        for source in &self.run.sources {
            match source.as_str() {
                "spotify" => {
                    if self.spotify.is_none() {
                        bail!("spotify requested but [spotify] credentials are missing");
                    }
                }
                "youtube" => {
                    if self.youtube.is_none() {
                        bail!("youtube requested but [youtube] credentials are missing");
                    }
                }
                other => bail!("unknown source {other:?} (expected \"spotify\" or \"youtube\")"),
            }
        }
        Ok(())
    }

    pub fn thresholds(&self) -> MatchThresholds {
        MatchThresholds {
            exact: self.run.exact_threshold,
            high: self.run.high_threshold,
        }
    }

    pub fn selection(&self) -> SourceSelection {
        SourceSelection {
            primary: self.run.sources.iter().any(|s| s == "spotify"),
            secondary: self.run.sources.iter().any(|s| s == "youtube"),
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            start_row: self.run.rows.start,
            end_row: self.run.rows.end,
            resume: self.run.resume,
            selection: self.selection(),
            thresholds: self.thresholds(),
            row_delay: Duration::from_millis(self.run.delay_ms),
            row_jitter: Duration::from_millis(self.run.jitter_ms),
            commit_every: self.run.commit_every,
            write_attempts: self.run.write_attempts,
            write_backoff: RunOptions::default().write_backoff,
        }
    }
}
