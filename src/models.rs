//! Core data models for the linking pipeline.
//!
//! A `SongRecord` is one spreadsheet row read into memory; a
//! `SearchCandidate` is one hit from a search back end; a `RowUpdate` is the
//! set of cells a processed row wants written back.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::sheet::{CellUpdate, ColumnMap};

/// Sentinel written into output cells when a search came up empty.
pub const NOT_FOUND: &str = "Not Found";

/// True when a cell holds a real value: non-empty and not the sentinel.
pub fn is_filled(cell: &str) -> bool {
    let trimmed = cell.trim();
    !trimmed.is_empty() && trimmed != NOT_FOUND
}

// ============================================================================
// Sources
// ============================================================================

/// Which external catalog a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Spotify,
    Youtube,
    YoutubeMusic,
    TabSite,
    GuitarSite,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Spotify => "spotify",
            SourceKind::Youtube => "youtube",
            SourceKind::YoutubeMusic => "youtube_music",
            SourceKind::TabSite => "tab_site",
            SourceKind::GuitarSite => "guitar_site",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Sheet rows
// ============================================================================

/// One spreadsheet row. Identity is the 1-based row position for the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SongRecord {
    pub row: usize,
    pub artist: String,
    pub title: String,
    pub primary_link: String,
    pub secondary_link: String,
    pub thumbnail: String,
    pub alternate_link: String,
    pub version_tag: String,
    pub notes: String,
}

impl SongRecord {
    /// Build a record from raw sheet cells. Missing cells read as empty,
    /// matching the spreadsheet-store contract.
    pub fn from_cells(row: usize, cells: &[String], columns: &ColumnMap) -> Self {
        let cell = |idx: usize| cells.get(idx).map(|s| s.trim().to_string()).unwrap_or_default();
        SongRecord {
            row,
            artist: cell(columns.artist),
            title: cell(columns.title),
            primary_link: cell(columns.primary_link),
            secondary_link: cell(columns.secondary_link),
            thumbnail: cell(columns.thumbnail),
            alternate_link: cell(columns.alternate_link),
            version_tag: cell(columns.version_tag),
            notes: cell(columns.notes),
        }
    }

    /// A row needs both artist and title to be worth searching for.
    pub fn is_processable(&self) -> bool {
        !self.artist.is_empty() && !self.title.is_empty()
    }

    pub fn append_note(&mut self, note: &str) {
        if self.notes.is_empty() {
            self.notes = note.to_string();
        } else {
            self.notes.push_str("; ");
            self.notes.push_str(note);
        }
    }
}

// ============================================================================
// Search candidates
// ============================================================================

/// One result from a source adapter. Ephemeral: only the URL and derived
/// fields are ever copied into a `SongRecord`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCandidate {
    pub url: String,
    pub found_artist: String,
    pub found_title: String,
    pub thumbnail: Option<String>,
    pub source: SourceKind,
}

// ============================================================================
// Row updates
// ============================================================================

/// Output cells a row processor can stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    PrimaryLink,
    SecondaryLink,
    Thumbnail,
    AlternateLink,
    VersionTag,
    Notes,
}

impl Field {
    pub fn column(self, columns: &ColumnMap) -> usize {
        match self {
            Field::PrimaryLink => columns.primary_link,
            Field::SecondaryLink => columns.secondary_link,
            Field::Thumbnail => columns.thumbnail,
            Field::AlternateLink => columns.alternate_link,
            Field::VersionTag => columns.version_tag,
            Field::Notes => columns.notes,
        }
    }
}

/// The cells that actually changed for one row versus its snapshot.
/// The processor stages values here; it never touches the sheet itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowUpdate {
    pub row: usize,
    changes: Vec<(Field, String)>,
}

impl RowUpdate {
    pub fn new(row: usize) -> Self {
        RowUpdate { row, changes: Vec::new() }
    }

    /// Stage a value, replacing any earlier value for the same field.
    pub fn set(&mut self, field: Field, value: String) {
        if let Some(entry) = self.changes.iter_mut().find(|(f, _)| *f == field) {
            entry.1 = value;
        } else {
            self.changes.push((field, value));
        }
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.changes
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn changes(&self) -> &[(Field, String)] {
        &self.changes
    }

    pub fn into_cell_updates(self, columns: &ColumnMap) -> Vec<CellUpdate> {
        let row = self.row;
        self.changes
            .into_iter()
            .map(|(field, value)| CellUpdate {
                row,
                col: field.column(columns),
                value,
            })
            .collect()
    }
}

// ============================================================================
// Version tags
// ============================================================================

/// Which rendition of a song a found link represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionTag {
    Original,
    Live,
    Remix,
    Acoustic,
    Cover,
    Instrumental,
    Remastered,
}

static LIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(live|unplugged|concert)\b").unwrap());
static REMIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bremix(ed)?\b").unwrap());
static ACOUSTIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bacoustic\b").unwrap());
static COVER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(cover|tribute)\b").unwrap());
static INSTRUMENTAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(instrumental|karaoke)\b").unwrap());
static REMASTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bremaster(ed)?\b").unwrap());

impl VersionTag {
    pub fn as_str(self) -> &'static str {
        match self {
            VersionTag::Original => "Original",
            VersionTag::Live => "Live",
            VersionTag::Remix => "Remix",
            VersionTag::Acoustic => "Acoustic",
            VersionTag::Cover => "Cover",
            VersionTag::Instrumental => "Instrumental",
            VersionTag::Remastered => "Remastered",
        }
    }

    pub fn parse(text: &str) -> Option<VersionTag> {
        match text.trim().to_lowercase().as_str() {
            "original" => Some(VersionTag::Original),
            "live" => Some(VersionTag::Live),
            "remix" => Some(VersionTag::Remix),
            "acoustic" => Some(VersionTag::Acoustic),
            "cover" => Some(VersionTag::Cover),
            "instrumental" => Some(VersionTag::Instrumental),
            "remastered" | "remaster" => Some(VersionTag::Remastered),
            _ => None,
        }
    }
}

impl std::fmt::Display for VersionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify which rendition a candidate title describes.
/// First marker wins; a title with no markers is the original recording.
pub fn detect_version(text: &str) -> VersionTag {
    if LIVE_RE.is_match(text) {
        VersionTag::Live
    } else if REMIX_RE.is_match(text) {
        VersionTag::Remix
    } else if ACOUSTIC_RE.is_match(text) {
        VersionTag::Acoustic
    } else if COVER_RE.is_match(text) {
        VersionTag::Cover
    } else if INSTRUMENTAL_RE.is_match(text) {
        VersionTag::Instrumental
    } else if REMASTER_RE.is_match(text) {
        VersionTag::Remastered
    } else {
        VersionTag::Original
    }
}

// ============================================================================
// Run statistics
// ============================================================================

/// Per-run counters, logged at the end of a run and optionally written to a
/// JSON file for later comparison between runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub rows_seen: usize,
    pub rows_processed: usize,
    pub rows_skipped: usize,
    pub searches_issued: usize,
    pub exact_matches: usize,
    pub high_probability_matches: usize,
    pub no_matches: usize,
    pub cells_staged: usize,
    pub cells_committed: usize,
    pub commits: usize,
    pub quota_hits: usize,
    pub elapsed_seconds: f64,
}

impl RunStats {
    pub fn log_summary(&self) {
        log::info!(
            "run summary: {} rows seen, {} processed, {} skipped, {} searches, \
             {} exact / {} high-probability / {} none, {} cells committed in {} batches, \
             {} quota hits, {:.1}s",
            self.rows_seen,
            self.rows_processed,
            self.rows_skipped,
            self.searches_issued,
            self.exact_matches,
            self.high_probability_matches,
            self.no_matches,
            self.cells_committed,
            self.commits,
            self.quota_hits,
            self.elapsed_seconds,
        );
    }

    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
