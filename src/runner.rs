//! Batch Runner: walks the configured row range, invokes the Row Processor,
//! and commits staged updates in batches.
//!
//! Deliberately single-threaded and sequential: one row is fully resolved
//! before the next begins, so quota accounting stays a per-adapter flag and
//! the sheet is never read and written concurrently. One run at a time is
//! assumed; no locking exists or is needed.
//!
//! State machine per run:
//! `Idle -> Loading -> Processing -> {Committing, Paused, Aborted} -> Idle`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{error, info, warn};
use rand::Rng;

use crate::models::{RunStats, SongRecord};
use crate::processor::{RowProcessor, SourceSelection};
use crate::progress::{create_progress_bar, create_spinner, ProgressFile, RunProgress};
use crate::scoring::MatchThresholds;
use crate::sheet::{CellUpdate, ColumnMap, SheetStore};
use crate::source::CandidateSource;

// ============================================================================
// Options and reporting
// ============================================================================

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// First 1-based row of the range. Defaults to 2, skipping the header.
    pub start_row: usize,
    /// Last row inclusive; `None` means the end of the populated range.
    pub end_row: Option<usize>,
    /// Resume from saved progress when present.
    pub resume: bool,
    pub selection: SourceSelection,
    pub thresholds: MatchThresholds,
    /// Fixed sleep after each row that issued at least one search.
    pub row_delay: Duration,
    /// Random extra sleep on top of `row_delay`, up to this much.
    pub row_jitter: Duration,
    /// Commit the pending buffer every this many processed rows.
    pub commit_every: usize,
    /// Attempts per commit before the run aborts.
    pub write_attempts: u32,
    pub write_backoff: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            start_row: 2,
            end_row: None,
            resume: true,
            selection: SourceSelection::both(),
            thresholds: MatchThresholds::default(),
            row_delay: Duration::from_millis(500),
            row_jitter: Duration::from_millis(500),
            commit_every: 25,
            write_attempts: 3,
            write_backoff: Duration::from_millis(500),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTermination {
    /// The configured range was fully processed; progress was cleared.
    Completed,
    /// Every requested source latched quota; progress points at the last
    /// fully processed row.
    Paused,
    /// The stop flag was raised at a row boundary.
    Stopped,
    /// A commit kept failing; progress was rewound to the last committed row.
    Aborted(String),
}

#[derive(Debug)]
pub struct RunReport {
    pub termination: RunTermination,
    pub stats: RunStats,
}

// ============================================================================
// Runner
// ============================================================================

pub struct BatchRunner<'a, S: SheetStore> {
    sheet: &'a mut S,
    columns: ColumnMap,
    options: RunOptions,
    progress: ProgressFile,
    primary: Option<&'a mut dyn CandidateSource>,
    secondary: Option<&'a mut dyn CandidateSource>,
    stop: Arc<AtomicBool>,
}

impl<'a, S: SheetStore> BatchRunner<'a, S> {
    pub fn new(
        sheet: &'a mut S,
        columns: ColumnMap,
        options: RunOptions,
        progress: ProgressFile,
        primary: Option<&'a mut dyn CandidateSource>,
        secondary: Option<&'a mut dyn CandidateSource>,
    ) -> Self {
        BatchRunner {
            sheet,
            columns,
            options,
            progress,
            primary,
            secondary,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cooperative stop flag, honored at row boundaries only.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn run(&mut self) -> Result<RunReport> {
        let started = Instant::now();
        let mut stats = RunStats::default();

        // Loading
        let spinner = create_spinner("Loading sheet");
        let rows = self.sheet.read_all_rows()?;
        spinner.finish_and_clear();
        let mut start = self.options.start_row.max(1);
        if self.options.resume {
            if let Some(saved) = self.progress.load() {
                info!(
                    "resuming from {}: last processed row was {}, starting at {}",
                    self.progress.path().display(),
                    saved.last_processed_row,
                    saved.last_processed_row + 1
                );
                start = start.max(saved.last_processed_row + 1);
            }
        } else {
            self.progress.clear()?;
        }
        let end = self.options.end_row.unwrap_or(rows.len()).min(rows.len());

        if start > end {
            info!("nothing to do: range start {start} is past end {end}");
            self.progress.clear()?;
            stats.elapsed_seconds = started.elapsed().as_secs_f64();
            return Ok(RunReport { termination: RunTermination::Completed, stats });
        }

        let processor = RowProcessor::new(self.options.thresholds);
        let pb = create_progress_bar((end - start + 1) as u64, "Processing rows");

        // Processing
        let mut pending: Vec<CellUpdate> = Vec::new();
        let mut rows_since_commit = 0usize;
        let mut last_committed_row = start - 1;
        let mut termination = RunTermination::Completed;

        for row in start..=end {
            if self.stop.load(Ordering::Relaxed) {
                info!("stop requested, halting before row {row}");
                termination = RunTermination::Stopped;
                break;
            }

            stats.rows_seen += 1;
            let record = SongRecord::from_cells(row, &rows[row - 1], &self.columns);
            if !record.is_processable() {
                warn!("row {row}: missing artist or title, skipped");
                stats.rows_skipped += 1;
                self.progress.save(&RunProgress::at_row(row))?;
                pb.inc(1);
                continue;
            }

            // reborrow with a fresh trait-object lifetime; without the cast
            // the borrow would be pinned for the runner's whole lifetime
            let outcome = processor.process(
                &record,
                self.primary.as_deref_mut().map(|p| p as &mut dyn CandidateSource),
                self.secondary.as_deref_mut().map(|s| s as &mut dyn CandidateSource),
                self.options.selection,
            );
            stats.rows_processed += 1;
            stats.searches_issued += outcome.searches_issued;
            stats.exact_matches += outcome.exact_matches;
            stats.high_probability_matches += outcome.high_probability_matches;
            stats.no_matches += outcome.no_matches;
            if outcome.quota_hit {
                stats.quota_hits += 1;
            }

            if !outcome.update.is_empty() {
                stats.cells_staged += outcome.update.len();
                pending.extend(outcome.update.into_cell_updates(&self.columns));
            }
            self.progress.save(&RunProgress::at_row(row))?;
            pb.inc(1);
            rows_since_commit += 1;

            if rows_since_commit >= self.options.commit_every {
                match self.commit(&mut pending, &mut stats) {
                    Ok(()) => {
                        last_committed_row = row;
                        rows_since_commit = 0;
                    }
                    Err(err) => {
                        termination = self.abort(last_committed_row, err)?;
                        break;
                    }
                }
            }

            if outcome.searches_issued > 0 {
                self.rate_limit_sleep();
            }

            if self.all_requested_exhausted() {
                warn!("all requested sources have exhausted their quota, pausing at row {row}");
                termination = RunTermination::Paused;
                break;
            }
        }
        pb.finish_and_clear();

        // Committing: flush whatever the loop left pending
        if matches!(termination, RunTermination::Completed | RunTermination::Paused | RunTermination::Stopped)
            && !pending.is_empty()
        {
            if let Err(err) = self.commit(&mut pending, &mut stats) {
                termination = self.abort(last_committed_row, err)?;
            }
        }

        if termination == RunTermination::Completed {
            self.progress.clear()?;
        }

        stats.elapsed_seconds = started.elapsed().as_secs_f64();
        stats.log_summary();
        Ok(RunReport { termination, stats })
    }

    /// Flush the pending buffer as one batched write, retrying with backoff.
    fn commit(&mut self, pending: &mut Vec<CellUpdate>, stats: &mut RunStats) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.sheet.batch_write(pending) {
                Ok(()) => {
                    info!("committed {} cell(s)", pending.len());
                    stats.commits += 1;
                    stats.cells_committed += pending.len();
                    pending.clear();
                    return Ok(());
                }
                Err(err) if attempt < self.options.write_attempts => {
                    let backoff = self
                        .options
                        .write_backoff
                        .saturating_mul(1 << (attempt - 1).min(6));
                    warn!(
                        "commit failed (attempt {attempt}/{}): {err}; retrying in {backoff:?}",
                        self.options.write_attempts
                    );
                    if !backoff.is_zero() {
                        thread::sleep(backoff);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// On an unrecoverable write failure, rewind progress to the last
    /// committed row so staged-but-lost updates get reprocessed next run.
    fn abort(&self, last_committed_row: usize, err: anyhow::Error) -> Result<RunTermination> {
        error!("aborting run: {err}");
        self.progress.save(&RunProgress::at_row(last_committed_row))?;
        Ok(RunTermination::Aborted(err.to_string()))
    }

    fn rate_limit_sleep(&self) {
        let mut delay = self.options.row_delay;
        let jitter_ms = self.options.row_jitter.as_millis() as u64;
        if jitter_ms > 0 {
            delay += Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        }
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    fn all_requested_exhausted(&self) -> bool {
        let mut any = false;
        if self.options.selection.primary {
            if let Some(source) = &self.primary {
                if !source.is_exhausted() {
                    return false;
                }
                any = true;
            }
        }
        if self.options.selection.secondary {
            if let Some(source) = &self.secondary {
                if !source.is_exhausted() {
                    return false;
                }
                any = true;
            }
        }
        any
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SearchCandidate, SourceKind, NOT_FOUND};
    use crate::sheet::MemorySheet;
    use crate::source::SearchOutcome;

    struct StubSource {
        kind: SourceKind,
        calls: usize,
        exhaust_after: Option<usize>,
        exhausted: bool,
    }

    impl StubSource {
        fn matching(kind: SourceKind) -> Self {
            StubSource { kind, calls: 0, exhaust_after: None, exhausted: false }
        }

        /// Latches quota on the Nth call (1-based).
        fn exhausting_on_call(kind: SourceKind, n: usize) -> Self {
            StubSource { kind, calls: 0, exhaust_after: Some(n), exhausted: false }
        }
    }

    impl CandidateSource for StubSource {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        fn is_exhausted(&self) -> bool {
            self.exhausted
        }

        fn search_row(&mut self, artist: &str, title: &str) -> SearchOutcome {
            if self.exhausted {
                return SearchOutcome::QuotaExhausted;
            }
            self.calls += 1;
            if self.exhaust_after == Some(self.calls) {
                self.exhausted = true;
                return SearchOutcome::QuotaExhausted;
            }
            SearchOutcome::Candidates(vec![SearchCandidate {
                url: format!("https://{}/track/{}", self.kind, self.calls),
                found_artist: artist.to_string(),
                found_title: title.to_string(),
                thumbnail: None,
                source: self.kind,
            }])
        }
    }

    fn test_options() -> RunOptions {
        RunOptions {
            row_delay: Duration::ZERO,
            row_jitter: Duration::ZERO,
            write_backoff: Duration::ZERO,
            ..RunOptions::default()
        }
    }

    fn song_sheet(songs: &[(&str, &str)]) -> MemorySheet {
        let mut rows: Vec<Vec<&str>> = vec![vec!["Artist", "Title"]];
        rows.extend(songs.iter().map(|(a, t)| vec![*a, *t]));
        let borrowed: Vec<&[&str]> = rows.iter().map(|r| r.as_slice()).collect();
        MemorySheet::from_rows(&borrowed)
    }

    fn primary_only() -> SourceSelection {
        SourceSelection { primary: true, secondary: false }
    }

    #[test]
    fn test_clean_completion_fills_links_and_clears_progress() {
        let dir = tempfile::tempdir().unwrap();
        let progress = ProgressFile::new(dir.path().join("progress.json"));
        let mut sheet = song_sheet(&[("Artist A", "Song One"), ("Artist B", "Song Two")]);
        let mut source = StubSource::matching(SourceKind::Spotify);

        let options = RunOptions { selection: primary_only(), ..test_options() };
        let columns = ColumnMap::default();
        let report = {
            let mut runner = BatchRunner::new(
                &mut sheet,
                columns.clone(),
                options,
                ProgressFile::new(dir.path().join("progress.json")),
                Some(&mut source),
                None,
            );
            runner.run().unwrap()
        };

        assert_eq!(report.termination, RunTermination::Completed);
        assert_eq!(report.stats.rows_processed, 2);
        assert_eq!(report.stats.exact_matches, 2);
        assert_eq!(sheet.cell(2, columns.primary_link), "https://spotify/track/1");
        assert_eq!(sheet.cell(3, columns.primary_link), "https://spotify/track/2");
        // header untouched
        assert_eq!(sheet.cell(1, columns.primary_link), "");
        assert_eq!(progress.load(), None);
    }

    #[test]
    fn test_rows_missing_fields_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut sheet = song_sheet(&[("Artist A", "Song One"), ("", "Orphan Title")]);
        let mut source = StubSource::matching(SourceKind::Spotify);

        let options = RunOptions { selection: primary_only(), ..test_options() };
        let mut runner = BatchRunner::new(
            &mut sheet,
            ColumnMap::default(),
            options,
            ProgressFile::new(dir.path().join("progress.json")),
            Some(&mut source),
            None,
        );
        let report = runner.run().unwrap();

        assert_eq!(report.termination, RunTermination::Completed);
        assert_eq!(report.stats.rows_skipped, 1);
        assert_eq!(report.stats.rows_processed, 1);
    }

    #[test]
    fn test_resume_starts_after_last_processed_row() {
        let dir = tempfile::tempdir().unwrap();
        let progress_path = dir.path().join("progress.json");
        ProgressFile::new(&progress_path)
            .save(&RunProgress::at_row(2))
            .unwrap();

        let mut sheet = song_sheet(&[("Artist A", "Song One"), ("Artist B", "Song Two")]);
        let mut source = StubSource::matching(SourceKind::Spotify);
        let options = RunOptions { selection: primary_only(), ..test_options() };
        let columns = ColumnMap::default();
        let mut runner = BatchRunner::new(
            &mut sheet,
            columns.clone(),
            options,
            ProgressFile::new(&progress_path),
            Some(&mut source),
            None,
        );
        let report = runner.run().unwrap();

        // row 2 was already processed in the previous run; only row 3 runs
        assert_eq!(report.stats.rows_seen, 1);
        assert_eq!(source.calls, 1);
        assert_eq!(sheet.cell(2, columns.primary_link), "");
        assert_eq!(sheet.cell(3, columns.primary_link), "https://spotify/track/1");
    }

    #[test]
    fn test_no_resume_discards_saved_progress() {
        let dir = tempfile::tempdir().unwrap();
        let progress_path = dir.path().join("progress.json");
        ProgressFile::new(&progress_path)
            .save(&RunProgress::at_row(2))
            .unwrap();

        let mut sheet = song_sheet(&[("Artist A", "Song One")]);
        let mut source = StubSource::matching(SourceKind::Spotify);
        let options = RunOptions { selection: primary_only(), resume: false, ..test_options() };
        let mut runner = BatchRunner::new(
            &mut sheet,
            ColumnMap::default(),
            options,
            ProgressFile::new(&progress_path),
            Some(&mut source),
            None,
        );
        let report = runner.run().unwrap();
        assert_eq!(report.stats.rows_processed, 1);
    }

    #[test]
    fn test_quota_pause_keeps_committed_rows_and_progress() {
        let dir = tempfile::tempdir().unwrap();
        let progress_path = dir.path().join("progress.json");
        let mut sheet = song_sheet(&[
            ("Artist A", "Song One"),
            ("Artist B", "Song Two"),
            ("Artist C", "Song Three"),
        ]);
        // first row matches, quota latches on the second row's call
        let mut source = StubSource::exhausting_on_call(SourceKind::Spotify, 2);
        let options = RunOptions { selection: primary_only(), ..test_options() };
        let columns = ColumnMap::default();
        let report = {
            let mut runner = BatchRunner::new(
                &mut sheet,
                columns.clone(),
                options,
                ProgressFile::new(&progress_path),
                Some(&mut source),
                None,
            );
            runner.run().unwrap()
        };

        assert_eq!(report.termination, RunTermination::Paused);
        assert_eq!(report.stats.quota_hits, 1);
        // row 2's match was committed despite the pause
        assert_eq!(sheet.cell(2, columns.primary_link), "https://spotify/track/1");
        // row 4 never ran
        assert_eq!(sheet.cell(4, columns.primary_link), "");
        // resume picks up at row 4 (row 3 was fully processed, quota-skipped)
        let saved = ProgressFile::new(&progress_path).load().unwrap();
        assert_eq!(saved.last_processed_row, 3);
    }

    #[test]
    fn test_write_failure_aborts_and_rewinds_progress() {
        let dir = tempfile::tempdir().unwrap();
        let progress_path = dir.path().join("progress.json");
        let mut sheet = song_sheet(&[("Artist A", "Song One")]);
        sheet.fail_next_writes(10);
        let mut source = StubSource::matching(SourceKind::Spotify);
        let options = RunOptions {
            selection: primary_only(),
            write_attempts: 2,
            ..test_options()
        };
        let report = {
            let mut runner = BatchRunner::new(
                &mut sheet,
                ColumnMap::default(),
                options,
                ProgressFile::new(&progress_path),
                Some(&mut source),
                None,
            );
            runner.run().unwrap()
        };

        assert!(matches!(report.termination, RunTermination::Aborted(_)));
        assert_eq!(sheet.write_calls, 2);
        // progress rewound to before the uncommitted row
        let saved = ProgressFile::new(&progress_path).load().unwrap();
        assert_eq!(saved.last_processed_row, 1);
    }

    #[test]
    fn test_commit_batching_every_n_rows() {
        let dir = tempfile::tempdir().unwrap();
        let songs: Vec<(String, String)> = (0..5)
            .map(|i| (format!("Artist {i}"), format!("Song {i}")))
            .collect();
        let borrowed: Vec<(&str, &str)> =
            songs.iter().map(|(a, t)| (a.as_str(), t.as_str())).collect();
        let mut sheet = song_sheet(&borrowed);
        let mut source = StubSource::matching(SourceKind::Spotify);
        let options = RunOptions {
            selection: primary_only(),
            commit_every: 2,
            ..test_options()
        };
        let report = {
            let mut runner = BatchRunner::new(
                &mut sheet,
                ColumnMap::default(),
                options,
                ProgressFile::new(dir.path().join("progress.json")),
                Some(&mut source),
                None,
            );
            runner.run().unwrap()
        };

        assert_eq!(report.termination, RunTermination::Completed);
        // 5 rows at commit_every=2: commits after rows 2 and 4, final flush for 5
        assert_eq!(sheet.write_calls, 3);
        assert_eq!(report.stats.commits, 3);
    }

    #[test]
    fn test_stop_flag_honored_at_row_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mut sheet = song_sheet(&[("Artist A", "Song One"), ("Artist B", "Song Two")]);
        let mut source = StubSource::matching(SourceKind::Spotify);
        let options = RunOptions { selection: primary_only(), ..test_options() };
        let report = {
            let mut runner = BatchRunner::new(
                &mut sheet,
                ColumnMap::default(),
                options,
                ProgressFile::new(dir.path().join("progress.json")),
                Some(&mut source),
                None,
            );
            runner.stop_flag().store(true, Ordering::Relaxed);
            runner.run().unwrap()
        };
        assert_eq!(report.termination, RunTermination::Stopped);
        assert_eq!(report.stats.rows_processed, 0);
    }

    #[test]
    fn test_already_filled_rows_stage_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut sheet = MemorySheet::from_rows(&[
            &["Artist", "Title"],
            &["Artist A", "Song One", "", "https://open.spotify.com/track/kept"],
        ]);
        let mut source = StubSource::matching(SourceKind::Spotify);
        let options = RunOptions { selection: primary_only(), ..test_options() };
        let columns = ColumnMap::default();
        let report = {
            let mut runner = BatchRunner::new(
                &mut sheet,
                columns.clone(),
                options,
                ProgressFile::new(dir.path().join("progress.json")),
                Some(&mut source),
                None,
            );
            runner.run().unwrap()
        };
        assert_eq!(report.termination, RunTermination::Completed);
        assert_eq!(source.calls, 0);
        assert_eq!(report.stats.cells_committed, 0);
        assert_eq!(sheet.cell(2, columns.primary_link), "https://open.spotify.com/track/kept");
    }

    #[test]
    fn test_not_found_written_for_empty_results() {
        struct EmptySource;
        impl CandidateSource for EmptySource {
            fn kind(&self) -> SourceKind {
                SourceKind::Spotify
            }
            fn is_exhausted(&self) -> bool {
                false
            }
            fn search_row(&mut self, _: &str, _: &str) -> SearchOutcome {
                SearchOutcome::Candidates(Vec::new())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut sheet = song_sheet(&[("Artist A", "Song One")]);
        let mut source = EmptySource;
        let options = RunOptions { selection: primary_only(), ..test_options() };
        let columns = ColumnMap::default();
        {
            let mut runner = BatchRunner::new(
                &mut sheet,
                columns.clone(),
                options,
                ProgressFile::new(dir.path().join("progress.json")),
                Some(&mut source),
                None,
            );
            runner.run().unwrap();
        }
        assert_eq!(sheet.cell(2, columns.primary_link), NOT_FOUND);
    }
}
