//! Row Processor: resolve one sheet row against the requested sources and
//! stage the cells that change. Performs no sheet I/O itself; the runner owns
//! reading, committing, and pacing.

use log::{debug, info};

use crate::models::{detect_version, is_filled, Field, RowUpdate, SongRecord, NOT_FOUND};
use crate::scoring::{score_match, MatchThresholds, MatchTier};
use crate::source::{CandidateSource, SearchOutcome};

/// Which output slots a run should fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSelection {
    pub primary: bool,
    pub secondary: bool,
}

impl SourceSelection {
    pub fn both() -> Self {
        SourceSelection { primary: true, secondary: true }
    }
}

/// What processing one row produced.
#[derive(Debug, Default)]
pub struct RowOutcome {
    pub update: RowUpdate,
    pub searches_issued: usize,
    /// A source latched quota while this row was being processed.
    pub quota_hit: bool,
    pub exact_matches: usize,
    pub high_probability_matches: usize,
    pub no_matches: usize,
}

pub struct RowProcessor {
    thresholds: MatchThresholds,
}

impl RowProcessor {
    pub fn new(thresholds: MatchThresholds) -> Self {
        RowProcessor { thresholds }
    }

    /// Resolve a row against the primary and secondary source slots.
    ///
    /// A slot is skipped with zero API calls when it is not requested, its
    /// output cell already holds a real value, or its adapter latched quota
    /// earlier in the run. Running twice on a filled row is therefore free
    /// and stages nothing.
    pub fn process(
        &self,
        record: &SongRecord,
        primary: Option<&mut dyn CandidateSource>,
        secondary: Option<&mut dyn CandidateSource>,
        requested: SourceSelection,
    ) -> RowOutcome {
        let mut outcome = RowOutcome {
            update: RowUpdate::new(record.row),
            ..RowOutcome::default()
        };

        if requested.primary {
            if let Some(source) = primary {
                self.process_slot(record, source, Field::PrimaryLink, &record.primary_link, &mut outcome);
            }
        }
        if requested.secondary {
            if let Some(source) = secondary {
                self.process_slot(record, source, Field::SecondaryLink, &record.secondary_link, &mut outcome);
            }
        }
        outcome
    }

    fn process_slot(
        &self,
        record: &SongRecord,
        source: &mut dyn CandidateSource,
        link_field: Field,
        current_value: &str,
        outcome: &mut RowOutcome,
    ) {
        if is_filled(current_value) {
            debug!("row {}: {} already filled, skipping", record.row, source.kind());
            return;
        }
        if source.is_exhausted() {
            // latched earlier in the run; treated as not requested
            debug!("row {}: {} quota latched, skipping", record.row, source.kind());
            return;
        }

        outcome.searches_issued += 1;
        let candidates = match source.search_row(&record.artist, &record.title) {
            SearchOutcome::Candidates(candidates) => candidates,
            SearchOutcome::QuotaExhausted => {
                outcome.quota_hit = true;
                return;
            }
        };

        // adapters already resolved variant fallback; the first hit is the
        // best one the back end offered
        let Some(candidate) = candidates.into_iter().next() else {
            outcome.no_matches += 1;
            outcome.update.set(link_field, NOT_FOUND.to_string());
            return;
        };

        let verdict = score_match(
            &record.artist,
            &record.title,
            &candidate.found_artist,
            &candidate.found_title,
            self.thresholds,
        );
        debug!(
            "row {}: {} candidate {:?} scored artist={} title={} -> {:?}",
            record.row,
            source.kind(),
            candidate.found_title,
            verdict.artist_score,
            verdict.title_score,
            verdict.tier
        );

        match verdict.tier {
            MatchTier::Exact => {
                outcome.exact_matches += 1;
                outcome.update.set(link_field, candidate.url.clone());
                if !is_filled(&record.thumbnail) {
                    if let Some(thumbnail) = &candidate.thumbnail {
                        outcome.update.set(Field::Thumbnail, thumbnail.clone());
                    }
                }
                if record.version_tag.trim().is_empty() {
                    let tag = detect_version(&candidate.found_title);
                    outcome.update.set(Field::VersionTag, tag.as_str().to_string());
                }
                info!(
                    "row {}: exact match on {} -> {}",
                    record.row,
                    source.kind(),
                    candidate.url
                );
            }
            MatchTier::HighProbability => {
                outcome.high_probability_matches += 1;
                // first writer wins: an alternate staged by an earlier source
                // in this row, or already on the sheet, is kept
                let staged = outcome.update.get(Field::AlternateLink).is_some();
                if !staged && !is_filled(&record.alternate_link) {
                    outcome.update.set(Field::AlternateLink, candidate.url.clone());
                    info!(
                        "row {}: high-probability match on {} -> alternate {}",
                        record.row,
                        source.kind(),
                        candidate.url
                    );
                }
            }
            MatchTier::None => {
                outcome.no_matches += 1;
                outcome.update.set(link_field, NOT_FOUND.to_string());
            }
        }
    }
}
