//! Candidate source adapter: wraps a search back end behind one interface,
//! handling query-variant fan-out, retry with backoff, and quota latching.
//!
//! Quota state is owned per adapter instance, never global. Once a back end
//! reports quota exhaustion the adapter short-circuits every further call for
//! the rest of the run without touching the network.

use std::thread;
use std::time::Duration;

use log::{debug, warn};
use rand::Rng;
use thiserror::Error;

use crate::models::{SearchCandidate, SourceKind};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum SearchError {
    /// Network blip or HTTP 5xx. Retryable.
    #[error("transient search failure: {0}")]
    Transient(String),

    /// Daily/periodic quota consumed. Permanent for the rest of the run.
    #[error("quota exhausted for {0}")]
    QuotaExhausted(SourceKind),

    /// Malformed response or anything else that retrying will not fix.
    #[error("search failure: {0}")]
    Hard(String),
}

// ============================================================================
// Back end trait
// ============================================================================

/// A raw search hit before title parsing. `display_title` may be a combined
/// "Artist - Title" string for back ends without structured fields.
#[derive(Debug, Clone)]
pub struct RawResult {
    pub url: String,
    pub display_title: String,
    /// Channel or publisher name, used as the fallback artist.
    pub channel: String,
    pub thumbnail: Option<String>,
    /// Structured artist field, when the back end provides one.
    pub artist: Option<String>,
}

/// One external search service. Implementations issue a single query and
/// return raw hits; variant fan-out and retries live in [`SourceAdapter`].
pub trait SearchBackend {
    fn kind(&self) -> SourceKind;

    /// Ordered query variants for a row, most specific first.
    fn queries(&self, artist: &str, title: &str) -> Vec<String>;

    fn search(&mut self, query: &str) -> Result<Vec<RawResult>, SearchError>;
}

// ============================================================================
// Adapter
// ============================================================================

/// What a single row-level search produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Candidates(Vec<SearchCandidate>),
    /// The back end latched its quota mid-search (or was already latched).
    QuotaExhausted,
}

/// Retry schedule for transient failures. A `base_delay` of zero disables
/// sleeping entirely, which keeps tests instant.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with jitter: base * 2^(attempt-1), capped, plus up
    /// to one extra base interval of random jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(6);
        let scaled = self.base_delay.saturating_mul(1 << exponent);
        let capped = scaled.min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=self.base_delay.as_millis() as u64);
        capped + Duration::from_millis(jitter_ms)
    }
}

/// Wraps one back end with the run-level policy: quota latch, bounded retry,
/// and first-non-empty variant fallback.
pub struct SourceAdapter<B: SearchBackend> {
    backend: B,
    retry: RetryPolicy,
    quota_exhausted: bool,
}

impl<B: SearchBackend> SourceAdapter<B> {
    pub fn new(backend: B, retry: RetryPolicy) -> Self {
        SourceAdapter { backend, retry, quota_exhausted: false }
    }

    pub fn kind(&self) -> SourceKind {
        self.backend.kind()
    }

    /// True once the back end has reported quota exhaustion this run.
    pub fn is_exhausted(&self) -> bool {
        self.quota_exhausted
    }

    /// Search for a row across the back end's query variants.
    ///
    /// Variants form a fallback chain, not an aggregation: the first variant
    /// yielding at least one hit wins. Transient errors are retried with
    /// backoff and, once exhausted, treated as an empty variant. A quota
    /// signal latches the adapter immediately.
    pub fn search_row(&mut self, artist: &str, title: &str) -> SearchOutcome {
        if self.quota_exhausted {
            return SearchOutcome::QuotaExhausted;
        }

        let kind = self.backend.kind();
        for query in self.backend.queries(artist, title) {
            match self.search_with_retry(&query) {
                Ok(results) if !results.is_empty() => {
                    debug!("{kind}: {} hit(s) for query {query:?}", results.len());
                    let candidates = results
                        .into_iter()
                        .map(|raw| into_candidate(raw, kind))
                        .collect();
                    return SearchOutcome::Candidates(candidates);
                }
                Ok(_) => continue,
                Err(SearchError::QuotaExhausted(_)) => {
                    warn!("{kind}: quota exhausted, latching for the rest of the run");
                    self.quota_exhausted = true;
                    return SearchOutcome::QuotaExhausted;
                }
                Err(err) => {
                    // retries already spent; fall through to the next variant
                    warn!("{kind}: query {query:?} failed: {err}");
                    continue;
                }
            }
        }
        SearchOutcome::Candidates(Vec::new())
    }

    fn search_with_retry(&mut self, query: &str) -> Result<Vec<RawResult>, SearchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.backend.search(query) {
                Ok(results) => return Ok(results),
                Err(SearchError::Transient(msg)) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    debug!(
                        "{}: transient failure ({msg}), retry {attempt}/{} after {delay:?}",
                        self.backend.kind(),
                        self.retry.max_attempts
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Object-safe view of an adapter so callers can hold heterogeneous back
/// ends behind one type.
pub trait CandidateSource {
    fn kind(&self) -> SourceKind;
    fn is_exhausted(&self) -> bool;
    fn search_row(&mut self, artist: &str, title: &str) -> SearchOutcome;
}

impl<B: SearchBackend> CandidateSource for SourceAdapter<B> {
    fn kind(&self) -> SourceKind {
        SourceAdapter::kind(self)
    }

    fn is_exhausted(&self) -> bool {
        SourceAdapter::is_exhausted(self)
    }

    fn search_row(&mut self, artist: &str, title: &str) -> SearchOutcome {
        SourceAdapter::search_row(self, artist, title)
    }
}

// ============================================================================
// Display-title parsing
// ============================================================================

/// Minimum fragment length for a delimiter split to be trusted.
const MIN_FRAGMENT_LEN: usize = 3;

/// Delimiters in priority order. The bool marks "title comes first"
/// (i.e., "Song by Artist" rather than "Artist - Song").
const TITLE_DELIMITERS: &[(&str, bool)] = &[(" - ", false), (" by ", true)];

/// Split an undifferentiated video title into (artist, title).
///
/// Splits on the first delimiter found, in priority order. If either fragment
/// is shorter than 3 characters the split is discarded and the whole string
/// becomes the title with the channel name as artist.
pub fn split_display_title(display_title: &str, channel: &str) -> (String, String) {
    for &(delim, title_first) in TITLE_DELIMITERS {
        if let Some(idx) = display_title.find(delim) {
            let before = display_title[..idx].trim();
            let after = display_title[idx + delim.len()..].trim();
            let (artist, title) = if title_first { (after, before) } else { (before, after) };
            if artist.chars().count() < MIN_FRAGMENT_LEN || title.chars().count() < MIN_FRAGMENT_LEN {
                break;
            }
            return (artist.to_string(), title.to_string());
        }
    }
    (channel.trim().to_string(), display_title.trim().to_string())
}

fn into_candidate(raw: RawResult, source: SourceKind) -> SearchCandidate {
    let (found_artist, found_title) = match raw.artist {
        Some(artist) => (artist, raw.display_title),
        None => split_display_title(&raw.display_title, &raw.channel),
    };
    SearchCandidate {
        url: raw.url,
        found_artist,
        found_title,
        thumbnail: raw.thumbnail,
        source,
    }
}
