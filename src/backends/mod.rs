//! HTTP search back ends. Each wraps one external API behind
//! [`SearchBackend`](crate::source::SearchBackend); retry, quota latching,
//! and variant fallback live in the adapter layer, not here.

use std::time::Duration;

use crate::source::SearchError;

pub mod spotify;
pub mod youtube;

pub use spotify::SpotifyBackend;
pub use youtube::YoutubeBackend;

/// Shared blocking HTTP agent with conservative timeouts.
pub(crate) fn http_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(5))
        .timeout_read(Duration::from_secs(10))
        .timeout_write(Duration::from_secs(10))
        .build()
}

/// Map an HTTP failure into the adapter's error taxonomy. Quota detection is
/// back-end-specific and handled by the caller before this runs.
pub(crate) fn classify_failure(error: ureq::Error) -> SearchError {
    match error {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            match code {
                408 | 429 | 500..=599 => {
                    SearchError::Transient(format!("HTTP {code}: {body}"))
                }
                _ => SearchError::Hard(format!("HTTP {code}: {body}")),
            }
        }
        ureq::Error::Transport(transport) => {
            SearchError::Transient(format!("transport failure: {transport}"))
        }
    }
}
