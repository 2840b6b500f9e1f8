//! YouTube Data API v3 back end.
//!
//! The search endpoint charges 100 quota units per call against a small daily
//! budget, so a 403 carrying `quotaExceeded` is surfaced as the permanent
//! quota signal rather than a retryable failure.

use serde_json::Value;

use crate::models::SourceKind;
use crate::source::{RawResult, SearchBackend, SearchError};

use super::{classify_failure, http_agent};

const SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";

pub struct YoutubeBackend {
    agent: ureq::Agent,
    api_key: String,
    kind: SourceKind,
}

impl YoutubeBackend {
    pub fn new(api_key: String) -> Self {
        YoutubeBackend {
            agent: http_agent(),
            api_key,
            kind: SourceKind::Youtube,
        }
    }
}

impl SearchBackend for YoutubeBackend {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn queries(&self, artist: &str, title: &str) -> Vec<String> {
        vec![
            format!("{title} {artist} official audio"),
            format!("{title} {artist} official video"),
            format!("{title} {artist} lyric video"),
            format!("{title} {artist}"),
        ]
    }

    fn search(&mut self, query: &str) -> Result<Vec<RawResult>, SearchError> {
        let url = format!(
            "{SEARCH_URL}?part=snippet&type=video&maxResults=1&q={}&key={}",
            urlencoding::encode(query),
            urlencoding::encode(&self.api_key)
        );
        let response = match self.agent.get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(403, response)) => {
                let body = response.into_string().unwrap_or_default();
                if body.contains("quotaExceeded") {
                    return Err(SearchError::QuotaExhausted(self.kind));
                }
                return Err(SearchError::Hard(format!("HTTP 403: {body}")));
            }
            Err(err) => return Err(classify_failure(err)),
        };
        let body: Value = response
            .into_json()
            .map_err(|e| SearchError::Hard(format!("search response was not JSON: {e}")))?;

        let mut results = Vec::new();
        if let Some(items) = body["items"].as_array() {
            for item in items {
                let Some(video_id) = item["id"]["videoId"].as_str() else {
                    continue;
                };
                let snippet = &item["snippet"];
                results.push(RawResult {
                    url: format!("https://www.youtube.com/watch?v={video_id}"),
                    display_title: snippet["title"].as_str().unwrap_or_default().to_string(),
                    channel: snippet["channelTitle"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    thumbnail: snippet["thumbnails"]["high"]["url"]
                        .as_str()
                        .or_else(|| snippet["thumbnails"]["default"]["url"].as_str())
                        .map(str::to_string),
                    // no structured artist field; the display title gets parsed
                    artist: None,
                });
            }
        }
        Ok(results)
    }
}
