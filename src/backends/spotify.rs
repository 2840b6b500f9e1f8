//! Spotify Web API back end (client-credentials flow).

use std::time::{Duration, Instant};

use log::debug;
use serde_json::Value;

use crate::models::SourceKind;
use crate::normalize::{normalize_artist, normalize_title};
use crate::source::{RawResult, SearchBackend, SearchError};

use super::{classify_failure, http_agent};

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const SEARCH_URL: &str = "https://api.spotify.com/v1/search";

/// Renew the access token this long before Spotify says it expires.
const TOKEN_SLACK: Duration = Duration::from_secs(60);

pub struct SpotifyBackend {
    agent: ureq::Agent,
    client_id: String,
    client_secret: String,
    token: Option<CachedToken>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl SpotifyBackend {
    pub fn new(client_id: String, client_secret: String) -> Self {
        SpotifyBackend {
            agent: http_agent(),
            client_id,
            client_secret,
            token: None,
        }
    }

    /// Fetch or reuse a client-credentials access token.
    fn access_token(&mut self) -> Result<String, SearchError> {
        if let Some(cached) = &self.token {
            if Instant::now() < cached.expires_at {
                return Ok(cached.value.clone());
            }
        }

        debug!("spotify: requesting new access token");
        let response = self
            .agent
            .post(TOKEN_URL)
            .send_form(&[
                ("grant_type", "client_credentials"),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
            ])
            .map_err(classify_failure)?;
        let body: Value = response
            .into_json()
            .map_err(|e| SearchError::Hard(format!("token response was not JSON: {e}")))?;

        let value = body["access_token"]
            .as_str()
            .ok_or_else(|| SearchError::Hard("token response missing access_token".to_string()))?
            .to_string();
        let expires_in = body["expires_in"].as_u64().unwrap_or(3600);
        let lifetime = Duration::from_secs(expires_in).saturating_sub(TOKEN_SLACK);
        self.token = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(value)
    }
}

impl SearchBackend for SpotifyBackend {
    fn kind(&self) -> SourceKind {
        SourceKind::Spotify
    }

    fn queries(&self, artist: &str, title: &str) -> Vec<String> {
        // Original-script title throughout; Spotify handles mixed scripts
        // well, and the transliterated-artist variant covers the rest.
        vec![
            format!("track:\"{title}\" artist:\"{artist}\""),
            format!(
                "track:\"{}\" artist:\"{}\"",
                normalize_title(title),
                normalize_artist(artist)
            ),
            format!("\"{title}\" \"{artist}\""),
            format!("{title} {artist}"),
        ]
    }

    fn search(&mut self, query: &str) -> Result<Vec<RawResult>, SearchError> {
        let token = self.access_token()?;
        let url = format!(
            "{SEARCH_URL}?q={}&type=track&limit=1",
            urlencoding::encode(query)
        );
        let response = self
            .agent
            .get(&url)
            .set("Authorization", &format!("Bearer {token}"))
            .call()
            .map_err(classify_failure)?;
        let body: Value = response
            .into_json()
            .map_err(|e| SearchError::Hard(format!("search response was not JSON: {e}")))?;

        let mut results = Vec::new();
        if let Some(items) = body["tracks"]["items"].as_array() {
            for track in items {
                let Some(link) = track["external_urls"]["spotify"].as_str() else {
                    continue;
                };
                let name = track["name"].as_str().unwrap_or_default().to_string();
                let artist = track["artists"][0]["name"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let thumbnail = track["album"]["images"][0]["url"]
                    .as_str()
                    .map(str::to_string);
                results.push(RawResult {
                    url: link.to_string(),
                    display_title: name,
                    channel: artist.clone(),
                    thumbnail,
                    artist: Some(artist),
                });
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_variants_most_specific_first() {
        let backend = SpotifyBackend::new("id".to_string(), "secret".to_string());
        let queries = backend.queries("אייל גולן", "ימים טובים");
        assert_eq!(queries.len(), 4);
        assert_eq!(queries[0], "track:\"ימים טובים\" artist:\"אייל גולן\"");
        // second variant carries the transliterated artist
        assert!(queries[1].contains("eyal golan"));
        // broadest variant is unquoted
        assert_eq!(queries[3], "ימים טובים אייל גולן");
    }
}
