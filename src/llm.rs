//! Optional LLM-assisted artist/title correction.
//!
//! The model is asked to return one JSON array of correction objects, but the
//! response is untrusted output: it may arrive wrapped in code fences,
//! preceded by commentary, or be malformed entirely. Extraction is therefore
//! defensive, and any parse failure yields zero corrections rather than an
//! error. Low-confidence corrections are never applied.

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::models::SongRecord;

// ============================================================================
// Client
// ============================================================================

pub trait CompletionClient {
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// OpenAI-style chat-completions client over blocking HTTP.
pub struct HttpCompletionClient {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpCompletionClient {
    pub fn new(endpoint: String, api_key: String, model: String) -> Self {
        HttpCompletionClient {
            agent: crate::backends::http_agent(),
            endpoint,
            api_key,
            model,
        }
    }
}

impl CompletionClient for HttpCompletionClient {
    fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.0,
        });
        let response: Value = self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(body)
            .context("completion request failed")?
            .into_json()
            .context("completion response was not JSON")?;
        response["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .context("completion response missing message content")
    }
}

// ============================================================================
// Corrections
// ============================================================================

/// How sure the model said it was. Hebrew values appear because the sheets
/// and prompts are bilingual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    fn parse(text: &str) -> Confidence {
        match text.trim().to_lowercase().as_str() {
            "high" | "גבוהה" => Confidence::High,
            "medium" | "בינונית" => Confidence::Medium,
            // unrecognized values are treated as the weakest tier
            _ => Confidence::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    pub row: usize,
    pub artist: Option<String>,
    pub title: Option<String>,
    pub confidence: Confidence,
}

#[derive(Debug, Deserialize)]
struct RawCorrection {
    row: usize,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    confidence: Option<String>,
}

/// Find the first top-level JSON array in free-form model output.
///
/// Scans bracket depth while honoring string literals and escapes, so
/// commentary, code fences, and brackets inside strings do not confuse it.
pub fn extract_json_array(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a model response into corrections. Anything unparseable yields an
/// empty list.
pub fn parse_corrections(response: &str) -> Vec<Correction> {
    let Some(array) = extract_json_array(response) else {
        warn!("model response contained no JSON array");
        return Vec::new();
    };
    let raw: Vec<RawCorrection> = match serde_json::from_str(array) {
        Ok(raw) => raw,
        Err(err) => {
            warn!("failed to parse corrections array: {err}");
            return Vec::new();
        }
    };
    raw.into_iter()
        .map(|r| Correction {
            row: r.row,
            artist: r.artist.filter(|s| !s.trim().is_empty()),
            title: r.title.filter(|s| !s.trim().is_empty()),
            confidence: r
                .confidence
                .as_deref()
                .map(Confidence::parse)
                .unwrap_or(Confidence::Low),
        })
        .collect()
}

/// Build the correction prompt for a batch of records.
pub fn build_prompt(records: &[SongRecord]) -> String {
    let mut prompt = String::from(
        "You are a music metadata expert for a bilingual Hebrew/English song \
         sheet. For each entry below, correct obvious misspellings and swapped \
         artist/title fields. Respond with ONLY a JSON array of objects with \
         keys: row, artist, title, confidence (high/medium/low). Include an \
         entry only for rows that need a correction.\n\n",
    );
    for record in records {
        prompt.push_str(&format!(
            "row {}: artist={:?} title={:?}\n",
            record.row, record.artist, record.title
        ));
    }
    prompt
}

/// Apply corrections to in-memory records. Low-confidence corrections are
/// skipped; applied ones update the fields and leave an audit note. Returns
/// how many records changed.
pub fn apply_corrections(records: &mut [SongRecord], corrections: &[Correction]) -> usize {
    let mut applied = 0;
    for correction in corrections {
        if correction.confidence == Confidence::Low {
            continue;
        }
        let Some(record) = records.iter_mut().find(|r| r.row == correction.row) else {
            warn!("correction for unknown row {}, ignored", correction.row);
            continue;
        };
        let mut changed = false;
        if let Some(artist) = &correction.artist {
            if *artist != record.artist {
                record.append_note(&format!("artist corrected from {:?}", record.artist));
                record.artist = artist.clone();
                changed = true;
            }
        }
        if let Some(title) = &correction.title {
            if *title != record.title {
                record.append_note(&format!("title corrected from {:?}", record.title));
                record.title = title.clone();
                changed = true;
            }
        }
        if changed {
            applied += 1;
        }
    }
    applied
}

/// Run the correction pass over a batch of records.
pub fn run_llm_stage(client: &dyn CompletionClient, records: &mut [SongRecord]) -> Result<usize> {
    if records.is_empty() {
        return Ok(0);
    }
    let prompt = build_prompt(records);
    let response = client.complete(&prompt)?;
    let corrections = parse_corrections(&response);
    let applied = apply_corrections(records, &corrections);
    info!(
        "llm stage: {} correction(s) returned, {} applied",
        corrections.len(),
        applied
    );
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(row: usize, artist: &str, title: &str) -> SongRecord {
        SongRecord {
            row,
            artist: artist.to_string(),
            title: title.to_string(),
            ..SongRecord::default()
        }
    }

    #[test]
    fn test_extract_from_fenced_response() {
        let response = "Here are the corrections:\n```json\n[{\"row\": 2}]\n```\nDone!";
        assert_eq!(extract_json_array(response), Some("[{\"row\": 2}]"));
    }

    #[test]
    fn test_extract_ignores_brackets_in_strings() {
        let response = r#"[{"row": 2, "title": "Song [Live]"}]"#;
        assert_eq!(extract_json_array(response), Some(response));
    }

    #[test]
    fn test_extract_nested_arrays() {
        let response = r#"note [[1, 2], [3]] trailing"#;
        assert_eq!(extract_json_array(response), Some("[[1, 2], [3]]"));
    }

    #[test]
    fn test_parse_malformed_yields_empty() {
        assert!(parse_corrections("no json here").is_empty());
        assert!(parse_corrections("[{\"row\": ").is_empty());
        assert!(parse_corrections("[{\"not_row\": 1}]").is_empty());
    }

    #[test]
    fn test_parse_hebrew_confidence() {
        let response = r#"[
            {"row": 2, "artist": "Queen", "confidence": "גבוהה"},
            {"row": 3, "artist": "Kveen", "confidence": "נמוכה"},
            {"row": 4, "artist": "ABBA"}
        ]"#;
        let corrections = parse_corrections(response);
        assert_eq!(corrections.len(), 3);
        assert_eq!(corrections[0].confidence, Confidence::High);
        assert_eq!(corrections[1].confidence, Confidence::Low);
        // missing confidence reads as the weakest tier
        assert_eq!(corrections[2].confidence, Confidence::Low);
    }

    #[test]
    fn test_apply_skips_low_confidence() {
        let mut records = vec![record(2, "Kveen", "Bohemian Rhapsody")];
        let corrections = vec![Correction {
            row: 2,
            artist: Some("Queen".to_string()),
            title: None,
            confidence: Confidence::Low,
        }];
        assert_eq!(apply_corrections(&mut records, &corrections), 0);
        assert_eq!(records[0].artist, "Kveen");
    }

    #[test]
    fn test_apply_updates_and_leaves_note() {
        let mut records = vec![record(2, "Kveen", "Bohemian Rhapsody")];
        let corrections = vec![Correction {
            row: 2,
            artist: Some("Queen".to_string()),
            title: None,
            confidence: Confidence::High,
        }];
        assert_eq!(apply_corrections(&mut records, &corrections), 1);
        assert_eq!(records[0].artist, "Queen");
        assert!(records[0].notes.contains("Kveen"));
    }

    #[test]
    fn test_run_stage_with_stub_client() {
        struct StubClient;
        impl CompletionClient for StubClient {
            fn complete(&self, _prompt: &str) -> Result<String> {
                Ok("```json\n[{\"row\": 2, \"title\": \"Fixed Title\", \
                    \"confidence\": \"high\"}]\n```"
                    .to_string())
            }
        }

        let mut records = vec![record(2, "Artist", "Borken Title")];
        let applied = run_llm_stage(&StubClient, &mut records).unwrap();
        assert_eq!(applied, 1);
        assert_eq!(records[0].title, "Fixed Title");
    }
}
