//! Text-to-speech through an OpenAI compatible `/audio/speech` endpoint.
//!
//! Long text is split into segments, each segment is one request, and the
//! resulting clips are stitched together by [`master::master`].

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;

use crate::config::TtsConfig;

pub mod master;

pub use master::master;

/// Sentence ends, keeping the punctuation with the sentence
fn sentences(text: &str) -> Vec<&str> {
    lazy_static::lazy_static! {
        static ref SENTENCE: regex::Regex = regex::Regex::new(r"[^.!?\n]+(?:[.!?]+|\n+|$)")
            .expect("Sentence regex is valid");
    }
    SENTENCE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Break one sentence that is too long into pieces at word boundaries.
/// Words that are longer than `max_chars` by themselves are cut into chunks.
fn split_words(sentence: &str, max_chars: usize) -> Vec<String> {
    let words = sentence.split_whitespace().flat_map(|word| {
        let chars: Vec<char> = word.chars().collect();
        chars
            .chunks(max_chars)
            .map(|chunk| chunk.iter().collect::<String>())
            .collect::<Vec<_>>()
    });
    let mut pieces = vec![];
    let mut current = String::new();
    for word in words {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > max_chars {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Group sentences into segments of at most `max_chars` characters each.
pub fn segment_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut segments = vec![];
    let mut current = String::new();
    for sentence in sentences(text) {
        let pieces = if sentence.chars().count() > max_chars {
            split_words(sentence, max_chars)
        } else {
            vec![sentence.to_string()]
        };
        for piece in pieces {
            if !current.is_empty()
                && current.chars().count() + 1 + piece.chars().count() > max_chars
            {
                segments.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&piece);
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

/// Markdown emphasis and list markers read badly out loud
pub fn strip_markup(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '*' | '_' | '#' | '`' | '~'))
        .collect()
}

#[derive(Serialize, Debug)]
struct Request<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

#[derive(Clone)]
pub struct SpeechClient {
    http: Client,
    api_key: String,
    config: TtsConfig,
}

impl SpeechClient {
    pub fn new(config: &TtsConfig, api_key: &str) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            config: config.clone(),
        }
    }

    pub fn voice_for(&self, roast_mode: bool) -> &str {
        if roast_mode {
            &self.config.roast_voice
        } else {
            &self.config.friendly_voice
        }
    }

    /// Synthesize one segment. The result is a WAV file.
    pub async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        let request = Request {
            model: &self.config.model,
            input: text,
            voice,
            response_format: "wav",
        };
        tracing::debug!("Speech request: {:?}", request);
        let bytes = self
            .http
            .post(format!(
                "{}/audio/speech",
                self.config.api_base.trim_end_matches('/')
            ))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()
            .context("Speech request failed")?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    /// Speak a whole text: segment it, voice each segment, and master the result.
    pub async fn speak(&self, text: &str, roast_mode: bool) -> Result<Vec<u8>> {
        let voice = self.voice_for(roast_mode).to_string();
        let segments = segment_text(&strip_markup(text), self.config.segment_chars);
        anyhow::ensure!(!segments.is_empty(), "Nothing to say");
        tracing::info!(
            "Synthesizing {} segment(s) with voice {}",
            segments.len(),
            voice
        );
        let mut clips = Vec::with_capacity(segments.len());
        for segment in &segments {
            clips.push(self.synthesize(segment, &voice).await?);
        }
        master(&clips, self.config.gap_ms)
    }
}
