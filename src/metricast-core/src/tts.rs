//! TTS collaborator: per-line speech synthesis using kokoro-tiny.

use async_trait::async_trait;
use kokoro_tiny::TtsEngine;
use std::path::Path;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::VoicesConfig;
use crate::error::PodcastError;
use crate::state::{AudioSegment, Speaker};

/// Capability the phase nodes depend on: one line in, one audio clip out.
/// The segment is written into `dir`, which the orchestrator scopes to the
/// run so partial output disappears with it.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        speaker: Speaker,
        dir: &Path,
    ) -> Result<AudioSegment, PodcastError>;
}

/// Synthesizer backed by the kokoro-tiny engine (downloads the model on
/// first run).
pub struct KokoroSynthesizer {
    engine: Mutex<TtsEngine>,
    voices: VoicesConfig,
    available_voices: Vec<String>,
}

impl KokoroSynthesizer {
    pub async fn new(voices: VoicesConfig) -> Result<Self, PodcastError> {
        let engine = TtsEngine::new()
            .await
            .map_err(|e| PodcastError::Synthesis(format!("Failed to initialize TTS: {}", e)))?;
        let available_voices = engine.voices();

        let synthesizer = Self {
            engine: Mutex::new(engine),
            voices,
            available_voices,
        };
        synthesizer.validate_voice(&synthesizer.voices.host_voice)?;
        synthesizer.validate_voice(&synthesizer.voices.analyst_a_voice)?;
        synthesizer.validate_voice(&synthesizer.voices.analyst_b_voice)?;
        Ok(synthesizer)
    }

    pub fn available_voices(&self) -> &[String] {
        &self.available_voices
    }

    fn validate_voice(&self, voice_id: &str) -> Result<(), PodcastError> {
        if voice_id.is_empty() || !self.available_voices.contains(&voice_id.to_string()) {
            return Err(PodcastError::Synthesis(format!(
                "Unknown voice '{}'. Available voices: {}",
                voice_id,
                self.available_voices.join(", ")
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SpeechSynthesizer for KokoroSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        speaker: Speaker,
        dir: &Path,
    ) -> Result<AudioSegment, PodcastError> {
        let voice_id = self.voices.voice_for(speaker).to_string();
        // Kokoro has a strict input-length limit, so long lines are split.
        let chunks = split_into_chunks(text, 200);

        let mut engine = self.engine.lock().await;
        let mut all_samples = Vec::new();

        for chunk in chunks {
            if chunk.trim().is_empty() {
                continue;
            }
            let samples = engine
                .synthesize(&chunk, Some(&voice_id))
                .map_err(|e| PodcastError::Synthesis(format!("Synthesis failed: {}", e)))?;
            all_samples.extend(samples);
            // Pause between chunks (0.3 s at 24 kHz) to prevent cutoff.
            all_samples.extend(vec![0.0; 7200]);
        }
        // Trailing padding (0.5 s) so the final word is never clipped.
        all_samples.extend(vec![0.0; 12000]);

        let path = dir.join(format!("seg_{}.wav", Uuid::new_v4().simple()));
        engine
            .save_wav(path.to_str().unwrap_or("segment.wav"), &all_samples)
            .map_err(|e| PodcastError::Synthesis(format!("Failed to save WAV: {}", e)))?;

        Ok(AudioSegment { path, speaker })
    }
}

/// Split text into chunks that are safe for TTS synthesis, preferring
/// sentence boundaries and falling back to commas.
fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current_chunk = String::new();

    for sentence in text.split_inclusive(&['.', '!', '?', ';'][..]) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if current_chunk.len() + sentence.len() > max_chars {
            if !current_chunk.is_empty() {
                chunks.push(current_chunk.trim().to_string());
                current_chunk = String::new();
            }

            if sentence.len() > max_chars {
                for part in sentence.split_inclusive(',') {
                    if current_chunk.len() + part.len() > max_chars && !current_chunk.is_empty() {
                        chunks.push(current_chunk.trim().to_string());
                        current_chunk = String::new();
                    }
                    current_chunk.push_str(part);
                    current_chunk.push(' ');
                }
            } else {
                current_chunk.push_str(sentence);
                current_chunk.push(' ');
            }
        } else {
            current_chunk.push_str(sentence);
            current_chunk.push(' ');
        }
    }

    if !current_chunk.trim().is_empty() {
        chunks.push(current_chunk.trim().to_string());
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_into_chunks() {
        let text = "Hello world. This is a test. Another sentence here.";
        let chunks = split_into_chunks(text, 30);
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.len() <= 35);
        }
    }

    #[test]
    fn test_split_long_sentence_falls_back_to_commas() {
        let text = "one part, two part, three part, four part, five part, six part";
        let chunks = split_into_chunks(text, 25);
        assert!(chunks.len() > 1);
    }

    #[test]
    fn test_split_empty_text() {
        assert!(split_into_chunks("", 200).is_empty());
    }
}
