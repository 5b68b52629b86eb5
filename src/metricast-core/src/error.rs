//! Error types for podcast generation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PodcastError {
    #[error("no usable input context: {0}")]
    ContextMissing(String),

    #[error("text generation failed: {0}")]
    Generation(String),

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("no audio segments to finalize")]
    NoSegments,

    #[error("audio format mismatch in segment '{segment}': expected {expected}, got {actual}")]
    FormatMismatch {
        segment: String,
        expected: String,
        actual: String,
    },

    #[error("workflow did not converge after {steps} node executions (limit {limit})")]
    NonConvergence { steps: u32, limit: u32 },

    #[error("phase '{node}' failed at turn {turn} (session {session_id})")]
    NodeFailed {
        node: &'static str,
        turn: f64,
        session_id: String,
        #[source]
        source: Box<PodcastError>,
    },

    #[error("auth token acquisition failed: {0}")]
    Auth(String),

    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    #[error("audio I/O error: {0}")]
    Wav(#[from] hound::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PodcastError {
    /// Wrap a collaborator failure with the phase that triggered it, so a
    /// failed run can be reproduced from the error alone.
    pub fn in_node(self, node: &'static str, turn: f64, session_id: &str) -> Self {
        PodcastError::NodeFailed {
            node,
            turn,
            session_id: session_id.to_string(),
            source: Box::new(self),
        }
    }
}
