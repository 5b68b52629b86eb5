//! Core library for Metricast: turn orchestration, conversation dynamics,
//! LLM and TTS collaborators, and audio finalization for generating a
//! scripted metrics podcast.

pub mod audio;
pub mod auth;
pub mod config;
pub mod context;
pub mod dynamics;
pub mod error;
pub mod llm;
pub mod nodes;
pub mod orchestrator;
pub mod state;
pub mod tts;

pub use auth::{OAuthConfig, TokenProvider, TokenSource};
pub use config::{Config, default_config};
pub use context::{ContextSelector, PodcastContext, infer_topic};
pub use dynamics::{ConversationDynamics, ensure_complete_sentence};
pub use error::PodcastError;
pub use llm::{LineGenerator, OpenAiGenerator};
pub use orchestrator::{
    EventCallback, Phase, PodcastEvent, PodcastOrchestrator, PodcastRequest, PodcastSummary,
};
pub use state::{ConversationState, Speaker};
pub use tts::{KokoroSynthesizer, SpeechSynthesizer};
