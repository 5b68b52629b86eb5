//! Configuration module for loading TOML config files.
//!
//! Every section has a built-in default so a partial config file only needs
//! to override what it changes.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::PodcastError;
use crate::state::Speaker;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub voices: VoicesConfig,
    #[serde(default)]
    pub personas: PersonasConfig,
    #[serde(default)]
    pub dynamics: DynamicsConfig,
}

/// LLM request parameters shared by all content-generating phases.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    /// Token budget for a single analyst line.
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 130,
            temperature: 0.45,
        }
    }
}

/// Voice configuration for TTS.
#[derive(Debug, Clone, Deserialize)]
pub struct VoicesConfig {
    pub host_voice: String,
    pub analyst_a_voice: String,
    pub analyst_b_voice: String,
}

impl Default for VoicesConfig {
    fn default() -> Self {
        Self {
            host_voice: "af_sky".to_string(),
            analyst_a_voice: "bf_emma".to_string(),
            analyst_b_voice: "bm_george".to_string(),
        }
    }
}

impl VoicesConfig {
    pub fn voice_for(&self, speaker: Speaker) -> &str {
        match speaker {
            Speaker::AnalystA => &self.analyst_a_voice,
            Speaker::AnalystB => &self.analyst_b_voice,
            _ => &self.host_voice,
        }
    }
}

/// The three fixed personas of the show.
#[derive(Debug, Clone, Deserialize)]
pub struct PersonasConfig {
    pub host: HostPersona,
    pub analyst_a: AnalystPersona,
    pub analyst_b: AnalystPersona,
}

impl Default for PersonasConfig {
    fn default() -> Self {
        Self {
            host: HostPersona::default(),
            analyst_a: AnalystPersona::default_reco(),
            analyst_b: AnalystPersona::default_stat(),
        }
    }
}

impl PersonasConfig {
    /// Display name for a speaker, as it appears in script lines.
    pub fn display_name(&self, speaker: Speaker) -> &str {
        match speaker {
            Speaker::AnalystA => &self.analyst_a.name,
            Speaker::AnalystB => &self.analyst_b.name,
            _ => &self.host.name,
        }
    }

    pub fn analyst(&self, speaker: Speaker) -> Option<&AnalystPersona> {
        match speaker {
            Speaker::AnalystA => Some(&self.analyst_a),
            Speaker::AnalystB => Some(&self.analyst_b),
            _ => None,
        }
    }
}

/// Host persona: fixed lines plus the topic-framing prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct HostPersona {
    pub name: String,
    pub intro_line: String,
    pub outro_line: String,
    pub topic_system_prompt: String,
}

impl Default for HostPersona {
    fn default() -> Self {
        Self {
            name: "Nova".to_string(),
            intro_line: DEFAULT_HOST_INTRO.to_string(),
            outro_line: DEFAULT_HOST_OUTRO.to_string(),
            topic_system_prompt: DEFAULT_TOPIC_PROMPT.to_string(),
        }
    }
}

/// Analyst persona: system prompt, per-turn instruction, and the opener
/// pools the conversation dynamics draw from.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalystPersona {
    pub name: String,
    pub intro_line: String,
    pub system_prompt: String,
    /// Appended to the per-turn user prompt; tells the persona what one
    /// concrete thing its sentence must contain.
    pub turn_instruction: String,
    pub openers: Vec<String>,
    /// Lowercased lead-in words/phrases this persona must never start with.
    pub forbidden_openers: Vec<String>,
}

impl AnalystPersona {
    fn default_reco() -> Self {
        Self {
            name: "Reco".to_string(),
            intro_line: "Hi everyone, I'm Reco. I look at performance metrics and turn them \
                         into concrete recommendations for planning, staffing, and process change."
                .to_string(),
            system_prompt: DEFAULT_RECO_PROMPT.to_string(),
            turn_instruction: "include one concrete recommendation or method".to_string(),
            openers: [
                "Given that",
                "Looking at this",
                "From that signal",
                "On those figures",
                "Based on the last month",
                "If we take the trend",
                "Against the yearly context",
                "From a planning view",
            ]
            .map(String::from)
            .to_vec(),
            forbidden_openers: [
                "absolutely", "well", "look", "sure", "okay", "so", "listen", "hey", "you know",
                "hold on", "right", "great point",
            ]
            .map(String::from)
            .to_vec(),
        }
    }

    fn default_stat() -> Self {
        Self {
            name: "Stat".to_string(),
            intro_line: "And I'm Stat. I keep us honest about the data itself, checking trends, \
                         variance, and measurement quality before we act on them."
                .to_string(),
            system_prompt: DEFAULT_STAT_PROMPT.to_string(),
            turn_instruction:
                "include one concrete validation, check, or risk and the immediate next step"
                    .to_string(),
            openers: [
                "Data suggests",
                "From the integrity check",
                "The safer interpretation",
                "Statistically speaking",
                "Given the variance profile",
                "From the control limits",
                "Relative to seasonality",
                "From the timestamp audit",
            ]
            .map(String::from)
            .to_vec(),
            forbidden_openers: [
                "hold on", "actually", "well", "look", "so", "right", "okay", "absolutely",
                "you know", "listen", "wait",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

/// Probabilities driving the stylistic conversation dynamics.
#[derive(Debug, Clone, Deserialize)]
pub struct DynamicsConfig {
    /// Chance of prepending a varied opener even when the line starts fine.
    pub opener_chance: f64,
    /// Gate on addressing the other analyst by name once triggered.
    pub name_address_chance: f64,
    /// Chance of a surprise interjection when surprise keywords are present.
    pub surprise_chance: f64,
    /// Chance of an acknowledgment-or-interruption lead-in after turn 1.
    pub interruption_chance: f64,
    /// Chance of an agreement/disagreement lead-in after turn 1.
    pub agree_disagree_chance: f64,
    /// Split between agreement and constructive disagreement.
    pub agree_ratio: f64,
}

impl Default for DynamicsConfig {
    fn default() -> Self {
        Self {
            opener_chance: 0.4,
            name_address_chance: 0.7,
            surprise_chance: 0.25,
            interruption_chance: 0.25,
            agree_disagree_chance: 0.35,
            agree_ratio: 0.6,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PodcastError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| PodcastError::ConfigError(format!("Failed to read config: {}", e)))?;
        Self::from_str(&content)
    }

    /// Load configuration from string content.
    pub fn from_str(content: &str) -> Result<Self, PodcastError> {
        toml::from_str(content)
            .map_err(|e| PodcastError::ConfigError(format!("Failed to parse config: {}", e)))
    }
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config::default()
}

const DEFAULT_HOST_INTRO: &str = "Welcome to Metricast, the show where operational data gets a \
voice. I'm Nova, your host. Each episode, two specialists dig into the latest metrics and what \
they mean for the teams behind them. Let's meet today's experts.";

const DEFAULT_HOST_OUTRO: &str = "And that wraps up this episode of Metricast. Thanks to Reco \
for the practical recommendations, and to Stat for keeping the analysis grounded in solid data. \
To our listeners, stay curious and stay data-driven, and join us next time. This is Nova, \
signing off.";

const DEFAULT_TOPIC_PROMPT: &str = "You are Nova, the host of Metricast. Your job is to \
introduce the key metrics and topics that analysts Reco and Stat will discuss. Review the \
provided data context and highlight the two or three most interesting metric trends. Keep it \
concise, two to three sentences, professional and engaging. Mention specific metrics such as \
answer speed, call duration, processing time, or volume changes when relevant, and set the \
stage for a productive conversation between a recommendations specialist and a data integrity \
expert.";

const DEFAULT_RECO_PROMPT: &str = "You are Reco, a senior metrics recommendation specialist \
speaking with Stat in a fast back-and-forth podcast discussion. Speak in ONE complete sentence \
of roughly 15 to 30 words, plain text only. Respond directly to what Stat just said, then add a \
concrete metric or method such as a rolling average, control chart, seasonality check, cohort \
analysis, or anomaly band. Use numbers from the context when helpful but never invent values. \
Vary your openers and do not start with filler words. Always tie the advice to an operational \
lever such as staffing, routing, backlog policy, training, or tooling.";

const DEFAULT_STAT_PROMPT: &str = "You are Stat, a senior data and statistical integrity expert \
responding to Reco in a fast back-and-forth podcast discussion. Speak in ONE complete sentence \
of roughly 15 to 30 words, plain text only. Agree, qualify, or refute what Reco just said, and \
add one concrete check, statistic, or risk in the same sentence; bring a specific datum from \
the context when feasible and never invent values. Vary your openers and do not start with \
filler words. Always tie your caution to a decisive next step such as verifying queue mapping, \
recalculating with outlier caps, or running a pre/post comparison.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_personas() {
        let config = default_config();
        assert_eq!(config.personas.host.name, "Nova");
        assert_eq!(config.personas.analyst_a.name, "Reco");
        assert_eq!(config.personas.analyst_b.name, "Stat");
        assert!(!config.personas.analyst_a.openers.is_empty());
        assert!(
            config
                .personas
                .analyst_a
                .forbidden_openers
                .contains(&"absolutely".to_string())
        );
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.dynamics.interruption_chance, 0.25);
        assert_eq!(config.voices.host_voice, "af_sky");
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_str(
            r#"
            [llm]
            model = "gpt-4o"
            max_tokens = 200
            temperature = 0.3
            "#,
        )
        .unwrap();
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.max_tokens, 200);
        // Untouched sections keep defaults.
        assert_eq!(config.personas.host.name, "Nova");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::from_str("[llm\nmodel=").unwrap_err();
        assert!(matches!(err, PodcastError::ConfigError(_)));
    }

    #[test]
    fn test_voice_lookup() {
        let config = default_config();
        assert_eq!(config.voices.voice_for(Speaker::AnalystB), "bm_george");
        assert_eq!(config.voices.voice_for(Speaker::Host), "af_sky");
    }
}
