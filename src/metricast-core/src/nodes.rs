//! Phase nodes: one function per phase of the show.
//!
//! Every node takes the conversation state by value and returns the
//! replacement state with exactly one new line recorded and the next
//! speaker set. Collaborator errors bubble up untouched; the orchestrator
//! attaches the node context.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

use crate::config::Config;
use crate::dynamics::{ConversationDynamics, ensure_complete_sentence};
use crate::error::PodcastError;
use crate::llm::LineGenerator;
use crate::orchestrator::should_continue;
use crate::state::{ConversationState, Speaker};
use crate::tts::SpeechSynthesizer;

/// Everything a node needs besides the state itself. Built once per run by
/// the orchestrator and reborrowed into each node call.
pub struct NodeServices<'a> {
    pub config: &'a Config,
    pub generator: &'a dyn LineGenerator,
    pub synthesizer: &'a dyn SpeechSynthesizer,
    pub dynamics: &'a mut ConversationDynamics,
    pub segment_dir: &'a Path,
}

impl NodeServices<'_> {
    /// Synthesize one line and record it, keeping transcript, script, and
    /// audio in lock-step.
    async fn speak(
        &self,
        state: &mut ConversationState,
        speaker: Speaker,
        text: &str,
    ) -> Result<(), PodcastError> {
        let segment = self
            .synthesizer
            .synthesize(text, speaker, self.segment_dir)
            .await?;
        let name = self.config.personas.display_name(speaker);
        debug!(speaker = ?speaker, chars = text.len(), "recorded line");
        state.record_line(speaker, name, text, segment.path);
        Ok(())
    }
}

/// Fixed host welcome. Opens every episode.
pub async fn host_intro_node(
    services: &mut NodeServices<'_>,
    mut state: ConversationState,
) -> Result<ConversationState, PodcastError> {
    let line = services.config.personas.host.intro_line.clone();
    services.speak(&mut state, Speaker::Host, &line).await?;
    state.host.intro_completed = true;
    state.host.add_generated_line(&line);
    state.current_speaker = Speaker::AnalystA;
    state.record_node("host_intro");
    Ok(state)
}

/// Fixed self-introduction for the recommendations analyst.
pub async fn analyst_a_intro_node(
    services: &mut NodeServices<'_>,
    mut state: ConversationState,
) -> Result<ConversationState, PodcastError> {
    let line = services.config.personas.analyst_a.intro_line.clone();
    services.speak(&mut state, Speaker::AnalystA, &line).await?;
    state.analyst_a.add_generated_line(&line);
    state.current_speaker = Speaker::AnalystB;
    state.record_node("analyst_a_intro");
    Ok(state)
}

/// Fixed self-introduction for the data-integrity analyst.
pub async fn analyst_b_intro_node(
    services: &mut NodeServices<'_>,
    mut state: ConversationState,
) -> Result<ConversationState, PodcastError> {
    let line = services.config.personas.analyst_b.intro_line.clone();
    services.speak(&mut state, Speaker::AnalystB, &line).await?;
    state.analyst_b.add_generated_line(&line);
    state.current_speaker = Speaker::Host;
    state.record_node("analyst_b_intro");
    Ok(state)
}

/// Host frames the episode topic from the data context. First LLM call of
/// the run; also resets the turn counter for the discussion that follows.
pub async fn topic_intro_node(
    services: &mut NodeServices<'_>,
    mut state: ConversationState,
) -> Result<ConversationState, PodcastError> {
    let system = services.config.personas.host.topic_system_prompt.clone();
    let user = format!(
        "Topic: {}.\nData context: {}\nIntroduce the key trends the analysts should discuss.",
        state.topic, state.context.summary
    );
    let raw = services.generator.generate(&system, &user, 120, 0.4).await?;
    let line = ensure_complete_sentence(&raw);

    services.speak(&mut state, Speaker::Host, &line).await?;
    state.host.topic = state.topic.clone();
    state.host.add_generated_line(&line);
    state.current_turn = 0.0;
    state.current_speaker = Speaker::AnalystA;
    state.record_node("topic_intro");
    Ok(state)
}

/// One discussion turn for the recommendations analyst.
pub async fn analyst_a_turn_node(
    services: &mut NodeServices<'_>,
    mut state: ConversationState,
) -> Result<ConversationState, PodcastError> {
    let line = analyst_line(services, &state, Speaker::AnalystA).await?;

    services.speak(&mut state, Speaker::AnalystA, &line).await?;
    if let Some(heard) = state.last_line_of(Speaker::AnalystB).map(str::to_string) {
        state.analyst_a.add_context(Speaker::AnalystB, &heard);
    }
    state.analyst_a.increment_turn();
    state.analyst_a.add_generated_line(&line);
    for recommendation in extract_recommendations(&line) {
        state.analyst_a.add_recommendation(&recommendation);
    }

    state.current_turn += 0.5;
    state.current_speaker = if should_continue(state.current_turn, state.max_turns) {
        Speaker::AnalystB
    } else {
        Speaker::Host
    };
    state.record_node("analyst_a_turn");
    Ok(state)
}

/// One discussion turn for the data-integrity analyst. After speaking, the
/// termination predicate decides whether the exchange loops back or the
/// host wraps up.
pub async fn analyst_b_turn_node(
    services: &mut NodeServices<'_>,
    mut state: ConversationState,
) -> Result<ConversationState, PodcastError> {
    let line = analyst_line(services, &state, Speaker::AnalystB).await?;

    services.speak(&mut state, Speaker::AnalystB, &line).await?;
    if let Some(heard) = state.last_line_of(Speaker::AnalystA).map(str::to_string) {
        state.analyst_b.add_context(Speaker::AnalystA, &heard);
    }
    state.analyst_b.increment_turn();
    state.analyst_b.add_generated_line(&line);

    let low = line.to_lowercase();
    if low.contains("valid") || low.contains("check") {
        state.analyst_b.add_validation(&head(&line, 100));
    }
    if low.contains("concern") || low.contains("issue") {
        state.analyst_b.add_data_concern(&head(&line, 100));
    }

    state.current_turn += 0.5;
    state.current_speaker = if should_continue(state.current_turn, state.max_turns) {
        Speaker::AnalystA
    } else {
        Speaker::Host
    };
    state.record_node("analyst_b_turn");
    Ok(state)
}

/// Fixed host sign-off. Terminal node.
pub async fn host_outro_node(
    services: &mut NodeServices<'_>,
    mut state: ConversationState,
) -> Result<ConversationState, PodcastError> {
    let line = services.config.personas.host.outro_line.clone();
    services.speak(&mut state, Speaker::Host, &line).await?;
    state.host.outro_completed = true;
    state.host.add_generated_line(&line);
    state.current_speaker = Speaker::End;
    state.record_node("host_outro");
    Ok(state)
}

/// Generate and post-process one analyst line: LLM call, conversation
/// dynamics, sentence finishing.
async fn analyst_line(
    services: &mut NodeServices<'_>,
    state: &ConversationState,
    speaker: Speaker,
) -> Result<String, PodcastError> {
    let personas = &services.config.personas;
    let persona = personas
        .analyst(speaker)
        .ok_or_else(|| PodcastError::Generation(format!("{:?} is not an analyst", speaker)))?;
    let other = match speaker {
        Speaker::AnalystA => Speaker::AnalystB,
        _ => Speaker::AnalystA,
    };
    let other_name = personas.display_name(other);
    let turns_taken = match speaker {
        Speaker::AnalystA => state.analyst_a.turns_taken,
        _ => state.analyst_b.turns_taken,
    };

    // First A-turn responds to the host's framing, not to the other analyst.
    let heard = state
        .last_line_of(other)
        .or_else(|| state.last_line_of(Speaker::Host))
        .unwrap_or("(nothing yet)");
    let heard_from = if state.last_line_of(other).is_some() {
        other_name.to_string()
    } else {
        personas.display_name(Speaker::Host).to_string()
    };

    let user = format!(
        "Context: {}\n{} just said: '{}'. Respond in ONE sentence; {}; do not invent numbers.",
        state.context.summary, heard_from, heard, persona.turn_instruction
    );
    let raw = services
        .generator
        .generate(
            &persona.system_prompt,
            &user,
            services.config.llm.max_tokens,
            services.config.llm.temperature,
        )
        .await?;

    let styled = services.dynamics.apply(
        &raw,
        speaker,
        persona,
        other_name,
        turns_taken + 1,
        state.conversation_history.len(),
    );
    Ok(ensure_complete_sentence(&styled))
}

static RECOMMEND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:recommend|should|suggest|propose)\b([^.;]+)").expect("valid regex")
});

/// Pull concrete recommendation clauses out of a spoken line.
fn extract_recommendations(line: &str) -> Vec<String> {
    RECOMMEND_RE
        .captures_iter(line)
        .map(|c| c[1].trim().to_string())
        .filter(|clause| clause.len() > 5)
        .collect()
}

/// First `n` characters of a line, on a char boundary.
fn head(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;
    use crate::state::{AudioSegment, ContextSnapshot};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedGenerator {
        lines: Vec<String>,
        next: AtomicUsize,
    }

    impl ScriptedGenerator {
        fn new(lines: &[&str]) -> Self {
            Self {
                lines: lines.iter().map(|s| s.to_string()).collect(),
                next: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LineGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            _system: &str,
            _user: &str,
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<String, PodcastError> {
            let i = self.next.fetch_add(1, Ordering::SeqCst);
            Ok(self.lines[i % self.lines.len()].clone())
        }
    }

    struct SilentSynthesizer;

    #[async_trait]
    impl SpeechSynthesizer for SilentSynthesizer {
        async fn synthesize(
            &self,
            _text: &str,
            speaker: Speaker,
            dir: &Path,
        ) -> Result<AudioSegment, PodcastError> {
            let path = dir.join(format!("seg_{}.wav", uuid::Uuid::new_v4().simple()));
            std::fs::write(&path, b"")?;
            Ok(AudioSegment { path, speaker })
        }
    }

    fn state() -> ConversationState {
        let mut s = ConversationState::new(
            "session_test".to_string(),
            "ASA trends".to_string(),
            ContextSnapshot {
                content: "{}".to_string(),
                summary: "{}".to_string(),
                files: vec![],
            },
            6,
        );
        s.current_speaker = Speaker::Host;
        s
    }

    struct TestRig {
        config: crate::config::Config,
        generator: ScriptedGenerator,
        synthesizer: SilentSynthesizer,
        dynamics: ConversationDynamics,
        dir: tempfile::TempDir,
    }

    impl TestRig {
        fn new(generator_lines: &[&str]) -> Self {
            let config = default_config();
            let dynamics = ConversationDynamics::new(config.dynamics.clone(), Some(7));
            Self {
                config,
                generator: ScriptedGenerator::new(generator_lines),
                synthesizer: SilentSynthesizer,
                dynamics,
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn services(&mut self) -> NodeServices<'_> {
            NodeServices {
                config: &self.config,
                generator: &self.generator,
                synthesizer: &self.synthesizer,
                dynamics: &mut self.dynamics,
                segment_dir: self.dir.path(),
            }
        }
    }

    #[tokio::test]
    async fn test_host_intro_records_one_line() {
        let mut rig = TestRig::new(&[]);
        let out = host_intro_node(&mut rig.services(), state()).await.unwrap();
        assert_eq!(out.conversation_history.len(), 1);
        assert!(out.lines_in_lockstep());
        assert!(out.host.intro_completed);
        assert_eq!(out.current_speaker, Speaker::AnalystA);
        assert_eq!(out.node_history.last().unwrap().node, "host_intro");
        assert!(out.script_lines[0].starts_with("Nova: "));
    }

    #[tokio::test]
    async fn test_topic_intro_finishes_sentence_and_resets_turn() {
        let mut s = state();
        s.current_turn = 3.0; // stale value that must be reset
        let mut rig = TestRig::new(&["Today we look at **answer speed**"]);
        let out = topic_intro_node(&mut rig.services(), s).await.unwrap();
        assert_eq!(out.current_turn, 0.0);
        assert_eq!(out.current_speaker, Speaker::AnalystA);
        let line = &out.conversation_history[0].text;
        assert!(line.ends_with('.'), "{:?}", line);
        assert!(!line.contains('*'));
    }

    #[tokio::test]
    async fn test_analyst_a_turn_advances_half_and_extracts_recommendation() {
        let mut s = state();
        s.record_line(
            Speaker::Host,
            "Nova",
            "Answer speed rose sharply.",
            PathBuf::from("host.wav"),
        );
        s.current_speaker = Speaker::AnalystA;
        let mut rig =
            TestRig::new(&["We should smooth the series with a rolling average before reacting"]);
        let out = analyst_a_turn_node(&mut rig.services(), s).await.unwrap();
        assert_eq!(out.current_turn, 0.5);
        assert_eq!(out.analyst_a.turns_taken, 1);
        assert_eq!(out.current_speaker, Speaker::AnalystB);
        assert_eq!(out.analyst_a.recommendations.len(), 1);
        assert!(out.analyst_a.recommendations[0].contains("rolling average"));
        assert!(out.lines_in_lockstep());
    }

    #[tokio::test]
    async fn test_analyst_b_turn_records_validation_and_loops_back() {
        let mut s = state();
        s.record_line(
            Speaker::AnalystA,
            "Reco",
            "Smooth the series first.",
            PathBuf::from("a.wav"),
        );
        s.current_speaker = Speaker::AnalystB;
        s.current_turn = 0.5;
        let mut rig = TestRig::new(&[
            "Before smoothing we need to check the timestamp quality in the raw export",
        ]);
        let out = analyst_b_turn_node(&mut rig.services(), s).await.unwrap();
        assert_eq!(out.current_turn, 1.0);
        assert_eq!(out.current_speaker, Speaker::AnalystA);
        assert_eq!(out.analyst_b.validations.len(), 1);
        assert_eq!(out.analyst_b.context_log().count(), 1);
    }

    #[tokio::test]
    async fn test_analyst_b_turn_hands_to_host_at_budget() {
        let mut s = state();
        s.record_line(
            Speaker::AnalystA,
            "Reco",
            "Final thought on staffing.",
            PathBuf::from("a.wav"),
        );
        s.current_speaker = Speaker::AnalystB;
        s.current_turn = 5.5;
        let mut rig =
            TestRig::new(&["Agreed on the staffing model once the queue mapping is verified"]);
        let out = analyst_b_turn_node(&mut rig.services(), s).await.unwrap();
        assert_eq!(out.current_turn, 6.0);
        assert_eq!(out.current_speaker, Speaker::Host);
    }

    #[tokio::test]
    async fn test_host_outro_terminates() {
        let mut rig = TestRig::new(&[]);
        let out = host_outro_node(&mut rig.services(), state()).await.unwrap();
        assert_eq!(out.current_speaker, Speaker::End);
        assert!(out.host.outro_completed);
        assert_eq!(out.node_history.last().unwrap().node, "host_outro");
    }

    #[test]
    fn test_extract_recommendations() {
        let found =
            extract_recommendations("I recommend a control chart; we should also cap outliers.");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], "a control chart");
        assert!(extract_recommendations("No advice here.").is_empty());
    }
}
