//! Turn orchestration: the explicit phase state machine that sequences the
//! show, runs each node, and finalizes the audio and script artifacts.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audio::{concatenate, total_duration};
use crate::config::Config;
use crate::context::{ContextSelector, PodcastContext, infer_topic};
use crate::dynamics::ConversationDynamics;
use crate::error::PodcastError;
use crate::llm::LineGenerator;
use crate::nodes::{
    NodeServices, analyst_a_intro_node, analyst_a_turn_node, analyst_b_intro_node,
    analyst_b_turn_node, host_intro_node, host_outro_node, topic_intro_node,
};
use crate::state::{ConversationState, Speaker};
use crate::tts::SpeechSynthesizer;

/// The phases of one episode, in the order the machine can visit them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    HostIntro,
    AnalystAIntro,
    AnalystBIntro,
    TopicIntro,
    AnalystATurn,
    AnalystBTurn,
    HostOutro,
    End,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::HostIntro => "host_intro",
            Phase::AnalystAIntro => "analyst_a_intro",
            Phase::AnalystBIntro => "analyst_b_intro",
            Phase::TopicIntro => "topic_intro",
            Phase::AnalystATurn => "analyst_a_turn",
            Phase::AnalystBTurn => "analyst_b_turn",
            Phase::HostOutro => "host_outro",
            Phase::End => "end",
        }
    }
}

/// Whether the analyst exchange keeps going after a spoken half-turn.
///
/// The counter advances by 0.5 per analyst line, so a budget of `max_turns`
/// full exchanges ends when the counter reaches `max_turns` within a 0.1
/// tolerance. Well past the budget the run is cut off unconditionally.
pub fn should_continue(current_turn: f64, max_turns: u32) -> bool {
    let max = max_turns as f64;
    if current_turn > max + 2.0 {
        warn!(current_turn, max_turns, "turn counter ran past budget, forcing end");
        return false;
    }
    !(current_turn > max - 0.1)
}

/// The transition table. Nodes decide the next speaker; this maps the phase
/// just run plus that decision onto the next phase.
fn next_phase(phase: Phase, speaker_after: Speaker) -> Phase {
    match phase {
        Phase::HostIntro => Phase::AnalystAIntro,
        Phase::AnalystAIntro => Phase::AnalystBIntro,
        Phase::AnalystBIntro => Phase::TopicIntro,
        Phase::TopicIntro => Phase::AnalystATurn,
        Phase::AnalystATurn => match speaker_after {
            Speaker::AnalystB => Phase::AnalystBTurn,
            _ => Phase::HostOutro,
        },
        Phase::AnalystBTurn => match speaker_after {
            Speaker::AnalystA => Phase::AnalystATurn,
            _ => Phase::HostOutro,
        },
        Phase::HostOutro | Phase::End => Phase::End,
    }
}

/// One generation request.
#[derive(Debug, Clone)]
pub struct PodcastRequest {
    /// Episode topic; inferred from the context when absent.
    pub topic: Option<String>,
    /// Budget of full A/B exchange pairs.
    pub max_turns: u32,
    pub context_dir: PathBuf,
    pub context: ContextSelector,
    pub session_id: Option<String>,
    /// Hard cap on node executions before the run is declared stuck.
    pub step_limit: u32,
    pub output_dir: PathBuf,
    /// Also write a JSON execution trace next to the audio and script.
    pub write_trace: bool,
}

impl Default for PodcastRequest {
    fn default() -> Self {
        Self {
            topic: None,
            max_turns: 6,
            context_dir: PathBuf::from("."),
            context: ContextSelector::Both,
            session_id: None,
            step_limit: 60,
            output_dir: PathBuf::from("."),
            write_trace: false,
        }
    }
}

/// What a completed run produced.
#[derive(Debug, Clone, Serialize)]
pub struct PodcastSummary {
    pub session_id: String,
    pub audio_file: PathBuf,
    pub script_file: PathBuf,
    pub trace_file: Option<PathBuf>,
    pub topic: String,
    pub turns_completed: f64,
    pub duration_seconds: f64,
    pub workflow_type: String,
    pub timestamp: DateTime<Utc>,
}

/// Progress events surfaced to the caller during a run.
#[derive(Debug, Clone)]
pub enum PodcastEvent {
    Started {
        session_id: String,
        topic: String,
    },
    PhaseStarted {
        phase: &'static str,
    },
    LineSpoken {
        speaker: Speaker,
        name: String,
        text: String,
    },
    Finalizing,
    Completed {
        audio_file: PathBuf,
        duration_seconds: f64,
    },
}

pub type EventCallback = Box<dyn Fn(&PodcastEvent) + Send + Sync>;

/// Drives one episode end to end: phase loop, collaborators, finalizer.
pub struct PodcastOrchestrator {
    config: Config,
    generator: Arc<dyn LineGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    dynamics: ConversationDynamics,
    callback: Option<EventCallback>,
}

impl PodcastOrchestrator {
    /// `seed` pins the conversation-dynamics random stream; `None` gives a
    /// fresh stream per process.
    pub fn new(
        config: Config,
        generator: Arc<dyn LineGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        seed: Option<u64>,
    ) -> Self {
        let dynamics = ConversationDynamics::new(config.dynamics.clone(), seed);
        Self {
            config,
            generator,
            synthesizer,
            dynamics,
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: EventCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    fn emit(&self, event: PodcastEvent) {
        if let Some(callback) = &self.callback {
            callback(&event);
        }
    }

    /// Run one episode. Context problems surface before any phase runs;
    /// collaborator failures surface wrapped with the phase that hit them.
    pub async fn generate(
        &mut self,
        request: PodcastRequest,
    ) -> Result<PodcastSummary, PodcastError> {
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| format!("session_{}", &Uuid::new_v4().simple().to_string()[..8]));

        let context = PodcastContext::load(&request.context_dir, request.context)?;
        let topic = request
            .topic
            .clone()
            .unwrap_or_else(|| infer_topic(&context.content));

        info!(%session_id, %topic, max_turns = request.max_turns, "starting episode");
        self.emit(PodcastEvent::Started {
            session_id: session_id.clone(),
            topic: topic.clone(),
        });

        // Segments live here and vanish with the run, success or not.
        let segment_dir = tempfile::tempdir()?;

        let mut state = ConversationState::new(
            session_id.clone(),
            topic.clone(),
            context.snapshot(),
            request.max_turns,
        );

        let mut phase = Phase::HostIntro;
        let mut steps: u32 = 0;
        while phase != Phase::End {
            steps += 1;
            if steps > request.step_limit {
                warn!(
                    steps,
                    limit = request.step_limit,
                    %session_id,
                    "workflow did not converge"
                );
                return Err(PodcastError::NonConvergence {
                    steps,
                    limit: request.step_limit,
                });
            }
            self.emit(PodcastEvent::PhaseStarted { phase: phase.name() });

            let turn_before = state.current_turn;
            let lines_before = state.conversation_history.len();
            state = {
                let mut services = NodeServices {
                    config: &self.config,
                    generator: self.generator.as_ref(),
                    synthesizer: self.synthesizer.as_ref(),
                    dynamics: &mut self.dynamics,
                    segment_dir: segment_dir.path(),
                };
                run_phase(phase, &mut services, state).await
            }
            .map_err(|e| e.in_node(phase.name(), turn_before, &session_id))?;
            debug_assert!(state.lines_in_lockstep());

            if state.conversation_history.len() > lines_before {
                let entry = state.conversation_history.last().unwrap();
                self.emit(PodcastEvent::LineSpoken {
                    speaker: entry.speaker,
                    name: self.config.personas.display_name(entry.speaker).to_string(),
                    text: entry.text.clone(),
                });
            }

            phase = next_phase(phase, state.current_speaker);
        }

        self.emit(PodcastEvent::Finalizing);
        let summary = self.finalize(&request, state)?;
        self.emit(PodcastEvent::Completed {
            audio_file: summary.audio_file.clone(),
            duration_seconds: summary.duration_seconds,
        });
        Ok(summary)
    }

    /// Concatenate the audio, write the script, and optionally dump the
    /// execution trace.
    fn finalize(
        &self,
        request: &PodcastRequest,
        state: ConversationState,
    ) -> Result<PodcastSummary, PodcastError> {
        std::fs::create_dir_all(&request.output_dir)?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S");

        // Measured before concatenation so a fallback output path cannot
        // skew it.
        let duration_seconds = total_duration(&state.audio_segments);

        let audio_target = request.output_dir.join(format!("metricast_{}.wav", stamp));
        let audio_file = concatenate(&state.audio_segments, &audio_target)?;

        let script_file = request
            .output_dir
            .join(format!("metricast_script_{}.txt", stamp));
        let mut script = state.script_lines.join("\n");
        script.push('\n');
        std::fs::write(&script_file, script)?;

        let trace_file = if request.write_trace {
            let path = request
                .output_dir
                .join(format!("metricast_trace_{}.json", stamp));
            let trace = serde_json::json!({
                "session_id": state.session_id,
                "topic": state.topic,
                "context_files": state.context.files,
                "node_history": state.node_history,
                "host": state.host.status(),
                "analyst_a": state.analyst_a.status(),
                "analyst_b": state.analyst_b.status(),
            });
            std::fs::write(&path, serde_json::to_string_pretty(&trace)?)?;
            Some(path)
        } else {
            None
        };

        info!(
            audio = %audio_file.display(),
            duration_seconds,
            "episode complete"
        );
        Ok(PodcastSummary {
            session_id: state.session_id,
            audio_file,
            script_file,
            trace_file,
            topic: state.topic,
            turns_completed: state.current_turn,
            duration_seconds,
            workflow_type: "scripted_podcast".to_string(),
            timestamp: Utc::now(),
        })
    }
}

async fn run_phase(
    phase: Phase,
    services: &mut NodeServices<'_>,
    state: ConversationState,
) -> Result<ConversationState, PodcastError> {
    match phase {
        Phase::HostIntro => host_intro_node(services, state).await,
        Phase::AnalystAIntro => analyst_a_intro_node(services, state).await,
        Phase::AnalystBIntro => analyst_b_intro_node(services, state).await,
        Phase::TopicIntro => topic_intro_node(services, state).await,
        Phase::AnalystATurn => analyst_a_turn_node(services, state).await,
        Phase::AnalystBTurn => analyst_b_turn_node(services, state).await,
        Phase::HostOutro => host_outro_node(services, state).await,
        Phase::End => Ok(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav_duration;
    use crate::config::default_config;
    use crate::state::AudioSegment;
    use async_trait::async_trait;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_should_continue_within_budget() {
        assert!(should_continue(0.5, 6));
        assert!(should_continue(5.5, 6));
        assert!(should_continue(5.9, 6));
    }

    #[test]
    fn test_should_continue_ends_at_budget() {
        assert!(!should_continue(6.0, 6));
        assert!(!should_continue(6.5, 6));
    }

    #[test]
    fn test_should_continue_forces_end_past_budget() {
        assert!(!should_continue(9.0, 6));
    }

    #[test]
    fn test_next_phase_table() {
        assert_eq!(next_phase(Phase::HostIntro, Speaker::AnalystA), Phase::AnalystAIntro);
        assert_eq!(next_phase(Phase::TopicIntro, Speaker::AnalystA), Phase::AnalystATurn);
        assert_eq!(
            next_phase(Phase::AnalystBTurn, Speaker::AnalystA),
            Phase::AnalystATurn
        );
        assert_eq!(next_phase(Phase::AnalystBTurn, Speaker::Host), Phase::HostOutro);
        assert_eq!(next_phase(Phase::HostOutro, Speaker::End), Phase::End);
    }

    struct ScriptedGenerator {
        lines: Vec<String>,
        next: AtomicUsize,
        fail: bool,
    }

    impl ScriptedGenerator {
        fn cycling(lines: &[&str]) -> Self {
            Self {
                lines: lines.iter().map(|s| s.to_string()).collect(),
                next: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                lines: vec![],
                next: AtomicUsize::new(0),
                fail: true,
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
            if self.fail {
                return Err(PodcastError::Generation("scripted failure".to_string()));
            }
            let i = self.next.fetch_add(1, Ordering::SeqCst);
            Ok(self.lines[i % self.lines.len()].clone())
        }
    }

    /// Writes a real 0.1 s WAV per line so the finalizer has something to
    /// measure and concatenate.
    struct FixtureSynthesizer;

    #[async_trait]
    impl SpeechSynthesizer for FixtureSynthesizer {
        async fn synthesize(
            &self,
            _text: &str,
            speaker: Speaker,
            dir: &Path,
        ) -> Result<AudioSegment, PodcastError> {
            let path = dir.join(format!("seg_{}.wav", Uuid::new_v4().simple()));
            let spec = WavSpec {
                channels: 1,
                sample_rate: 24000,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            };
            let mut writer = WavWriter::create(&path, spec)?;
            for i in 0..2400 {
                writer.write_sample((i % 32) as i16)?;
            }
            writer.finalize()?;
            Ok(AudioSegment { path, speaker })
        }
    }

    fn context_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("data.json"),
            r#"{"metric_name": "ASA", "value": 697}"#,
        )
        .unwrap();
        dir
    }

    fn orchestrator(generator: ScriptedGenerator) -> PodcastOrchestrator {
        PodcastOrchestrator::new(
            default_config(),
            Arc::new(generator),
            Arc::new(FixtureSynthesizer),
            Some(11),
        )
    }

    fn request(context: &tempfile::TempDir, output: &tempfile::TempDir, max_turns: u32) -> PodcastRequest {
        PodcastRequest {
            max_turns,
            context_dir: context.path().to_path_buf(),
            output_dir: output.path().to_path_buf(),
            ..PodcastRequest::default()
        }
    }

    const TURN_LINES: &[&str] = &[
        "The queue data points to a staffing gap we can close with a rolling forecast",
        "That holds once we check the timestamp quality in the export",
    ];

    #[tokio::test]
    async fn test_single_turn_episode_produces_seven_lines() {
        let context = context_dir();
        let output = tempfile::tempdir().unwrap();
        let mut orchestrator = orchestrator(ScriptedGenerator::cycling(TURN_LINES));
        let mut req = request(&context, &output, 1);
        req.write_trace = true;

        let summary = orchestrator.generate(req).await.unwrap();

        // host intro, two analyst intros, topic, one A/B exchange, outro
        assert_eq!(summary.turns_completed, 1.0);
        assert!((summary.duration_seconds - 0.7).abs() < 1e-9);
        assert!((wav_duration(&summary.audio_file) - 0.7).abs() < 1e-9);
        assert_eq!(summary.topic, "Analysis of ASA and related operational metrics");

        let script = std::fs::read_to_string(&summary.script_file).unwrap();
        assert_eq!(script.lines().count(), 7);
        assert!(script.starts_with("Nova: "));

        let trace: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(summary.trace_file.unwrap()).unwrap())
                .unwrap();
        assert_eq!(trace["node_history"].as_array().unwrap().len(), 7);
        assert_eq!(
            trace["node_history"][6]["node"].as_str().unwrap(),
            "host_outro"
        );
    }

    #[tokio::test]
    async fn test_episode_speaks_two_lines_per_turn_budget() {
        for max_turns in [2u32, 6] {
            let context = context_dir();
            let output = tempfile::tempdir().unwrap();
            let mut orchestrator = orchestrator(ScriptedGenerator::cycling(TURN_LINES));
            let summary = orchestrator
                .generate(request(&context, &output, max_turns))
                .await
                .unwrap();
            assert_eq!(summary.turns_completed, max_turns as f64);
            let script = std::fs::read_to_string(&summary.script_file).unwrap();
            // 4 fixed/framing lines + outro around the analyst exchange.
            assert_eq!(script.lines().count() as u32, 5 + 2 * max_turns);
        }
    }

    /// Captures formatted tracing output so tests can assert on warnings.
    #[derive(Clone)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
        type Writer = LogCapture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_step_limit_surfaces_non_convergence_with_warning() {
        let context = context_dir();
        let output = tempfile::tempdir().unwrap();
        let mut orchestrator = orchestrator(ScriptedGenerator::cycling(TURN_LINES));
        let mut req = request(&context, &output, 6);
        req.step_limit = 3;

        let logs = LogCapture(Arc::new(Mutex::new(Vec::new())));
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let err = orchestrator.generate(req).await.unwrap_err();
        assert!(matches!(err, PodcastError::NonConvergence { limit: 3, .. }));

        let logged = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("workflow did not converge"), "{:?}", logged);
    }

    #[tokio::test]
    async fn test_missing_context_fails_before_any_phase() {
        let empty = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        let mut orchestrator = orchestrator(ScriptedGenerator::cycling(TURN_LINES))
            .with_callback(Box::new(move |event| {
                seen.lock().unwrap().push(format!("{:?}", event));
            }));
        let err = orchestrator
            .generate(request(&empty, &output, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, PodcastError::ContextMissing(_)));
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generator_failure_names_the_phase() {
        let context = context_dir();
        let output = tempfile::tempdir().unwrap();
        let mut orchestrator = orchestrator(ScriptedGenerator::failing());
        let err = orchestrator
            .generate(request(&context, &output, 1))
            .await
            .unwrap_err();
        match err {
            PodcastError::NodeFailed { node, session_id, .. } => {
                assert_eq!(node, "topic_intro");
                assert!(session_id.starts_with("session_"));
            }
            other => panic!("expected NodeFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_callback_sees_every_spoken_line() {
        let context = context_dir();
        let output = tempfile::tempdir().unwrap();
        let spoken: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = spoken.clone();
        let mut orchestrator = orchestrator(ScriptedGenerator::cycling(TURN_LINES))
            .with_callback(Box::new(move |event| {
                if let PodcastEvent::LineSpoken { name, text, .. } = event {
                    seen.lock().unwrap().push(format!("{}: {}", name, text));
                }
            }));
        let summary = orchestrator
            .generate(request(&context, &output, 1))
            .await
            .unwrap();
        let spoken = spoken.lock().unwrap();
        assert_eq!(spoken.len(), 7);
        let script = std::fs::read_to_string(&summary.script_file).unwrap();
        assert_eq!(script.lines().collect::<Vec<_>>(), spoken.iter().map(String::as_str).collect::<Vec<_>>());
    }
}
