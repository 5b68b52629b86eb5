//! Shared conversation state and per-agent state records.
//!
//! One `ConversationState` is created per generation request and threaded by
//! value through every phase node; each node returns the replacement state.
//! Nothing here is shared across concurrent runs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;

/// Whose turn is next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Host,
    AnalystA,
    AnalystB,
    End,
}

/// One spoken line in the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Speaker,
    pub content: String,
}

/// One `{speaker, text}` transcript entry; the authoritative history used as
/// LLM context for subsequent turns.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub speaker: Speaker,
    pub text: String,
}

/// Handle to one synthesized audio clip, in speaking order.
#[derive(Debug, Clone, Serialize)]
pub struct AudioSegment {
    pub path: PathBuf,
    pub speaker: Speaker,
}

/// Execution trace entry for observability.
#[derive(Debug, Clone, Serialize)]
pub struct NodeTrace {
    pub node: &'static str,
    pub timestamp: DateTime<Utc>,
    pub speaker_after: Speaker,
    pub turn: f64,
}

/// Opaque context blob consumed by LLM prompts.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ContextSnapshot {
    pub content: String,
    /// Truncated form embedded in per-turn prompts.
    pub summary: String,
    pub files: Vec<String>,
}

/// Host agent state, mutated only by the host's phase nodes.
#[derive(Debug, Clone, Serialize)]
pub struct HostState {
    pub session_id: String,
    pub topic: String,
    pub intro_completed: bool,
    pub outro_completed: bool,
    pub generated_lines: Vec<String>,
}

impl HostState {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            topic: String::new(),
            intro_completed: false,
            outro_completed: false,
            generated_lines: Vec::new(),
        }
    }

    pub fn add_generated_line(&mut self, line: &str) {
        self.generated_lines.push(line.to_string());
    }

    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "session_id": self.session_id,
            "topic": self.topic,
            "intro_completed": self.intro_completed,
            "outro_completed": self.outro_completed,
            "total_lines": self.generated_lines.len(),
        })
    }
}

/// Bounded per-agent context log entry.
#[derive(Debug, Clone, Serialize)]
pub struct ContextLogEntry {
    pub speaker: Speaker,
    pub text: String,
    pub turn: u32,
}

/// Most recent context entries an analyst keeps for local use.
const CONTEXT_LOG_CAP: usize = 10;

/// Analyst agent state. Each analyst owns exactly one of these; the other
/// analyst's nodes never read or write it.
#[derive(Debug, Clone, Serialize)]
pub struct AnalystState {
    pub session_id: String,
    pub role: Speaker,
    /// Never exceeds the number of lines this role has actually spoken.
    pub turns_taken: u32,
    pub generated_lines: Vec<String>,
    pub recommendations: Vec<String>,
    pub validations: Vec<String>,
    pub data_concerns: Vec<String>,
    pub last_opener: Option<String>,
    context_log: VecDeque<ContextLogEntry>,
}

impl AnalystState {
    pub fn new(session_id: &str, role: Speaker) -> Self {
        Self {
            session_id: session_id.to_string(),
            role,
            turns_taken: 0,
            generated_lines: Vec::new(),
            recommendations: Vec::new(),
            validations: Vec::new(),
            data_concerns: Vec::new(),
            last_opener: None,
            context_log: VecDeque::new(),
        }
    }

    pub fn increment_turn(&mut self) {
        self.turns_taken += 1;
    }

    pub fn add_generated_line(&mut self, line: &str) {
        self.generated_lines.push(line.to_string());
    }

    pub fn add_recommendation(&mut self, recommendation: &str) {
        self.recommendations.push(recommendation.to_string());
    }

    pub fn add_validation(&mut self, validation: &str) {
        self.validations.push(validation.to_string());
    }

    pub fn add_data_concern(&mut self, concern: &str) {
        let concern = concern.to_string();
        if !self.data_concerns.contains(&concern) {
            self.data_concerns.push(concern);
        }
    }

    /// FIFO-bounded log of recent conversation context for this agent.
    pub fn add_context(&mut self, speaker: Speaker, text: &str) {
        self.context_log.push_back(ContextLogEntry {
            speaker,
            text: text.to_string(),
            turn: self.turns_taken,
        });
        while self.context_log.len() > CONTEXT_LOG_CAP {
            self.context_log.pop_front();
        }
    }

    pub fn context_log(&self) -> impl Iterator<Item = &ContextLogEntry> {
        self.context_log.iter()
    }

    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "session_id": self.session_id,
            "turns_taken": self.turns_taken,
            "recommendations": self.recommendations.len(),
            "validations": self.validations.len(),
            "data_concerns": self.data_concerns.len(),
            "context_entries": self.context_log.len(),
        })
    }
}

/// The single shared state record passed through every phase node.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationState {
    pub messages: Vec<ChatMessage>,
    pub conversation_history: Vec<HistoryEntry>,
    pub script_lines: Vec<String>,
    pub audio_segments: Vec<AudioSegment>,
    pub current_speaker: Speaker,
    /// Half-integer counter; +0.5 per analyst utterance.
    pub current_turn: f64,
    /// Budget of full A/B exchange pairs.
    pub max_turns: u32,
    pub topic: String,
    pub context: ContextSnapshot,
    pub session_id: String,
    pub node_history: Vec<NodeTrace>,
    pub host: HostState,
    pub analyst_a: AnalystState,
    pub analyst_b: AnalystState,
}

impl ConversationState {
    pub fn new(
        session_id: String,
        topic: String,
        context: ContextSnapshot,
        max_turns: u32,
    ) -> Self {
        Self {
            messages: Vec::new(),
            conversation_history: Vec::new(),
            script_lines: Vec::new(),
            audio_segments: Vec::new(),
            current_speaker: Speaker::Host,
            current_turn: 0.0,
            max_turns,
            topic,
            context,
            host: HostState::new(&session_id),
            analyst_a: AnalystState::new(&session_id, Speaker::AnalystA),
            analyst_b: AnalystState::new(&session_id, Speaker::AnalystB),
            session_id,
            node_history: Vec::new(),
        }
    }

    /// Append one spoken line with its audio clip and script entry in
    /// lock-step. This is the only way lines enter the state, which keeps
    /// `audio_segments`, `conversation_history`, and `script_lines` the same
    /// length after every node.
    pub fn record_line(&mut self, speaker: Speaker, display_name: &str, text: &str, path: PathBuf) {
        self.messages.push(ChatMessage {
            role: speaker,
            content: text.to_string(),
        });
        self.conversation_history.push(HistoryEntry {
            speaker,
            text: text.to_string(),
        });
        self.script_lines.push(format!("{}: {}", display_name, text));
        self.audio_segments.push(AudioSegment { path, speaker });
    }

    pub fn record_node(&mut self, node: &'static str) {
        self.node_history.push(NodeTrace {
            node,
            timestamp: Utc::now(),
            speaker_after: self.current_speaker,
            turn: self.current_turn,
        });
    }

    /// Most recent line spoken by `speaker`, if any.
    pub fn last_line_of(&self, speaker: Speaker) -> Option<&str> {
        self.conversation_history
            .iter()
            .rev()
            .find(|e| e.speaker == speaker)
            .map(|e| e.text.as_str())
    }

    /// True when the three per-line sequences are in lock-step.
    pub fn lines_in_lockstep(&self) -> bool {
        self.audio_segments.len() == self.conversation_history.len()
            && self.conversation_history.len() == self.script_lines.len()
    }

    pub fn analyst_lines_spoken(&self) -> usize {
        self.conversation_history
            .iter()
            .filter(|e| matches!(e.speaker, Speaker::AnalystA | Speaker::AnalystB))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ConversationState {
        ConversationState::new(
            "session_test".to_string(),
            "topic".to_string(),
            ContextSnapshot::default(),
            6,
        )
    }

    #[test]
    fn test_record_line_keeps_lockstep() {
        let mut s = state();
        assert!(s.lines_in_lockstep());
        s.record_line(Speaker::Host, "Nova", "Hello.", PathBuf::from("a.wav"));
        s.record_line(Speaker::AnalystA, "Reco", "Hi.", PathBuf::from("b.wav"));
        assert!(s.lines_in_lockstep());
        assert_eq!(s.script_lines[1], "Reco: Hi.");
        assert_eq!(s.messages.len(), 2);
    }

    #[test]
    fn test_last_line_of() {
        let mut s = state();
        s.record_line(Speaker::AnalystA, "Reco", "First.", PathBuf::from("a.wav"));
        s.record_line(Speaker::AnalystB, "Stat", "Second.", PathBuf::from("b.wav"));
        s.record_line(Speaker::AnalystA, "Reco", "Third.", PathBuf::from("c.wav"));
        assert_eq!(s.last_line_of(Speaker::AnalystA), Some("Third."));
        assert_eq!(s.last_line_of(Speaker::AnalystB), Some("Second."));
        assert_eq!(s.last_line_of(Speaker::Host), None);
    }

    #[test]
    fn test_analyst_context_log_is_bounded() {
        let mut a = AnalystState::new("s", Speaker::AnalystA);
        for i in 0..15 {
            a.add_context(Speaker::AnalystB, &format!("line {}", i));
        }
        assert_eq!(a.context_log().count(), 10);
        // FIFO eviction: the oldest entries are gone.
        assert_eq!(a.context_log().next().unwrap().text, "line 5");
    }

    #[test]
    fn test_data_concerns_deduplicated() {
        let mut b = AnalystState::new("s", Speaker::AnalystB);
        b.add_data_concern("duplicate keys");
        b.add_data_concern("duplicate keys");
        b.add_data_concern("null timestamps");
        assert_eq!(b.data_concerns.len(), 2);
    }

    #[test]
    fn test_status_summaries() {
        let mut a = AnalystState::new("s", Speaker::AnalystA);
        a.increment_turn();
        a.add_recommendation("use a rolling average");
        let status = a.status();
        assert_eq!(status["turns_taken"], 1);
        assert_eq!(status["recommendations"], 1);

        let h = HostState::new("s");
        assert_eq!(h.status()["intro_completed"], false);
    }
}
