//! Context loading and topic inference.
//!
//! The context is an opaque text blob for the LLM prompts; nothing here
//! parses its structure beyond the regex sniffing used for topic inference.

use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::warn;

use crate::error::PodcastError;
use crate::state::ContextSnapshot;

/// Which context files feed the episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSelector {
    /// Both `data.json` and `metric_data.json`.
    Both,
    /// `data.json` only.
    Data,
    /// `metric_data.json` only.
    Metrics,
}

const DATA_FILE: &str = "data.json";
const METRIC_FILE: &str = "metric_data.json";

/// Characters of context embedded in per-turn prompts.
const SUMMARY_CHARS: usize = 500;

/// Loaded context for one generation request.
#[derive(Debug, Clone)]
pub struct PodcastContext {
    pub content: String,
    pub files: Vec<String>,
}

impl PodcastContext {
    /// Load context from JSON files in `dir`. Finding nothing usable is
    /// fatal before any node runs.
    pub fn load(dir: &Path, selector: ContextSelector) -> Result<Self, PodcastError> {
        let names: &[&str] = match selector {
            ContextSelector::Both => &[DATA_FILE, METRIC_FILE],
            ContextSelector::Data => &[DATA_FILE],
            ContextSelector::Metrics => &[METRIC_FILE],
        };

        let mut content = String::new();
        let mut files = Vec::new();
        for name in names {
            let path = dir.join(name);
            if !path.exists() {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(text) => {
                    content.push_str(&format!("[{}]\n{}\n\n", name, text));
                    files.push(name.to_string());
                }
                Err(e) => warn!(file = %path.display(), error = %e, "failed to read context file"),
            }
        }

        if content.is_empty() {
            return Err(PodcastError::ContextMissing(format!(
                "need {} and/or {} in {}",
                DATA_FILE,
                METRIC_FILE,
                dir.display()
            )));
        }
        Ok(Self { content, files })
    }

    /// Snapshot carried in the conversation state, with the truncated
    /// summary used for prompts.
    pub fn snapshot(&self) -> ContextSnapshot {
        let summary = if self.content.chars().count() > SUMMARY_CHARS {
            let truncated: String = self.content.chars().take(SUMMARY_CHARS).collect();
            format!("{}...", truncated)
        } else {
            self.content.clone()
        };
        ContextSnapshot {
            content: self.content.clone(),
            summary,
            files: self.files.clone(),
        }
    }
}

static METRIC_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""metric_name"\s*:\s*"([^"]+)""#).expect("valid regex"));
static MONTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""previousMonthName"\s*:\s*"([^"]+)""#).expect("valid regex"));

/// Infer an episode topic from the raw context when none was supplied.
pub fn infer_topic(context: &str) -> String {
    if let Some(captures) = METRIC_NAME_RE.captures(context) {
        return format!(
            "Analysis of {} and related operational metrics",
            &captures[1]
        );
    }
    if let Some(captures) = MONTH_RE.captures(context) {
        return format!("{} operational metrics analysis", &captures[1]);
    }
    "Operational metrics analysis".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_both_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.json"), r#"{"a":1}"#).unwrap();
        std::fs::write(dir.path().join("metric_data.json"), r#"{"b":2}"#).unwrap();
        let context = PodcastContext::load(dir.path(), ContextSelector::Both).unwrap();
        assert_eq!(context.files, vec!["data.json", "metric_data.json"]);
        assert!(context.content.contains("[data.json]"));
        assert!(context.content.contains(r#"{"b":2}"#));
    }

    #[test]
    fn test_load_missing_is_context_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = PodcastContext::load(dir.path(), ContextSelector::Metrics).unwrap_err();
        assert!(matches!(err, PodcastError::ContextMissing(_)));
    }

    #[test]
    fn test_selector_ignores_other_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.json"), r#"{"a":1}"#).unwrap();
        let err = PodcastContext::load(dir.path(), ContextSelector::Metrics).unwrap_err();
        assert!(matches!(err, PodcastError::ContextMissing(_)));
    }

    #[test]
    fn test_snapshot_truncates_summary() {
        let context = PodcastContext {
            content: "x".repeat(600),
            files: vec![],
        };
        let snapshot = context.snapshot();
        assert_eq!(snapshot.summary.chars().count(), 503);
        assert!(snapshot.summary.ends_with("..."));
        assert_eq!(snapshot.content.len(), 600);
    }

    #[test]
    fn test_infer_topic_from_metric_name() {
        let topic = infer_topic(r#"{"metric_name": "ASA", "value": 697}"#);
        assert_eq!(topic, "Analysis of ASA and related operational metrics");
    }

    #[test]
    fn test_infer_topic_from_month() {
        let topic = infer_topic(r#"{"previousMonthName":"July"}"#);
        assert_eq!(topic, "July operational metrics analysis");
    }

    #[test]
    fn test_infer_topic_default() {
        assert_eq!(infer_topic("{}"), "Operational metrics analysis");
    }
}
