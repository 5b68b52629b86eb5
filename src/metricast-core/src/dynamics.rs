//! Conversation dynamics: post-processing that makes generated analyst lines
//! sound like a live exchange instead of isolated model output.
//!
//! Applied in a fixed order per line: strip forbidden openers, vary the
//! opening, add at most one conversational element, clean repetition. All
//! randomness comes from one explicitly seeded generator so tests can pin a
//! seed and assert exact output.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

use crate::config::{AnalystPersona, DynamicsConfig};
use crate::state::Speaker;

const IMPORTANCE_WORDS: &[&str] = &["important", "crucial", "critical", "significant", "essential"];
const CONTRAST_WORDS: &[&str] = &["but", "however", "although", "disagree", "challenge", "contrary"];
const SURPRISE_WORDS: &[&str] = &[
    "surprising",
    "shocking",
    "unexpected",
    "dramatic",
    "remarkable",
    "concerning",
];
const AGREEMENT_WORDS: &[&str] = &["agree", "right", "correct", "valid"];

const EMPHATICS: &[&str] = &["Surprisingly, ", "Interestingly, ", "Remarkably, ", "Unexpectedly, "];
const ACKNOWLEDGMENTS: &[&str] = &[
    "I see what you're saying, ",
    "That's a good point, ",
    "I understand your perspective, ",
    "You make a valid observation, ",
];
const INTERRUPTIONS: &[&str] = &[
    "If I might add, ",
    "Building on that, ",
    "To expand on your point, ",
    "Another way to look at this is ",
];
const AGREEMENTS: &[&str] = &[
    "I agree with that approach, ",
    "That makes sense, ",
    "You're right about that, ",
    "That's a solid recommendation, ",
];
const DISAGREEMENTS: &[&str] = &[
    "I have a slightly different view, ",
    "Another perspective to consider, ",
    "We might approach this differently, ",
    "Let me offer an alternative take, ",
];

pub struct ConversationDynamics {
    rng: StdRng,
    cfg: DynamicsConfig,
    last_openers: HashMap<Speaker, String>,
}

impl ConversationDynamics {
    /// `seed` fixes the random stream for reproducible output; `None` seeds
    /// from the OS.
    pub fn new(cfg: DynamicsConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng,
            cfg,
            last_openers: HashMap::new(),
        }
    }

    /// Full pipeline for one analyst line: strip, vary opening, add one
    /// element, clean repetition.
    pub fn apply(
        &mut self,
        text: &str,
        speaker: Speaker,
        persona: &AnalystPersona,
        other_name: &str,
        turn_count: u32,
        history_len: usize,
    ) -> String {
        let text = self.strip_forbidden_openers(text, persona);
        let text = self.vary_opening(&text, speaker, persona);
        let text =
            self.add_conversational_elements(&text, other_name, turn_count, history_len);
        self.clean_repetition(&text, &[&persona.name, other_name], &persona.openers)
    }

    /// Remove a forbidden lead-in word or phrase, plus any punctuation and
    /// whitespace that trailed it.
    pub fn strip_forbidden_openers(&self, text: &str, persona: &AnalystPersona) -> String {
        let trimmed = text.trim();
        let mut forbidden: Vec<&String> = persona.forbidden_openers.iter().collect();
        // Longest first so "you know" wins over "you".
        forbidden.sort_by_key(|w| std::cmp::Reverse(w.len()));

        for word in forbidden {
            if let Some(end) = forbidden_prefix_len(trimmed, word) {
                return trimmed[end..]
                    .trim_start_matches([' ', ',', '.', '-', '–', '—'])
                    .to_string();
            }
        }
        trimmed.to_string()
    }

    /// After stripping, prepend a varied opener when the line still starts
    /// badly, is empty, or a configured random draw succeeds. Never repeats
    /// the previous opener for the same role when the pool allows.
    pub fn vary_opening(&mut self, text: &str, speaker: Speaker, persona: &AnalystPersona) -> String {
        let text = self.strip_forbidden_openers(text, persona);
        let first_word = text
            .split_whitespace()
            .next()
            .unwrap_or("")
            .trim_matches([',', '.', ' '])
            .to_lowercase();

        let needs_opener = first_word.is_empty()
            || persona.forbidden_openers.contains(&first_word)
            || self.rng.random::<f64>() < self.cfg.opener_chance;
        if !needs_opener || persona.openers.is_empty() {
            return text;
        }

        let mut candidate = &persona.openers[self.rng.random_range(0..persona.openers.len())];
        if self.last_openers.get(&speaker) == Some(candidate) {
            let pool: Vec<&String> = persona
                .openers
                .iter()
                .filter(|c| *c != candidate)
                .collect();
            if !pool.is_empty() {
                candidate = pool[self.rng.random_range(0..pool.len())];
            }
        }
        self.last_openers.insert(speaker, candidate.clone());
        format!("{}, {}", candidate, text)
    }

    /// Apply at most one conversational element, in priority order:
    /// name-address, surprise interjection, acknowledgment/interruption,
    /// agreement/disagreement. Host lines never pass through here.
    pub fn add_conversational_elements(
        &mut self,
        text: &str,
        other_name: &str,
        turn_count: u32,
        history_len: usize,
    ) -> String {
        let low = text.to_lowercase();
        let has_any = |words: &[&str]| words.iter().any(|w| low.contains(w));

        // Address the other analyst only at moments that warrant it.
        let should_use_name = has_any(IMPORTANCE_WORDS)
            || has_any(CONTRAST_WORDS)
            || (turn_count > 2 && self.rng.random::<f64>() < 0.3)
            || has_any(SURPRISE_WORDS)
            || (history_len > 2 && low.contains("alternative"))
            || (self.rng.random::<f64>() < 0.2 && has_any(AGREEMENT_WORDS));

        if should_use_name && self.rng.random::<f64>() < self.cfg.name_address_chance {
            let formats = [
                format!("{}, ", other_name),
                format!("You know, {}, ", other_name),
            ];
            let prefix = &formats[self.rng.random_range(0..formats.len())];
            return format!("{}{}", prefix, lowercase_first(text));
        }

        if self.rng.random::<f64>() < self.cfg.surprise_chance && has_any(SURPRISE_WORDS) {
            let prefix = EMPHATICS[self.rng.random_range(0..EMPHATICS.len())];
            return format!("{}{}", prefix, text);
        }

        if self.rng.random::<f64>() < self.cfg.interruption_chance && turn_count > 1 {
            return if self.rng.random::<f64>() < 0.5 {
                let prefix = ACKNOWLEDGMENTS[self.rng.random_range(0..ACKNOWLEDGMENTS.len())];
                format!("{}{}", prefix, lowercase_first(text))
            } else {
                let prefix = INTERRUPTIONS[self.rng.random_range(0..INTERRUPTIONS.len())];
                format!("{}{}", prefix, text)
            };
        }

        if self.rng.random::<f64>() < self.cfg.agree_disagree_chance && turn_count > 1 {
            let pool = if self.rng.random::<f64>() < self.cfg.agree_ratio {
                AGREEMENTS
            } else {
                DISAGREEMENTS
            };
            let prefix = pool[self.rng.random_range(0..pool.len())];
            return format!("{}{}", prefix, lowercase_first(text));
        }

        text.to_string()
    }

    /// Collapse immediately duplicated agent names, duplicated adjacent
    /// words, and a duplicated leading opener phrase.
    pub fn clean_repetition(&self, text: &str, names: &[&str], openers: &[String]) -> String {
        let mut t = text.to_string();

        for name in names {
            t = t.replace(&format!("{name}, {name},"), &format!("{name},"));
            t = t.replace(&format!("{name}, {name} "), &format!("{name} "));
        }

        for opener in openers {
            let doubled = format!("{opener}, {opener},");
            if t.starts_with(&doubled) {
                t = t.replacen(&format!("{opener}, "), "", 1);
            }
        }

        // Collapse exact adjacent word duplicates, keeping any punctuation
        // that trailed the second occurrence ("the the." stays "the.").
        let mut out: Vec<String> = Vec::new();
        for token in t.split_whitespace() {
            if let Some(prev) = out.last() {
                let (prev_word, prev_punct) = split_trailing_punct(prev);
                let (word, punct) = split_trailing_punct(token);
                if prev_punct.is_empty() && !word.is_empty() && prev_word == word {
                    let merged = format!("{}{}", prev_word, punct);
                    *out.last_mut().unwrap() = merged;
                    continue;
                }
            }
            out.push(token.to_string());
        }
        out.join(" ")
    }
}

/// Byte length of a prefix of `text` whose lowercase form equals `word`,
/// followed by a word boundary. Matched char by char so uppercase letters
/// with a different byte length when lowered (e.g. the Kelvin sign) never
/// produce an offset inside a character.
fn forbidden_prefix_len(text: &str, word: &str) -> Option<usize> {
    let mut want = word.chars().peekable();
    for (i, c) in text.char_indices() {
        if want.peek().is_none() {
            return matches!(c, ' ' | ',' | '.' | '-').then_some(i);
        }
        for lowered in c.to_lowercase() {
            match want.next() {
                Some(expected) if expected == lowered => {}
                _ => return None,
            }
        }
    }
    // The whole line was the forbidden word.
    if want.peek().is_none() {
        Some(text.len())
    } else {
        None
    }
}

fn split_trailing_punct(token: &str) -> (&str, &str) {
    let end = token
        .rfind(|c: char| c.is_alphanumeric())
        .map(|i| i + token[i..].chars().next().map_or(1, char::len_utf8))
        .unwrap_or(0);
    token.split_at(end)
}

fn lowercase_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) => c.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Shared text-finishing rule applied to every LLM-generated line before TTS:
/// strip markdown emphasis markers, collapse whitespace, and guarantee a
/// terminal sentence mark.
pub fn ensure_complete_sentence(text: &str) -> String {
    let mut t = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '`' | '*' | '_' | '#' | '>') {
            t.push(' ');
        } else {
            t.push(c);
        }
    }
    let t = t.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut t = t.trim().to_string();
    if let Some(last) = t.chars().last() {
        if !matches!(last, '.' | '!' | '?') {
            t.push('.');
        }
    }
    t
}
