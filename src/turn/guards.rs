//! Gating heuristics for candidate speech and generated questions
//!
//! All of these are approximate string heuristics; thresholds come from
//! configuration so boundary values can be exercised precisely in tests.

use std::collections::HashSet;

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Fewer than two normalized tokens is filler, not an answer.
pub fn is_trivial(text: &str) -> bool {
    word_count(&normalize(text)) < 2
}

/// Token-overlap similarity: shared tokens over the smaller token set,
/// so a partial playback bleed still scores high.
pub fn token_overlap(a: &str, b: &str) -> f64 {
    let tokens_a: HashSet<&str> = a.split_whitespace().collect();
    let tokens_b: HashSet<&str> = b.split_whitespace().collect();

    let smaller = tokens_a.len().min(tokens_b.len());
    if smaller == 0 {
        return 0.0;
    }

    let shared = tokens_a.intersection(&tokens_b).count();
    shared as f64 / smaller as f64
}

/// Candidate text that mostly repeats the last interviewer utterance is
/// the system hearing its own voice.
pub fn is_echo(candidate: &str, echo_memory: Option<&str>, threshold: f64) -> bool {
    let Some(memory) = echo_memory else {
        return false;
    };
    token_overlap(&normalize(candidate), memory) >= threshold
}

/// Near-duplicate check between a freshly generated question and the
/// previous one.
pub fn is_near_duplicate(new_question: &str, previous: &str, threshold: f64) -> bool {
    strsim::normalized_levenshtein(&normalize(new_question), &normalize(previous)) >= threshold
}

const CLARIFICATION_PATTERNS: &[&str] = &[
    "could you repeat",
    "can you repeat",
    "didn't catch",
    "did not catch",
    "didn't understand",
    "did not understand",
    "didn't quite hear",
    "say that again",
    "could you clarify",
    "i'm not sure i understood",
];

/// Utterances asking the candidate to repeat themselves advance no
/// counters.
pub fn is_clarification(text: &str) -> bool {
    let normalized = normalize(text);
    CLARIFICATION_PATTERNS
        .iter()
        .any(|p| normalized.contains(&normalize(p)))
}
