//! Drift detection: heuristics over emitted text.
//!
//! [`DriftDetector`] scans the accumulated content for signals that the
//! model has departed from task-appropriate output: verbatim repetition,
//! meta commentary about being a model, a sudden apologetic tone shift, or
//! an entropy anomaly in the tail. Detection is deterministic; confidence is
//! advisory and gating happens on `detected` only.

use std::collections::HashMap;

use serde::Serialize;

use crate::guardrail::{Severity, Violation};

/// Kind of drift anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    ToneShift,
    MetaCommentary,
    Repetition,
    EntropySpike,
}

impl DriftKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftKind::ToneShift => "tone_shift",
            DriftKind::MetaCommentary => "meta_commentary",
            DriftKind::Repetition => "repetition",
            DriftKind::EntropySpike => "entropy_spike",
        }
    }
}

/// Result of a drift analysis pass.
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    /// Whether any anomaly fired.
    pub detected: bool,
    /// Which anomalies fired.
    pub kinds: Vec<DriftKind>,
    /// Advisory confidence in [0, 1]. More independent signals, higher score.
    pub confidence: f64,
}

impl DriftReport {
    fn clean() -> Self {
        Self {
            detected: false,
            kinds: Vec::new(),
            confidence: 0.0,
        }
    }

    /// Comma-separated kind names, for messages and telemetry.
    pub fn kinds_string(&self) -> String {
        self.kinds
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Configurable drift detector.
#[derive(Debug, Clone)]
pub struct DriftDetector {
    /// Chars of tail content examined by the repetition and entropy checks.
    pub window: usize,
    /// Minimum content length before any check fires.
    pub min_content: usize,
}

impl DriftDetector {
    pub fn new() -> Self {
        Self {
            window: 400,
            min_content: 64,
        }
    }

    /// Analyze the accumulated content.
    pub fn analyze(&self, content: &str) -> DriftReport {
        if content.chars().count() < self.min_content {
            return DriftReport::clean();
        }

        let mut kinds = Vec::new();
        if detect_repetition(content, self.window) {
            kinds.push(DriftKind::Repetition);
        }
        if detect_meta_commentary(content) {
            kinds.push(DriftKind::MetaCommentary);
        }
        if detect_tone_shift(content) {
            kinds.push(DriftKind::ToneShift);
        }
        if detect_entropy_spike(content, self.window) {
            kinds.push(DriftKind::EntropySpike);
        }

        if kinds.is_empty() {
            return DriftReport::clean();
        }
        let confidence = 0.5 + 0.5 * ((kinds.len() - 1) as f64 / 3.0);
        DriftReport {
            detected: true,
            kinds,
            confidence,
        }
    }
}

impl Default for DriftDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// The violation a drift detection contributes to retry planning.
pub fn drift_violation(report: &DriftReport) -> Violation {
    Violation::new(
        "drift",
        format!("drift detected: {}", report.kinds_string()),
        Severity::Error,
    )
}

fn tail_chars(content: &str, window: usize) -> &str {
    let char_count = content.chars().count();
    if char_count <= window {
        return content;
    }
    let skip = char_count - window;
    let byte_start = content
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &content[byte_start..]
}

/// Verbatim repetition: the tail phrase recurs, or a line repeats back to back.
fn detect_repetition(content: &str, window: usize) -> bool {
    let tail = tail_chars(content, window);

    // A trailing phrase of ~24 chars appearing three or more times.
    const PHRASE: usize = 24;
    let chars: Vec<char> = tail.chars().collect();
    if chars.len() >= PHRASE * 3 {
        let phrase: String = chars[chars.len() - PHRASE..].iter().collect();
        if !phrase.trim().is_empty() {
            let occurrences = tail.matches(phrase.as_str()).count();
            if occurrences >= 3 {
                return true;
            }
        }
    }

    // Three or more identical non-empty lines in a row.
    let mut streak = 1;
    let mut prev: Option<&str> = None;
    for line in tail.lines() {
        let line = line.trim();
        if line.is_empty() {
            prev = None;
            streak = 1;
            continue;
        }
        if prev == Some(line) {
            streak += 1;
            if streak >= 3 {
                return true;
            }
        } else {
            streak = 1;
        }
        prev = Some(line);
    }
    false
}

const META_MARKERS: &[&str] = &[
    "as an ai",
    "as a language model",
    "as an artificial intelligence",
    "i am an ai",
    "i'm an ai",
    "my training data",
    "i do not have personal",
    "[insert",
    "i cannot assist with",
];

/// Commentary about being a model instead of task output.
fn detect_meta_commentary(content: &str) -> bool {
    let lower = content.to_lowercase();
    META_MARKERS.iter().any(|m| lower.contains(m))
}

const TONE_MARKERS: &[&str] = &[
    "i apologize, but",
    "i'm sorry, but i",
    "i am sorry, but i",
    "unfortunately, i cannot",
    "i must decline",
];

/// A sudden apologetic or refusing register after normal output.
fn detect_tone_shift(content: &str) -> bool {
    let lower = content.to_lowercase();
    TONE_MARKERS.iter().any(|marker| {
        lower
            .find(marker)
            .is_some_and(|pos| lower[..pos].chars().count() > 100)
    })
}

/// Shannon entropy over the char distribution, in bits.
fn shannon_entropy(text: &str) -> f64 {
    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for ch in text.chars() {
        *counts.entry(ch).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    counts
        .values()
        .map(|&c| {
            let p = c as f64 / total as f64;
            -p * p.log2()
        })
        .sum()
}

/// The tail's entropy departs sharply from the head's, or degenerates.
fn detect_entropy_spike(content: &str, window: usize) -> bool {
    let tail = tail_chars(content, window);
    if tail.chars().count() < 100 {
        return false;
    }

    // Degenerate tail: a handful of distinct chars repeated.
    let tail_entropy = shannon_entropy(tail);
    if tail_entropy < 1.5 {
        return true;
    }

    let head_len = content.len() - tail.len();
    if head_len == 0 {
        return false;
    }
    let head = &content[..head_len];
    if head.chars().count() < 100 {
        return false;
    }
    (shannon_entropy(head) - tail_entropy).abs() > 1.5
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN: &str = "The mitochondrion is the powerhouse of the cell. It produces \
        adenosine triphosphate through oxidative phosphorylation, supplying the \
        energy that drives most cellular processes in eukaryotic organisms.";

    #[test]
    fn test_clean_text_no_drift() {
        let report = DriftDetector::new().analyze(CLEAN);
        assert!(!report.detected);
        assert!(report.kinds.is_empty());
        assert_eq!(report.confidence, 0.0);
    }

    #[test]
    fn test_short_content_skipped() {
        let report = DriftDetector::new().analyze("tiny");
        assert!(!report.detected);
    }

    #[test]
    fn test_repetition_detected() {
        let looped = "The answer is clear and obvious to everyone. ".repeat(12);
        let report = DriftDetector::new().analyze(&looped);
        assert!(report.detected);
        assert!(report.kinds.contains(&DriftKind::Repetition));
    }

    #[test]
    fn test_repeated_lines_detected() {
        let mut text = String::from(CLEAN);
        text.push('\n');
        for _ in 0..4 {
            text.push_str("I will continue the analysis below.\n");
        }
        let report = DriftDetector::new().analyze(&text);
        assert!(report.detected);
        assert!(report.kinds.contains(&DriftKind::Repetition));
    }

    #[test]
    fn test_meta_commentary_detected() {
        let text = format!("{} As an AI language model, I should mention my limits.", CLEAN);
        let report = DriftDetector::new().analyze(&text);
        assert!(report.detected);
        assert!(report.kinds.contains(&DriftKind::MetaCommentary));
    }

    #[test]
    fn test_tone_shift_after_normal_output() {
        let text = format!("{} I apologize, but I must stop here.", CLEAN);
        let report = DriftDetector::new().analyze(&text);
        assert!(report.detected);
        assert!(report.kinds.contains(&DriftKind::ToneShift));
    }

    #[test]
    fn test_tone_marker_at_start_is_not_a_shift() {
        let text = format!("I apologize, but this request is unusual. {}", CLEAN);
        let report = DriftDetector::new().analyze(&text);
        assert!(!report.kinds.contains(&DriftKind::ToneShift));
    }

    #[test]
    fn test_entropy_spike_on_degenerate_tail() {
        let text = format!("{}{}", CLEAN, "aaaaaaaa".repeat(60));
        let report = DriftDetector::new().analyze(&text);
        assert!(report.detected);
        assert!(report.kinds.contains(&DriftKind::EntropySpike));
    }

    #[test]
    fn test_confidence_grows_with_kinds() {
        let single = DriftDetector::new()
            .analyze(&format!("{} As an AI language model, I note this.", CLEAN));
        assert!(single.detected);

        let multi_text = format!(
            "{} As an AI language model, I apologize, but I must decline. {}",
            CLEAN,
            "same phrase repeated here. ".repeat(12)
        );
        let multi = DriftDetector::new().analyze(&multi_text);
        assert!(multi.detected);
        assert!(multi.kinds.len() > single.kinds.len());
        assert!(multi.confidence > single.confidence);
    }

    #[test]
    fn test_drift_violation_shape() {
        let report = DriftReport {
            detected: true,
            kinds: vec![DriftKind::Repetition, DriftKind::EntropySpike],
            confidence: 0.7,
        };
        let v = drift_violation(&report);
        assert_eq!(v.rule, "drift");
        assert!(v.recoverable);
        assert_eq!(v.severity, Severity::Error);
        assert!(v.message.contains("repetition"));
        assert!(v.message.contains("entropy_spike"));
    }

    #[test]
    fn test_shannon_entropy_bounds() {
        assert_eq!(shannon_entropy(""), 0.0);
        assert_eq!(shannon_entropy("aaaa"), 0.0);
        let uniform = shannon_entropy("abcdefgh");
        assert!((uniform - 3.0).abs() < 1e-9);
    }
}
