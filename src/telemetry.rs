//! Telemetry: aggregated metrics produced at run termination.
//!
//! The [`TelemetryRecorder`] accumulates continuation and drift facts during
//! the run and folds the final [`RunState`] into a serializable
//! [`TelemetryReport`] when the run terminates. Reports are plain data; sinks
//! (tracing, metrics systems) subscribe through the observer instead.

use std::collections::HashMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use uuid::Uuid;

use crate::classify::NetworkErrorRecord;
use crate::drift::DriftReport;
use crate::state::RunState;

/// Latency and retry metrics.
#[derive(Debug, Clone, Serialize, Default)]
pub struct Metrics {
    /// Milliseconds from run start to the first token of the final attempt.
    pub time_to_first_token_ms: Option<u64>,
    /// Mean gap between consecutive tokens in the final attempt.
    pub avg_inter_token_ms: Option<f64>,
    /// Token throughput of the final attempt.
    pub tokens_per_second: Option<f64>,
    /// Tokens delivered by the final attempt.
    pub total_tokens: u32,
    /// All retries, both budgets.
    pub total_retries: u32,
    /// Network-class retries.
    pub network_retry_count: u32,
    /// Model-budget retries.
    pub model_retry_count: u32,
}

/// Network failure summary.
#[derive(Debug, Clone, Serialize, Default)]
pub struct NetworkSummary {
    pub error_count: u32,
    pub errors_by_type: HashMap<String, u32>,
    pub errors: Vec<NetworkErrorRecord>,
}

/// Guardrail violation summary. Present only when rules were configured.
#[derive(Debug, Clone, Serialize, Default)]
pub struct GuardrailSummary {
    pub violation_count: u32,
    pub violations_by_rule: HashMap<String, u32>,
    pub violations_by_severity: HashMap<String, u32>,
    /// Keyed `"{rule}:{severity}"`.
    pub violations_by_rule_and_severity: HashMap<String, u32>,
}

/// Drift summary. Present only when drift detection ran and fired.
#[derive(Debug, Clone, Serialize)]
pub struct DriftSummary {
    pub detected: bool,
    pub kinds: Vec<String>,
    pub confidence: f64,
}

/// Continuation summary.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ContinuationSummary {
    pub enabled: bool,
    pub used: bool,
    pub times_applied: u32,
    pub checkpoint_length: Option<usize>,
    pub deduplication_applied: bool,
    pub deduplicated_chars: usize,
}

/// Aggregated telemetry for one run.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryReport {
    pub session_id: String,
    /// Epoch milliseconds.
    pub start_time: u64,
    /// Epoch milliseconds.
    pub end_time: u64,
    pub duration_ms: u64,
    pub metrics: Metrics,
    pub network: NetworkSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardrails: Option<GuardrailSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift: Option<DriftSummary>,
    pub continuation: ContinuationSummary,
}

fn epoch_ms(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Accumulates run facts and produces the final report.
#[derive(Debug)]
pub struct TelemetryRecorder {
    session_id: String,
    started_system: SystemTime,
    started_instant: Instant,
    continuation_enabled: bool,
    guardrails_configured: bool,
    resumes: u32,
    dedup_chars: usize,
    dedup_applied: bool,
    drift: Option<DriftSummary>,
}

impl TelemetryRecorder {
    pub fn new(continuation_enabled: bool, guardrails_configured: bool) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            started_system: SystemTime::now(),
            started_instant: Instant::now(),
            continuation_enabled,
            guardrails_configured,
            resumes: 0,
            dedup_chars: 0,
            dedup_applied: false,
            drift: None,
        }
    }

    /// An attempt resumed from a checkpoint.
    pub fn record_resume(&mut self) {
        self.resumes += 1;
    }

    /// Dedup stripped a regenerated prefix.
    pub fn record_dedup(&mut self, chars: usize) {
        if chars > 0 {
            self.dedup_applied = true;
            self.dedup_chars += chars;
        }
    }

    /// Drift analysis fired.
    pub fn record_drift(&mut self, report: &DriftReport) {
        self.drift = Some(DriftSummary {
            detected: report.detected,
            kinds: report.kinds.iter().map(|k| k.as_str().to_string()).collect(),
            confidence: report.confidence,
        });
    }

    /// Fold the final state into the report.
    pub fn finalize(&self, state: &RunState) -> TelemetryReport {
        let ended_system = SystemTime::now();
        let duration_ms = self.started_instant.elapsed().as_millis() as u64;

        let time_to_first_token_ms = state
            .first_token_at
            .map(|t| t.duration_since(state.started_at).as_millis() as u64);

        let (avg_inter_token_ms, tokens_per_second) = match (
            state.first_token_at,
            state.last_token_at,
        ) {
            (Some(first), Some(last)) if state.token_count > 1 => {
                let span = last.duration_since(first);
                let gaps = (state.token_count - 1) as f64;
                let avg = span.as_secs_f64() * 1000.0 / gaps;
                let tps = if span.as_secs_f64() > 0.0 {
                    Some(state.token_count as f64 / span.as_secs_f64())
                } else {
                    None
                };
                (Some(avg), tps)
            }
            _ => (None, None),
        };

        let mut errors_by_type: HashMap<String, u32> = HashMap::new();
        for record in &state.network_errors {
            *errors_by_type
                .entry(record.error_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        let guardrails = if self.guardrails_configured || !state.violations.is_empty() {
            let mut by_rule: HashMap<String, u32> = HashMap::new();
            let mut by_severity: HashMap<String, u32> = HashMap::new();
            let mut by_both: HashMap<String, u32> = HashMap::new();
            for violation in &state.violations {
                *by_rule.entry(violation.rule.clone()).or_insert(0) += 1;
                *by_severity
                    .entry(violation.severity.as_str().to_string())
                    .or_insert(0) += 1;
                *by_both
                    .entry(format!("{}:{}", violation.rule, violation.severity.as_str()))
                    .or_insert(0) += 1;
            }
            Some(GuardrailSummary {
                violation_count: state.violations.len() as u32,
                violations_by_rule: by_rule,
                violations_by_severity: by_severity,
                violations_by_rule_and_severity: by_both,
            })
        } else {
            None
        };

        TelemetryReport {
            session_id: self.session_id.clone(),
            start_time: epoch_ms(self.started_system),
            end_time: epoch_ms(ended_system),
            duration_ms,
            metrics: Metrics {
                time_to_first_token_ms,
                avg_inter_token_ms,
                tokens_per_second,
                total_tokens: state.token_count,
                total_retries: state.network_retry_count + state.model_retry_count,
                network_retry_count: state.network_retry_count,
                model_retry_count: state.model_retry_count,
            },
            network: NetworkSummary {
                error_count: state.network_errors.len() as u32,
                errors_by_type,
                errors: state.network_errors.clone(),
            },
            guardrails,
            drift: self.drift.clone(),
            continuation: ContinuationSummary {
                enabled: self.continuation_enabled,
                used: self.resumes > 0,
                times_applied: self.resumes,
                checkpoint_length: if state.checkpoint.is_empty() {
                    None
                } else {
                    Some(state.checkpoint.chars().count())
                },
                deduplication_applied: self.dedup_applied,
                deduplicated_chars: self.dedup_chars,
            },
        }
    }
}
