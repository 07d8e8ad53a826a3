//! Guardrails: content rules checked during streaming and at completion.
//!
//! A [`Guardrail`] wraps a check closure that inspects the accumulated
//! content and returns zero or more [`Violation`]s. Rules marked `streaming`
//! run every `check_intervals.guardrails` tokens; all rules run once more
//! after the provider completes. Severity aggregation across one check is
//! captured in a [`CheckOutcome`].

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

/// Severity of a violation. Ordering is `Warning < Error < Fatal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational. Never fails a check.
    Warning,
    /// Fails the check; eligible for a content-class retry.
    Error,
    /// Halts the run unless the rule marks the violation recoverable.
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }
}

/// A structured guardrail failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    /// Name of the rule that produced this violation.
    pub rule: String,
    /// Human-readable description of what failed.
    pub message: String,
    /// Severity of the failure.
    pub severity: Severity,
    /// Whether a retry may clear this violation. Defaults to `true` for
    /// warnings and errors, `false` for fatal.
    pub recoverable: bool,
    /// Byte offset into the content where the violation was found.
    pub position: Option<usize>,
}

impl Violation {
    pub fn new(rule: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            rule: rule.into(),
            message: message.into(),
            severity,
            recoverable: severity != Severity::Fatal,
            position: None,
        }
    }

    /// Override the recoverable flag.
    pub fn recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    /// Attach the char offset where the violation was found.
    pub fn at_position(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

/// What a guardrail check sees.
#[derive(Debug, Clone, Copy)]
pub struct GuardrailContext<'a> {
    /// Accumulated content so far.
    pub content: &'a str,
    /// Current checkpoint, when continuation is enabled.
    pub checkpoint: Option<&'a str>,
    /// The most recent token delta, during streaming checks.
    pub delta: Option<&'a str>,
    /// Tokens received in the current attempt.
    pub token_count: u32,
    /// `false` during streaming checks, `true` post-completion.
    pub completed: bool,
}

/// Check closure type. Returns zero or more violations.
pub type CheckFn = Arc<dyn Fn(&GuardrailContext<'_>) -> Vec<Violation> + Send + Sync>;

/// A named content rule.
#[derive(Clone)]
pub struct Guardrail {
    /// Rule name, echoed into violations and telemetry.
    pub name: String,
    /// Optional human-readable description.
    pub description: Option<String>,
    /// Whether this rule also runs during streaming.
    pub streaming: bool,
    check: CheckFn,
}

impl Guardrail {
    /// Create a rule from a check closure. Post-completion only by default.
    pub fn new(
        name: impl Into<String>,
        check: impl Fn(&GuardrailContext<'_>) -> Vec<Violation> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            streaming: false,
            check: Arc::new(check),
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Also run this rule during streaming.
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Run the check.
    pub fn check(&self, ctx: &GuardrailContext<'_>) -> Vec<Violation> {
        (self.check)(ctx)
    }

    /// Rule that flags content containing `needle` (case-insensitive).
    pub fn banned_substring(
        name: impl Into<String>,
        needle: impl Into<String>,
        severity: Severity,
    ) -> Self {
        let name = name.into();
        let needle = needle.into().to_lowercase();
        let rule = name.clone();
        Guardrail::new(name, move |ctx| {
            match ctx.content.to_lowercase().find(&needle) {
                Some(pos) => vec![Violation::new(
                    rule.clone(),
                    format!("content contains banned text '{}'", needle),
                    severity,
                )
                .at_position(pos)],
                None => Vec::new(),
            }
        })
    }

    /// Rule that flags content longer than `max_chars`.
    pub fn max_length(name: impl Into<String>, max_chars: usize) -> Self {
        let name = name.into();
        let rule = name.clone();
        Guardrail::new(name, move |ctx| {
            let len = ctx.content.chars().count();
            if len > max_chars {
                vec![Violation::new(
                    rule.clone(),
                    format!("content length {} exceeds limit {}", len, max_chars),
                    Severity::Error,
                )]
            } else {
                Vec::new()
            }
        })
    }
}

impl std::fmt::Debug for Guardrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guardrail")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("streaming", &self.streaming)
            .finish()
    }
}

/// Aggregated result of one guardrail pass.
#[derive(Debug, Clone, Default)]
pub struct CheckOutcome {
    /// All violations produced by the pass.
    pub violations: Vec<Violation>,
}

impl CheckOutcome {
    /// No error- or fatal-severity violations.
    pub fn passed(&self) -> bool {
        !self
            .violations
            .iter()
            .any(|v| v.severity >= Severity::Error)
    }

    /// A non-recoverable fatal violation is present.
    pub fn should_halt(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.is_fatal() && !v.recoverable)
    }

    /// An error-severity or recoverable fatal violation is present.
    pub fn should_retry(&self) -> bool {
        self.violations.iter().any(|v| {
            v.severity == Severity::Error || (v.is_fatal() && v.recoverable)
        })
    }

    /// The first violation that forces a halt, if any.
    pub fn halting_violation(&self) -> Option<&Violation> {
        self.violations
            .iter()
            .find(|v| v.is_fatal() && !v.recoverable)
    }

    /// The first violation that warrants a retry, if any.
    pub fn retry_violation(&self) -> Option<&Violation> {
        self.violations
            .iter()
            .find(|v| v.severity == Severity::Error || (v.is_fatal() && v.recoverable))
    }
}

/// Run a set of rules against a context and aggregate the outcome.
///
/// During streaming (`ctx.completed == false`) only rules marked
/// `streaming` participate; post-completion every rule runs.
pub fn evaluate(rules: &[Guardrail], ctx: &GuardrailContext<'_>) -> CheckOutcome {
    let mut outcome = CheckOutcome::default();
    for rule in rules {
        if !ctx.completed && !rule.streaming {
            continue;
        }
        let violations = rule.check(ctx);
        if !violations.is_empty() {
            debug!(
                rule = %rule.name,
                count = violations.len(),
                completed = ctx.completed,
                "guardrail produced violations"
            );
        }
        outcome.violations.extend(violations);
    }
    outcome
}

/// Synthesized violation for a completion with no usable output.
pub fn zero_output_violation() -> Violation {
    Violation::new(
        "zero_output",
        "stream completed with no usable output",
        Severity::Error,
    )
}
