//! Guardrails demo: a post-phase violation triggers a content-class retry,
//! and a fatal rule halts the run outright.
//!
//! Run with: `cargo run --example guardrails`

use std::sync::Arc;
use std::time::Duration;

use l0::observer::LifecycleObserver;
use l0::source::{ScriptStep, ScriptedSource};
use l0::{run, Guardrail, L0Options, RetryPolicy, Severity, Violation};

struct PrintViolations;

impl LifecycleObserver for PrintViolations {
    fn on_violation(&self, violation: &Violation) {
        println!(
            "violation: rule={} severity={} recoverable={}",
            violation.rule,
            violation.severity.as_str(),
            violation.recoverable
        );
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // First attempt emits a placeholder the format rule rejects; the retry
    // produces clean output.
    let source = ScriptedSource::new(vec![
        vec![ScriptStep::token("TODO: fill this in later"), ScriptStep::Complete],
        vec![
            ScriptStep::token("A finished answer with no placeholders."),
            ScriptStep::Complete,
        ],
    ]);

    let mut result = run(L0Options::builder(source)
        .retry(RetryPolicy::standard().with_base_delay(Duration::from_millis(25)))
        .guardrail(Guardrail::banned_substring("no-placeholder", "TODO", Severity::Error))
        .guardrail(Guardrail::banned_substring("no-secret", "BEGIN PRIVATE KEY", Severity::Fatal))
        .observer(Arc::new(PrintViolations))
        .build());

    match result.wait().await {
        Ok(state) => {
            println!("content: {:?}", state.content);
            println!(
                "model retries: {}, violations recorded: {}",
                state.model_retry_count,
                state.violations.len()
            );
        }
        Err(err) => println!("halted: {}", err.to_detailed_string()),
    }
}
