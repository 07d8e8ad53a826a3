//! Recovery demo: a mid-stream network failure, checkpoint resume, and
//! regenerated-prefix dedup.
//!
//! The scripted primary drops the connection after two tokens; the retry
//! resumes from the checkpoint and the regenerated prefix is stripped so the
//! final content contains no duplicate text.
//!
//! Run with: `cargo run --example resilience`

use std::time::Duration;

use l0::options::CheckIntervals;
use l0::retry::BackoffStrategy;
use l0::source::{ScriptStep, ScriptedSource};
use l0::{run, L0Options, RetryPolicy};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let source = ScriptedSource::new(vec![
        vec![
            ScriptStep::token("The quick brown "),
            ScriptStep::token("fox jumps "),
            ScriptStep::fail_network("read ECONNRESET"),
        ],
        vec![
            // The provider regenerates the checkpoint tail before new text.
            ScriptStep::token("fox jumps over the lazy dog."),
            ScriptStep::Complete,
        ],
    ]);

    let mut result = run(L0Options::builder(source)
        .retry(
            RetryPolicy::standard()
                .with_network_backoff(BackoffStrategy::Fixed)
                .with_base_delay(Duration::from_millis(50)),
        )
        .continue_from_last_known_good_token(true)
        .check_intervals(CheckIntervals::default().checkpoint_every(1))
        .build());

    match result.wait().await {
        Ok(state) => {
            println!("content: {:?}", state.content);
            println!(
                "network retries: {}, resumed: {}, resume offset: {:?}",
                state.network_retry_count, state.resumed, state.resume_from
            );
        }
        Err(err) => println!("halted: {}", err.to_detailed_string()),
    }

    if let Some(telemetry) = result.telemetry() {
        println!(
            "continuation: used={}, deduped {} chars",
            telemetry.continuation.used, telemetry.continuation.deduplicated_chars
        );
        println!(
            "network errors by type: {:?}",
            telemetry.network.errors_by_type
        );
    }
}
