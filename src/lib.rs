//! # L0
//!
//! Reliability runtime for LLM text-generation streams.
//!
//! Hand L0 a stream source and a configuration; it returns a normalized
//! event stream plus a terminal state. In between it enforces the delivery
//! guarantees providers do not: first-token and inter-token deadlines,
//! classification and recovery of network and provider failures, content
//! guardrails during streaming and at completion, drift detection,
//! checkpoint-based resumption with regenerated-prefix dedup, ordered
//! fallback across factories, and lifecycle observability.
//!
//! ## Core Concepts
//!
//! - **[`StreamSource`]** — factory producing one canonical event stream per
//!   attempt. Bundled: [`OpenAiSource`](source::OpenAiSource),
//!   [`OllamaSource`](source::OllamaSource), and the deterministic
//!   [`ScriptedSource`](source::ScriptedSource) for tests.
//! - **[`L0Options`]** — run configuration, built with
//!   [`L0Options::builder`].
//! - **[`run`]** — starts the orchestrator and returns an [`L0Result`]
//!   whose events the caller drains.
//! - **[`RunState`]** — content, checkpoint, counters, and violations,
//!   observable while streaming and final at termination.
//! - **[`L0Error`]** — structured failure with a closed code set and the
//!   captured checkpoint for recovery.
//!
//! ## Quick Start
//!
//! ```
//! use l0::{run, L0Options};
//! use l0::source::ScriptedSource;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let mut result = run(L0Options::builder(
//!         ScriptedSource::completing(&["Hello ", "world"]),
//!     )
//!     .build());
//!
//!     while let Some(event) = result.next_event().await {
//!         if let l0::StreamEvent::Token { value } = event {
//!             print!("{}", value);
//!         }
//!     }
//!     assert_eq!(result.state().content, "Hello world");
//! }
//! ```
//!
//! ## Against a live provider
//!
//! ```no_run
//! use l0::{run, L0Options, RetryPolicy};
//! use l0::options::CheckIntervals;
//! use l0::source::OpenAiSource;
//! use l0::watchdog::TimeoutConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = OpenAiSource::new("https://api.openai.com", "gpt-4o", "Write a haiku")
//!         .with_api_key(std::env::var("OPENAI_API_KEY")?);
//!
//!     let mut result = run(L0Options::builder(source)
//!         .retry(RetryPolicy::standard())
//!         .timeout(TimeoutConfig::default().initial_token_ms(10_000).inter_token_ms(5_000))
//!         .continue_from_last_known_good_token(true)
//!         .check_intervals(CheckIntervals::default().checkpoint_every(10))
//!         .build());
//!
//!     let state = result.wait().await?;
//!     println!("{}", state.content);
//!     Ok(())
//! }
//! ```

pub mod abort;
pub mod classify;
pub mod continuation;
pub mod drift;
pub mod error;
pub mod event;
pub mod guardrail;
pub mod interceptor;
pub mod observer;
pub mod options;
pub mod retry;
pub mod runtime;
pub mod source;
pub mod state;
pub mod telemetry;
pub mod watchdog;

pub use abort::AbortHandle;
pub use continuation::DedupOptions;
pub use drift::{DriftDetector, DriftReport};
pub use error::{ErrorCategory, ErrorCode, L0Error, Result};
pub use event::{DataPayload, Role, StreamEvent, Usage};
pub use guardrail::{Guardrail, Severity, Violation};
pub use observer::{FnObserver, LifecycleObserver};
pub use options::{CheckIntervals, L0Options};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use runtime::{run, L0Result};
pub use source::StreamSource;
pub use state::RunState;
pub use telemetry::TelemetryReport;
pub use watchdog::TimeoutConfig;
