//! Basic streaming: drain a run and print tokens as they arrive.
//!
//! Uses the deterministic scripted source so the demo runs without a live
//! provider. Swap in `OpenAiSource` or `OllamaSource` for real traffic.
//!
//! Run with: `cargo run --example streaming_basic`

use l0::source::ScriptedSource;
use l0::{run, L0Options, StreamEvent};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let source = ScriptedSource::completing(&[
        "Streaming ", "through ", "L0 ", "keeps ", "providers ", "honest.",
    ]);

    let mut result = run(L0Options::builder(source).build());

    while let Some(event) = result.next_event().await {
        match event {
            StreamEvent::Token { value } => print!("{}", value),
            StreamEvent::Complete { usage } => {
                println!();
                println!("complete (usage: {:?})", usage);
            }
            other => println!("[{:?}]", other),
        }
    }

    let state = result.state();
    println!(
        "tokens: {}, chars: {}, completed: {}",
        state.token_count,
        state.content.len(),
        state.completed
    );
}
