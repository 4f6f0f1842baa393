//! Minimal end-to-end example for `viral-predictor`.
//!
//! Simulates 20 Hacker News readers per variant and prints which headline
//! draws more engagement, per metric.
//!
//! To run:
//! - Set `OPENROUTER_API_KEY`
//! - `cargo run --example quickstart`

use std::sync::Arc;

use viral_predictor::gateway::{ChatModel, NoopUsageSink};
use viral_predictor::providers::select_model;
use viral_predictor::report::render_summary_markdown;
use viral_predictor::{
    run_simulation, Attribution, GatewayOracle, ProviderGateway, RunParams, RunSnapshot,
    SimulationOptions,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // -- Infrastructure setup ------------------------------------------------

    // Resolve the provider's default model and whether it honours JSON mode.
    let selection = select_model("openrouter", None)?;

    // Reads OPENROUTER_API_KEY (and optional OPENROUTER_BASE_URL) from the environment.
    // NoopUsageSink discards per-call records; use StderrUsageSink to see them.
    let gateway = ProviderGateway::from_env(selection.provider, Arc::new(NoopUsageSink))?;

    let oracle = GatewayOracle::new(
        Arc::new(gateway),
        ChatModel::new(selection.provider.name, selection.model.clone()),
    )
    .with_attribution(Attribution::new("example::quickstart"));

    // -- The run -------------------------------------------------------------

    let params = RunParams::new(
        "Show HN: I rewrote our build system in 400 lines of Rust",
        "Show HN: A faster build tool",
        "Hacker News",
    )
    .max_users(20) // simulated readers per variant
    .batch_size(5); // concurrent readers per variant per batch

    let options = SimulationOptions {
        structured_output: selection.structured_output,
        ..SimulationOptions::default() // 3 attempts, 1s doubling backoff
    };

    let mut snapshot = RunSnapshot::new(&params);
    run_simulation(&oracle, &params, &options, &mut snapshot, None, None).await?;

    // -- Interpret results ---------------------------------------------------

    println!("{}", render_summary_markdown(&snapshot));
    Ok(())
}
