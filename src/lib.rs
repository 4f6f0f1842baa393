#![forbid(unsafe_code)]

//! # viral-predictor
//!
//! Predict which of two pieces of content will travel further by asking an LLM
//! to role-play a crowd.
//!
//! Each simulated user sees one variant and answers whether they would like,
//! comment on, share or quote it. Answers are gathered in concurrent batches,
//! normalized into a fixed four-field outcome (tolerating prose, broken JSON and
//! stringly-typed values), tallied per variant, and after every batch a
//! one-sided two-proportion z-test says which variant leads on each metric and
//! how confident that lead is.
//!
//! Module map:
//! - [`oracle`]: one prediction per call, over a chat-completions [`gateway`].
//! - [`normalize`]: raw text to [`OutcomeSample`], never failing.
//! - [`resilient`] + [`sampler`]: batched fan-out with bounded retry and a zero fallback.
//! - [`outcome`] + [`confidence`]: running tallies and per-metric verdicts.
//! - [`engine`]: the run loop and the caller-owned [`RunSnapshot`].

pub mod confidence;
pub mod engine;
pub mod gateway;
pub mod normalize;
pub mod oracle;
pub mod outcome;
pub mod prompts;
pub mod providers;
pub mod report;
pub mod resilient;
pub mod sampler;
pub mod trace;

pub use confidence::{calc_confidence, ConfidenceVerdict, MetricVerdict, VerdictBasis, Winner};
pub use engine::{
    run_simulation, BatchCommitted, BatchObserver, ConfigurationError, EngagementPoint,
    ObserverError, RunParams, RunSnapshot, SimulationOptions,
};
pub use gateway::{Attribution, ChatGateway, ProviderGateway, UsageSink};
pub use normalize::{normalize_outcome, NormalizedOutcome, ParseSource};
pub use oracle::{EngagementOracle, GatewayOracle, OracleError};
pub use outcome::{Metric, OutcomeField, OutcomeSample, RunningTally, Variant};
pub use resilient::{resilient_call, Resolved, RetryPolicy};
pub use sampler::{sample_batch, BatchOutcome, BatchPlan, SampleRecord};
pub use trace::{BatchTrace, JsonlTraceSink, TraceError, TraceSink, TraceWorker};
