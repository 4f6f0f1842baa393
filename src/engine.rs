//! Simulation control loop and the caller-owned run snapshot.
//!
//! [`run_simulation`] validates the run parameters, then for each planned batch
//! fans out the queries via [`sample_batch`], commits the resolved samples to the
//! tallies in trial order and recomputes every verdict. Only validation errors
//! are returned; oracle failures, observer failures and trace failures are
//! absorbed and logged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::confidence::{metric_verdicts, MetricVerdict};
use crate::oracle::EngagementOracle;
use crate::outcome::{Metric, RunningTally, Variant};
use crate::prompts::{render_prompt, PromptInstance, CONTENT_PLACEHOLDER, DEFAULT_TEMPLATE};
use crate::resilient::RetryPolicy;
use crate::sampler::{sample_batch, BatchOutcome, BatchPlan};
use crate::trace::{BatchTrace, TraceSink};

pub const DEFAULT_MAX_USERS: u64 = 10;
pub const DEFAULT_BATCH_SIZE: u64 = 5;

// =============================================================================
// Run parameters
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("variant {0} content is empty")]
    EmptyContent(Variant),
    #[error("platform label is empty")]
    EmptyPlatform,
    #[error("max_users must be positive")]
    ZeroMaxUsers,
    #[error("standard_batch_size must be positive")]
    ZeroBatchSize,
    #[error("prompt template has no {{content}} placeholder")]
    TemplateMissingContent,
}

fn default_max_users() -> u64 {
    DEFAULT_MAX_USERS
}

fn default_batch_size() -> u64 {
    DEFAULT_BATCH_SIZE
}

/// Caller-supplied description of one A/B run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunParams {
    pub variant_a_content: String,
    pub variant_b_content: String,
    pub platform_label: String,
    #[serde(default = "default_max_users")]
    pub max_users: u64,
    #[serde(default = "default_batch_size")]
    pub standard_batch_size: u64,
    /// Overrides the built-in prompt. Placeholders: `{platform}`, `{content}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
}

impl RunParams {
    pub fn new(
        variant_a_content: impl Into<String>,
        variant_b_content: impl Into<String>,
        platform_label: impl Into<String>,
    ) -> Self {
        Self {
            variant_a_content: variant_a_content.into(),
            variant_b_content: variant_b_content.into(),
            platform_label: platform_label.into(),
            max_users: DEFAULT_MAX_USERS,
            standard_batch_size: DEFAULT_BATCH_SIZE,
            prompt_template: None,
        }
    }

    pub fn max_users(mut self, n: u64) -> Self {
        self.max_users = n;
        self
    }

    pub fn batch_size(mut self, n: u64) -> Self {
        self.standard_batch_size = n;
        self
    }

    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = Some(template.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for variant in Variant::BOTH {
            if self.content(variant).trim().is_empty() {
                return Err(ConfigurationError::EmptyContent(variant));
            }
        }
        if self.platform_label.trim().is_empty() {
            return Err(ConfigurationError::EmptyPlatform);
        }
        if self.max_users == 0 {
            return Err(ConfigurationError::ZeroMaxUsers);
        }
        if self.standard_batch_size == 0 {
            return Err(ConfigurationError::ZeroBatchSize);
        }
        if !self.template().contains(CONTENT_PLACEHOLDER) {
            return Err(ConfigurationError::TemplateMissingContent);
        }
        Ok(())
    }

    pub fn content(&self, variant: Variant) -> &str {
        match variant {
            Variant::A => &self.variant_a_content,
            Variant::B => &self.variant_b_content,
        }
    }

    pub fn template(&self) -> &str {
        self.prompt_template.as_deref().unwrap_or(DEFAULT_TEMPLATE)
    }

    pub fn plan(&self) -> BatchPlan {
        BatchPlan::new(self.max_users, self.standard_batch_size)
    }

    pub fn render(&self, variant: Variant) -> PromptInstance {
        render_prompt(self.template(), &self.platform_label, self.content(variant))
    }
}

/// Knobs that do not change what is being compared.
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub retry: RetryPolicy,
    /// Whether the oracle's model accepts constrained JSON output.
    pub structured_output: bool,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            structured_output: true,
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// One point of the engagement chart: cumulative totals after `trials` trials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementPoint {
    pub trials: u64,
    pub total_a: u64,
    pub total_b: u64,
}

/// Caller-owned state of a run, updated after every committed batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    platform_label: String,
    max_users: u64,
    trials_completed: u64,
    batches_completed: u64,
    tally_a: RunningTally,
    tally_b: RunningTally,
    verdicts: Vec<MetricVerdict>,
    history: Vec<EngagementPoint>,
    fallback_samples: u64,
    unparseable_replies: u64,
    retries: u64,
}

impl RunSnapshot {
    pub fn new(params: &RunParams) -> Self {
        let tally_a = RunningTally::new();
        let tally_b = RunningTally::new();
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            platform_label: params.platform_label.trim().to_string(),
            max_users: params.max_users,
            trials_completed: 0,
            batches_completed: 0,
            verdicts: metric_verdicts(0, &tally_a, &tally_b),
            tally_a,
            tally_b,
            history: vec![EngagementPoint {
                trials: 0,
                total_a: 0,
                total_b: 0,
            }],
            fallback_samples: 0,
            unparseable_replies: 0,
            retries: 0,
        }
    }

    /// Fold a resolved batch into the tallies, then recompute every verdict.
    pub fn record_batch(&mut self, batch: &BatchOutcome) {
        debug_assert_eq!(batch.a.len(), batch.b.len());
        for (a, b) in batch.a.iter().zip(batch.b.iter()) {
            self.tally_a.record(&a.sample);
            self.tally_b.record(&b.sample);
            self.trials_completed += 1;
            self.history.push(EngagementPoint {
                trials: self.trials_completed,
                total_a: self.tally_a.total(),
                total_b: self.tally_b.total(),
            });
        }
        self.batches_completed += 1;
        self.fallback_samples += batch.fallback_count();
        self.unparseable_replies += batch.unparseable_count();
        self.retries += batch.retry_count();
        self.verdicts = metric_verdicts(self.trials_completed, &self.tally_a, &self.tally_b);
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn platform_label(&self) -> &str {
        &self.platform_label
    }

    pub fn max_users(&self) -> u64 {
        self.max_users
    }

    pub fn trials_completed(&self) -> u64 {
        self.trials_completed
    }

    pub fn batches_completed(&self) -> u64 {
        self.batches_completed
    }

    pub fn is_complete(&self) -> bool {
        self.trials_completed >= self.max_users
    }

    pub fn tally(&self, variant: Variant) -> &RunningTally {
        match variant {
            Variant::A => &self.tally_a,
            Variant::B => &self.tally_b,
        }
    }

    pub fn verdicts(&self) -> &[MetricVerdict] {
        &self.verdicts
    }

    pub fn verdict(&self, metric: Metric) -> Option<&MetricVerdict> {
        self.verdicts.iter().find(|v| v.metric == metric)
    }

    /// Cumulative engagement after each trial, starting at `(0, 0, 0)`.
    pub fn history(&self) -> &[EngagementPoint] {
        &self.history
    }

    pub fn fallback_samples(&self) -> u64 {
        self.fallback_samples
    }

    pub fn unparseable_replies(&self) -> u64 {
        self.unparseable_replies
    }

    pub fn retries(&self) -> u64 {
        self.retries
    }
}

// =============================================================================
// Hooks
// =============================================================================

/// Identifies the batch an observer is told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCommitted {
    /// 1-based.
    pub batch_index: u64,
    pub batch_size: u64,
    pub batch_count: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error("{0}")]
    Message(String),
}

#[async_trait]
pub trait BatchObserver: Send + Sync {
    async fn on_batch(
        &self,
        batch: BatchCommitted,
        snapshot: &RunSnapshot,
    ) -> Result<(), ObserverError>;
}

// =============================================================================
// Control loop
// =============================================================================

/// Drive a full run, updating `snapshot` after every batch.
///
/// Batches run strictly one after another; the next batch is not issued until
/// the previous one is committed and observed. Continues from
/// `snapshot.trials_completed()`, so a fresh snapshot runs all `max_users` trials.
pub async fn run_simulation<O>(
    oracle: &O,
    params: &RunParams,
    options: &SimulationOptions,
    snapshot: &mut RunSnapshot,
    observer: Option<&dyn BatchObserver>,
    trace: Option<&dyn TraceSink>,
) -> Result<(), ConfigurationError>
where
    O: EngagementOracle + ?Sized,
{
    params.validate()?;

    let prompt_a = params.render(Variant::A);
    let prompt_b = params.render(Variant::B);
    let plan = params.plan();
    let batch_count = plan.batch_count();

    info!(
        run_id = %snapshot.run_id(),
        max_users = params.max_users,
        batch_size = params.standard_batch_size,
        batches = batch_count,
        structured_output = options.structured_output,
        "simulation started"
    );

    while let Some(size) = plan.next_batch(snapshot.trials_completed()) {
        let batch = sample_batch(
            oracle,
            &prompt_a.text,
            &prompt_b.text,
            size as usize,
            options.structured_output,
            &options.retry,
        )
        .await;

        snapshot.record_batch(&batch);
        let committed = BatchCommitted {
            batch_index: snapshot.batches_completed(),
            batch_size: size,
            batch_count,
        };

        info!(
            batch = committed.batch_index,
            size,
            trials = snapshot.trials_completed(),
            total_a = snapshot.tally(Variant::A).total(),
            total_b = snapshot.tally(Variant::B).total(),
            fallbacks = batch.fallback_count(),
            "batch committed"
        );

        if let Some(trace) = trace {
            let event = BatchTrace {
                recorded_at: Utc::now(),
                run_id: snapshot.run_id(),
                batch_index: committed.batch_index,
                batch_size: size,
                trials_completed: snapshot.trials_completed(),
                prompt_a_hash: prompt_a.hash.clone(),
                prompt_b_hash: prompt_b.hash.clone(),
                structured_output: options.structured_output,
                tally_a: *snapshot.tally(Variant::A),
                tally_b: *snapshot.tally(Variant::B),
                verdicts: snapshot.verdicts().to_vec(),
                retries: batch.retry_count(),
                fallback_samples: batch.fallback_count(),
                unparseable_replies: batch.unparseable_count(),
            };
            if let Err(e) = trace.record(event) {
                warn!(batch = committed.batch_index, error = %e, "Failed to record batch trace");
            }
        }

        if let Some(observer) = observer {
            if let Err(e) = observer.on_batch(committed, snapshot).await {
                warn!(batch = committed.batch_index, error = %e, "Batch observer failed");
            }
        }
    }

    Ok(())
}
