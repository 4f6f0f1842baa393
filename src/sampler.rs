//! Batch sampler: fan out one batch of oracle queries for both variants.
//!
//! A batch issues `2 * batch_size` queries concurrently and resolves only once
//! every query has either produced a normalized sample or exhausted its retries
//! and been replaced by the all-zero fallback. Oracle errors, blank replies and
//! replies with no outcome fields all count as failed attempts. Results are returned in trial
//! order per variant so `a[i]` and `b[i]` belong to the same trial.

use std::sync::atomic::{AtomicU32, Ordering};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::normalize::{normalize_outcome, NormalizedOutcome, ParseSource};
use crate::oracle::{EngagementOracle, OracleError};
use crate::outcome::{OutcomeSample, Variant};
use crate::resilient::{resilient_call, RetryPolicy};

// =============================================================================
// Batch plan
// =============================================================================

/// Splits a run of `max_users` trials into batches of at most `standard_batch_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    max_users: u64,
    standard_batch_size: u64,
}

impl BatchPlan {
    pub fn new(max_users: u64, standard_batch_size: u64) -> Self {
        Self {
            max_users,
            standard_batch_size,
        }
    }

    /// Size of the batch that follows `trials_so_far` completed trials, or `None`
    /// once the run is complete.
    pub fn next_batch(&self, trials_so_far: u64) -> Option<u64> {
        if self.standard_batch_size == 0 || trials_so_far >= self.max_users {
            return None;
        }
        Some(self.standard_batch_size.min(self.max_users - trials_so_far))
    }

    /// Every batch size in order.
    pub fn sizes(&self) -> Vec<u64> {
        let mut sizes = Vec::new();
        let mut done = 0;
        while let Some(size) = self.next_batch(done) {
            sizes.push(size);
            done += size;
        }
        sizes
    }

    pub fn batch_count(&self) -> u64 {
        if self.standard_batch_size == 0 {
            return 0;
        }
        self.max_users.div_ceil(self.standard_batch_size)
    }
}

// =============================================================================
// Batch outcome
// =============================================================================

/// One resolved query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub sample: OutcomeSample,
    pub source: ParseSource,
    /// Oracle calls spent on this slot.
    pub attempts: u32,
    /// Every attempt failed; `sample` is the all-zero fallback.
    pub fell_back: bool,
    /// Replies on this slot that carried no outcome fields.
    #[serde(default)]
    pub invalid_replies: u32,
}

/// Samples for one batch, indexed by trial within the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub a: Vec<SampleRecord>,
    pub b: Vec<SampleRecord>,
}

impl BatchOutcome {
    pub fn len(&self) -> usize {
        self.a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }

    pub fn records(&self, variant: Variant) -> &[SampleRecord] {
        match variant {
            Variant::A => &self.a,
            Variant::B => &self.b,
        }
    }

    fn all(&self) -> impl Iterator<Item = &SampleRecord> {
        self.a.iter().chain(self.b.iter())
    }

    /// Slots that ended on the fallback sample.
    pub fn fallback_count(&self) -> u64 {
        self.all().filter(|r| r.fell_back).count() as u64
    }

    /// Extra oracle calls spent on retries.
    pub fn retry_count(&self) -> u64 {
        self.all()
            .map(|r| u64::from(r.attempts.saturating_sub(1)))
            .sum()
    }

    /// Oracle replies in this batch that carried no outcome fields.
    pub fn unparseable_count(&self) -> u64 {
        self.all().map(|r| u64::from(r.invalid_replies)).sum()
    }
}

// =============================================================================
// Sampling
// =============================================================================

/// Run one batch: `batch_size` queries per variant, all in flight together.
pub async fn sample_batch<O>(
    oracle: &O,
    prompt_a: &str,
    prompt_b: &str,
    batch_size: usize,
    structured_output: bool,
    policy: &RetryPolicy,
) -> BatchOutcome
where
    O: EngagementOracle + ?Sized,
{
    if batch_size == 0 {
        return BatchOutcome::default();
    }

    let slots = Variant::BOTH
        .into_iter()
        .flat_map(|variant| (0..batch_size).map(move |_| variant));

    // `buffered` keeps input order, so results line up by trial index.
    let resolved = stream::iter(slots.map(|variant| {
        let prompt = match variant {
            Variant::A => prompt_a,
            Variant::B => prompt_b,
        };
        async move {
            let invalid_counter = AtomicU32::new(0);
            let invalid = &invalid_counter;
            let out = resilient_call(policy, NormalizedOutcome::zero(), || async move {
                let attempt = query_once(oracle, prompt, structured_output).await;
                if matches!(attempt, Err(OracleError::InvalidResponse)) {
                    invalid.fetch_add(1, Ordering::Relaxed);
                }
                attempt
            })
            .await;
            SampleRecord {
                sample: out.value.sample,
                source: out.value.source,
                attempts: out.attempts,
                fell_back: out.fell_back,
                invalid_replies: invalid_counter.into_inner(),
            }
        }
    }))
    .buffered(2 * batch_size)
    .collect::<Vec<_>>()
    .await;

    let mut a = resolved;
    let b = a.split_off(batch_size);
    BatchOutcome { a, b }
}

async fn query_once<O>(
    oracle: &O,
    prompt: &str,
    structured_output: bool,
) -> Result<NormalizedOutcome, OracleError>
where
    O: EngagementOracle + ?Sized,
{
    let raw = oracle.predict(prompt, structured_output).await?;
    if raw.trim().is_empty() {
        return Err(OracleError::EmptyResponse);
    }
    let normalized = normalize_outcome(&raw);
    if normalized.source == ParseSource::Unparseable {
        return Err(OracleError::InvalidResponse);
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Barrier;

    #[test]
    fn plan_with_remainder() {
        let plan = BatchPlan::new(23, 5);
        assert_eq!(plan.sizes(), vec![5, 5, 5, 5, 3]);
        assert_eq!(plan.batch_count(), 5);
        assert_eq!(plan.next_batch(20), Some(3));
        assert_eq!(plan.next_batch(23), None);
    }

    #[test]
    fn plan_smaller_than_one_batch() {
        assert_eq!(BatchPlan::new(3, 5).sizes(), vec![3]);
        assert_eq!(BatchPlan::new(10, 5).sizes(), vec![5, 5]);
        assert!(BatchPlan::new(0, 5).sizes().is_empty());
        assert!(BatchPlan::new(5, 0).sizes().is_empty());
    }

    /// Echoes a payload chosen from the prompt.
    struct ByPrompt;

    #[async_trait]
    impl EngagementOracle for ByPrompt {
        async fn predict(&self, prompt: &str, _structured: bool) -> Result<String, OracleError> {
            if prompt == "A" {
                Ok(r#"{"like": 1, "comment": 0, "share": 0, "quote": 0}"#.to_string())
            } else {
                Ok(r#"{"like": 0, "comment": 0, "share": 1, "quote": 0}"#.to_string())
            }
        }
    }

    #[tokio::test]
    async fn batch_yields_batch_size_samples_per_variant() {
        let out = sample_batch(&ByPrompt, "A", "B", 4, true, &RetryPolicy::immediate(3)).await;
        assert_eq!(out.a.len(), 4);
        assert_eq!(out.b.len(), 4);
        assert!(out.a.iter().all(|r| r.sample == OutcomeSample::new(1, 0, 0, 0)));
        assert!(out.b.iter().all(|r| r.sample == OutcomeSample::new(0, 0, 1, 0)));
        assert_eq!(out.retry_count(), 0);
        assert_eq!(out.fallback_count(), 0);
    }

    /// Returns an empty payload on the first call of every prompt.
    struct EmptyThenValid {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EngagementOracle for EmptyThenValid {
        async fn predict(&self, prompt: &str, _structured: bool) -> Result<String, OracleError> {
            let mut calls = self.calls.lock().unwrap();
            let seen = calls.iter().any(|p| p == prompt);
            calls.push(prompt.to_string());
            if seen {
                Ok(r#"{"quote": true}"#.to_string())
            } else {
                Ok("   ".to_string())
            }
        }
    }

    #[tokio::test]
    async fn empty_response_is_retried() {
        let oracle = EmptyThenValid {
            calls: Mutex::new(Vec::new()),
        };
        let out = sample_batch(&oracle, "A", "B", 1, false, &RetryPolicy::immediate(3)).await;
        assert_eq!(out.a[0].attempts, 2);
        assert_eq!(out.a[0].sample, OutcomeSample::new(0, 0, 0, 1));
        assert_eq!(out.b[0].attempts, 2);
        assert_eq!(out.retry_count(), 2);
    }

    struct AlwaysDown {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EngagementOracle for AlwaysDown {
        async fn predict(&self, _prompt: &str, _structured: bool) -> Result<String, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(OracleError::EmptyResponse)
        }
    }

    #[tokio::test]
    async fn exhausted_slots_fall_back_to_zero() {
        let oracle = AlwaysDown {
            calls: AtomicUsize::new(0),
        };
        let out = sample_batch(&oracle, "A", "B", 3, true, &RetryPolicy::immediate(3)).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out.fallback_count(), 6);
        assert!(out
            .a
            .iter()
            .chain(out.b.iter())
            .all(|r| r.sample == OutcomeSample::ZERO && r.attempts == 3));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 18);
    }

    /// Answers in prose on the first call of every prompt, then in JSON.
    struct ProseThenJson {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EngagementOracle for ProseThenJson {
        async fn predict(&self, prompt: &str, _structured: bool) -> Result<String, OracleError> {
            let mut calls = self.calls.lock().unwrap();
            let seen = calls.iter().any(|p| p == prompt);
            calls.push(prompt.to_string());
            if seen {
                Ok(r#"{"like": 1, "comment": 0, "share": 0, "quote": 0}"#.to_string())
            } else {
                Ok("I would probably scroll past.".to_string())
            }
        }
    }

    #[tokio::test]
    async fn reply_without_outcome_fields_is_retried() {
        let oracle = ProseThenJson {
            calls: Mutex::new(Vec::new()),
        };
        let out = sample_batch(&oracle, "A", "B", 1, true, &RetryPolicy::immediate(3)).await;
        for record in out.a.iter().chain(out.b.iter()) {
            assert_eq!(record.attempts, 2);
            assert_eq!(record.sample, OutcomeSample::new(1, 0, 0, 0));
            assert_eq!(record.source, ParseSource::Json);
            assert_eq!(record.invalid_replies, 1);
            assert!(!record.fell_back);
        }
        assert_eq!(out.unparseable_count(), 2);
        assert_eq!(out.retry_count(), 2);
    }

    struct Prose;

    #[async_trait]
    impl EngagementOracle for Prose {
        async fn predict(&self, _prompt: &str, _structured: bool) -> Result<String, OracleError> {
            Ok("I would probably scroll past.".to_string())
        }
    }

    #[tokio::test]
    async fn persistent_prose_falls_back_after_every_attempt() {
        let out = sample_batch(&Prose, "A", "B", 2, true, &RetryPolicy::immediate(3)).await;
        assert_eq!(out.fallback_count(), 4);
        assert_eq!(out.unparseable_count(), 12);
        assert!(out
            .a
            .iter()
            .chain(out.b.iter())
            .all(|r| r.sample == OutcomeSample::ZERO && r.attempts == 3));
    }

    /// Blocks every call until `2 * batch_size` calls are waiting at once.
    struct Rendezvous {
        barrier: Barrier,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl EngagementOracle for Rendezvous {
        async fn predict(&self, prompt: &str, _structured: bool) -> Result<String, OracleError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.barrier.wait().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(format!(r#"{{"comment": {}}}"#, u32::from(prompt == "B")))
        }
    }

    #[tokio::test]
    async fn whole_batch_is_in_flight_together() {
        let batch_size = 4;
        let oracle = Rendezvous {
            barrier: Barrier::new(2 * batch_size),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        };

        // A sequential sampler would park on the barrier forever.
        let out = tokio::time::timeout(
            Duration::from_secs(5),
            sample_batch(&oracle, "A", "B", batch_size, true, &RetryPolicy::immediate(1)),
        )
        .await
        .expect("batch queries did not run concurrently");

        assert_eq!(oracle.peak.load(Ordering::SeqCst), 2 * batch_size);
        assert_eq!(oracle.in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(out.len(), batch_size);
        assert!(out.a.iter().all(|r| r.sample == OutcomeSample::ZERO && !r.fell_back));
        assert!(out.b.iter().all(|r| r.sample == OutcomeSample::new(0, 1, 0, 0)));
    }
}
