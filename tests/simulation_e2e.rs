use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use viral_predictor::engine::{
    run_simulation, BatchCommitted, BatchObserver, ConfigurationError, ObserverError, RunParams,
    RunSnapshot, SimulationOptions,
};
use viral_predictor::gateway::openai_compat::OpenAiCompatAdapter;
use viral_predictor::gateway::{ChatModel, NoopUsageSink, ProviderGateway};
use viral_predictor::oracle::{EngagementOracle, GatewayOracle, OracleError};
use viral_predictor::resilient::RetryPolicy;
use viral_predictor::{Metric, Variant, VerdictBasis, Winner};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const LIKE_ONLY: &str = r#"{"like": 1, "comment": 0, "share": 0, "quote": 0}"#;
const NOTHING: &str = r#"{"like": 0, "comment": 0, "share": 0, "quote": 0}"#;

fn options() -> SimulationOptions {
    SimulationOptions {
        retry: RetryPolicy::immediate(3),
        structured_output: true,
    }
}

/// Answers by which variant's content appears in the prompt.
struct ByContent {
    a_marker: &'static str,
    a_answer: &'static str,
    b_answer: &'static str,
    calls: AtomicUsize,
}

impl ByContent {
    fn new(a_marker: &'static str, a_answer: &'static str, b_answer: &'static str) -> Self {
        Self {
            a_marker,
            a_answer,
            b_answer,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EngagementOracle for ByContent {
    async fn predict(&self, prompt: &str, _structured: bool) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.contains(self.a_marker) {
            Ok(self.a_answer.to_string())
        } else {
            Ok(self.b_answer.to_string())
        }
    }
}

#[derive(Default)]
struct BatchLog {
    batches: Mutex<Vec<(BatchCommitted, u64)>>,
}

#[async_trait]
impl BatchObserver for BatchLog {
    async fn on_batch(
        &self,
        batch: BatchCommitted,
        snapshot: &RunSnapshot,
    ) -> Result<(), ObserverError> {
        self.batches
            .lock()
            .unwrap()
            .push((batch, snapshot.trials_completed()));
        Ok(())
    }
}

#[tokio::test]
async fn deterministic_oracle_favours_a_on_likes() {
    let params = RunParams::new("Variant A: cats", "Variant B: taxes", "Twitter").max_users(10);
    let oracle = ByContent::new("cats", LIKE_ONLY, NOTHING);
    let mut snapshot = RunSnapshot::new(&params);

    run_simulation(&oracle, &params, &options(), &mut snapshot, None, None)
        .await
        .unwrap();

    assert_eq!(snapshot.trials_completed(), 10);
    assert_eq!(snapshot.tally(Variant::A).count(Metric::Like), 10);
    assert_eq!(snapshot.tally(Variant::B).count(Metric::Like), 0);

    let like = snapshot.verdict(Metric::Like).unwrap().verdict;
    assert_eq!((like.winner, like.confidence_percent), (Winner::A, 100.0));
    let comment = snapshot.verdict(Metric::Comment).unwrap().verdict;
    assert_eq!(
        (comment.winner, comment.confidence_percent),
        (Winner::Undecided, 0.0)
    );
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 20);
}

#[tokio::test]
async fn uneven_run_uses_a_short_final_batch() {
    let params = RunParams::new("aaa", "bbb", "Reddit")
        .max_users(23)
        .batch_size(5);
    let oracle = ByContent::new("aaa", LIKE_ONLY, LIKE_ONLY);
    let observer = BatchLog::default();
    let mut snapshot = RunSnapshot::new(&params);

    run_simulation(&oracle, &params, &options(), &mut snapshot, Some(&observer), None)
        .await
        .unwrap();

    let batches = observer.batches.lock().unwrap();
    let sizes: Vec<u64> = batches.iter().map(|(b, _)| b.batch_size).collect();
    assert_eq!(sizes, vec![5, 5, 5, 5, 3]);
    let trials: Vec<u64> = batches.iter().map(|(_, t)| *t).collect();
    assert_eq!(trials, vec![5, 10, 15, 20, 23]);
    assert!(batches.iter().all(|(b, _)| b.batch_count == 5));

    assert_eq!(snapshot.trials_completed(), 23);
    assert_eq!(snapshot.batches_completed(), 5);
    assert_eq!(snapshot.tally(Variant::A).samples(), 23);
    assert_eq!(snapshot.tally(Variant::B).samples(), 23);
    assert_eq!(snapshot.history().len(), 24);

    // Equal positive counts: tie goes to A with a coin-flip confidence.
    let like = snapshot.verdict(Metric::Like).unwrap().verdict;
    assert_eq!(like.winner, Winner::A);
    assert_eq!(like.basis, VerdictBasis::Undefined);
    assert_eq!(like.confidence_percent, 50.0);
}

/// Fails every call for variant A; answers normally for B.
struct ADown {
    a_calls: AtomicUsize,
}

#[async_trait]
impl EngagementOracle for ADown {
    async fn predict(&self, prompt: &str, _structured: bool) -> Result<String, OracleError> {
        if prompt.contains("broken") {
            self.a_calls.fetch_add(1, Ordering::SeqCst);
            Err(OracleError::EmptyResponse)
        } else {
            Ok(LIKE_ONLY.to_string())
        }
    }
}

#[tokio::test]
async fn failing_oracle_still_completes_every_trial_with_zero_samples() {
    let params = RunParams::new("broken", "fine", "LinkedIn")
        .max_users(23)
        .batch_size(5);
    let oracle = ADown {
        a_calls: AtomicUsize::new(0),
    };
    let mut snapshot = RunSnapshot::new(&params);

    run_simulation(&oracle, &params, &options(), &mut snapshot, None, None)
        .await
        .unwrap();

    let a = snapshot.tally(Variant::A);
    assert_eq!(a.samples(), 23);
    assert_eq!(a.total(), 0);
    assert_eq!(snapshot.tally(Variant::B).count(Metric::Like), 23);
    assert_eq!(snapshot.fallback_samples(), 23);
    assert_eq!(snapshot.retries(), 23 * 2);
    assert_eq!(oracle.a_calls.load(Ordering::SeqCst), 23 * 3);

    let like = snapshot.verdict(Metric::Like).unwrap().verdict;
    assert_eq!((like.winner, like.confidence_percent), (Winner::B, 100.0));
}

/// Fails every attempt of variant A's twelfth trial and answers everything else.
struct TwelfthTrialDown {
    a_answered: AtomicUsize,
    a_failed: AtomicUsize,
}

#[async_trait]
impl EngagementOracle for TwelfthTrialDown {
    async fn predict(&self, prompt: &str, _structured: bool) -> Result<String, OracleError> {
        if prompt.contains("victim")
            && self.a_answered.load(Ordering::SeqCst) == 11
            && self.a_failed.load(Ordering::SeqCst) < 3
        {
            self.a_failed.fetch_add(1, Ordering::SeqCst);
            return Err(OracleError::EmptyResponse);
        }
        if prompt.contains("victim") {
            self.a_answered.fetch_add(1, Ordering::SeqCst);
        }
        Ok(LIKE_ONLY.to_string())
    }
}

#[tokio::test]
async fn one_exhausted_request_costs_exactly_one_zero_sample() {
    // One trial per batch keeps the failing slot unambiguous.
    let params = RunParams::new("victim", "control", "Twitter")
        .max_users(23)
        .batch_size(1);
    let oracle = TwelfthTrialDown {
        a_answered: AtomicUsize::new(0),
        a_failed: AtomicUsize::new(0),
    };
    let mut snapshot = RunSnapshot::new(&params);

    run_simulation(&oracle, &params, &options(), &mut snapshot, None, None)
        .await
        .unwrap();

    let a = snapshot.tally(Variant::A);
    assert_eq!(a.samples(), 23);
    assert_eq!(a.count(Metric::Like), 22);
    assert_eq!(snapshot.tally(Variant::B).count(Metric::Like), 23);
    assert_eq!(snapshot.fallback_samples(), 1);
    assert_eq!(snapshot.retries(), 2);
    assert_eq!(oracle.a_failed.load(Ordering::SeqCst), 3);

    let history = snapshot.history();
    assert_eq!((history[11].total_a, history[12].total_a), (11, 11));
    assert_eq!(history[13].total_a, 12);
}

#[tokio::test]
async fn invalid_parameters_fail_before_any_oracle_call() {
    let oracle = ByContent::new("x", LIKE_ONLY, NOTHING);
    let params = RunParams::new("", "b", "Twitter");
    let mut snapshot = RunSnapshot::new(&params);

    let err = run_simulation(&oracle, &params, &options(), &mut snapshot, None, None)
        .await
        .unwrap_err();
    assert_eq!(err, ConfigurationError::EmptyContent(Variant::A));
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    assert_eq!(snapshot.trials_completed(), 0);
}

struct FailingObserver;

#[async_trait]
impl BatchObserver for FailingObserver {
    async fn on_batch(&self, _: BatchCommitted, _: &RunSnapshot) -> Result<(), ObserverError> {
        Err(ObserverError::Message("display went away".into()))
    }
}

#[tokio::test]
async fn observer_failures_do_not_abort_the_run() {
    let params = RunParams::new("a", "b", "Facebook").max_users(4).batch_size(2);
    let oracle = ByContent::new("a", NOTHING, NOTHING);
    let mut snapshot = RunSnapshot::new(&params);

    run_simulation(
        &oracle,
        &params,
        &options(),
        &mut snapshot,
        Some(&FailingObserver),
        None,
    )
    .await
    .unwrap();
    assert_eq!(snapshot.trials_completed(), 4);
}

/// Fails the first `failures` requests with a 500, then answers with `body`.
struct FlakyThenOk {
    calls: Arc<AtomicUsize>,
    failures: usize,
    body: &'static str,
}

impl Respond for FlakyThenOk {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            ResponseTemplate::new(500).set_body_json(json!({
                "error": { "message": "transient error", "code": "internal" }
            }))
        } else {
            ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": self.body }, "finish_reason": "stop" }]
            }))
        }
    }
}

#[tokio::test]
async fn http_oracle_recovers_from_transient_errors() {
    let server = MockServer::start().await;
    let calls = Arc::new(AtomicUsize::new(0));
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(FlakyThenOk {
            calls: calls.clone(),
            failures: 2,
            body: LIKE_ONLY,
        })
        .mount(&server)
        .await;

    let adapter = OpenAiCompatAdapter::with_config(
        "openrouter",
        "sk-test",
        server.uri(),
        Duration::from_secs(5),
        None,
        None,
    )
    .unwrap();
    let gateway = Arc::new(ProviderGateway::new(adapter, Arc::new(NoopUsageSink)));
    let oracle = GatewayOracle::new(gateway, ChatModel::openrouter("openai/gpt-4o"));

    let params = RunParams::new("a", "b", "Hacker News").max_users(3).batch_size(3);
    let mut snapshot = RunSnapshot::new(&params);
    run_simulation(&oracle, &params, &options(), &mut snapshot, None, None)
        .await
        .unwrap();

    assert_eq!(snapshot.trials_completed(), 3);
    assert_eq!(snapshot.fallback_samples(), 0);
    assert_eq!(snapshot.retries(), 2);
    let likes =
        snapshot.tally(Variant::A).count(Metric::Like) + snapshot.tally(Variant::B).count(Metric::Like);
    assert_eq!(likes, 6);
    assert_eq!(calls.load(Ordering::SeqCst), 8);
}

#[tokio::test(start_paused = true)]
async fn backoff_waits_are_bounded_by_the_retry_policy() {
    let params = RunParams::new("broken", "fine", "TikTok").max_users(1).batch_size(1);
    let oracle = ADown {
        a_calls: AtomicUsize::new(0),
    };
    let options = SimulationOptions {
        retry: RetryPolicy::new(3, Duration::from_secs(1)),
        structured_output: false,
    };
    let mut snapshot = RunSnapshot::new(&params);

    let start = tokio::time::Instant::now();
    run_simulation(&oracle, &params, &options, &mut snapshot, None, None)
        .await
        .unwrap();

    // 1s + 2s of backoff for the failing slot; no wait after the last attempt.
    assert_eq!(start.elapsed(), Duration::from_secs(3));
    assert_eq!(snapshot.fallback_samples(), 1);
}
