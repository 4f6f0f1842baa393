//! Per-call usage records.
//!
//! The gateway hands one [`ProviderCallRecord`] per HTTP call to a [`UsageSink`].
//! The CLI prints them to stderr with `--usage`; library callers plug in their own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::error::ProviderError;
use super::types::{ChatRequest, ChatResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderCallRecord {
    pub provider: &'static str,
    pub model: String,
    pub caller: &'static str,
    pub job_id: Option<Uuid>,
    pub status: CallStatus,
    /// [`ProviderError::code`] for failed calls.
    pub error_code: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency_ms: u64,
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProviderCallRecord {
    /// Record for one finished call.
    pub fn from_call(
        req: &ChatRequest,
        outcome: Result<&ChatResponse, &ProviderError>,
        latency_ms: u64,
    ) -> Self {
        let (status, error_code, input_tokens, output_tokens, request_id) = match outcome {
            Ok(resp) => (
                CallStatus::Success,
                None,
                resp.input_tokens,
                resp.output_tokens,
                resp.request_id.clone(),
            ),
            Err(err) => (
                CallStatus::Error,
                Some(err.code().to_string()),
                0,
                0,
                err.request_id().map(str::to_string),
            ),
        };
        Self {
            provider: req.model.provider(),
            model: req.model.model_id().to_string(),
            caller: req.attribution.caller,
            job_id: req.attribution.job_id,
            status,
            error_code,
            input_tokens,
            output_tokens,
            latency_ms,
            request_id,
            timestamp: Utc::now(),
        }
    }
}

/// Destination for usage records. Must not fail the call it describes.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, record: ProviderCallRecord);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: ProviderCallRecord) {}
}

/// One JSON line per call on stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrUsageSink;

#[async_trait]
impl UsageSink for StderrUsageSink {
    async fn record(&self, record: ProviderCallRecord) {
        match serde_json::to_string(&record) {
            Ok(line) => eprintln!("{line}"),
            Err(e) => tracing::warn!(error = %e, "failed to serialize usage record"),
        }
    }
}
