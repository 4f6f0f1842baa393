//! Provider gateway for OpenAI-compatible chat completions.
//!
//! One call through the gateway is one HTTP request: retries belong to the
//! caller (see [`crate::resilient`]), so the sampler owns the whole fault policy.

pub mod error;
pub mod openai_compat;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::Instant;

use openai_compat::{ChatProvider, OpenAiCompatAdapter};
use usage::{ProviderCallRecord, UsageSink as UsageSinkTrait};

use crate::providers::ProviderSpec;

pub use error::{ErrorContext, ProviderError};
pub use types::*;
pub use usage::{CallStatus, NoopUsageSink, StderrUsageSink, UsageSink};

#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

pub struct ProviderGateway<U: UsageSinkTrait> {
    adapter: OpenAiCompatAdapter,
    usage_sink: Arc<U>,
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait> ChatGateway for ProviderGateway<U> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }
}

impl<U: UsageSinkTrait> ProviderGateway<U> {
    pub fn from_env(spec: &ProviderSpec, usage_sink: Arc<U>) -> Result<Self, ProviderError> {
        let adapter = OpenAiCompatAdapter::from_env(spec)?;
        Ok(Self {
            adapter,
            usage_sink,
        })
    }

    pub fn new(adapter: OpenAiCompatAdapter, usage_sink: Arc<U>) -> Self {
        Self {
            adapter,
            usage_sink,
        }
    }

    pub fn provider(&self) -> &'static str {
        self.adapter.provider()
    }

    /// One attempt; the outcome is reported to the usage sink either way.
    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let started = Instant::now();
        let outcome = self.adapter.chat(&req).await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if let Err(err) = &outcome {
            tracing::debug!(
                provider = self.provider(),
                code = err.code(),
                retryable = err.is_retryable(),
                "provider call failed"
            );
        }
        let record = ProviderCallRecord::from_call(&req, outcome.as_ref(), latency_ms);
        self.usage_sink.record(record).await;
        outcome
    }
}
