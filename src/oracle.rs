//! Oracle client adapter: one engagement prediction per call.
//!
//! The sampler talks to [`EngagementOracle`] only. [`GatewayOracle`] is the
//! production implementation on top of a [`ChatGateway`]; tests plug in
//! in-process oracles.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;

use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest, Message, ProviderError};
use crate::prompts::with_schema_instruction;

/// Sampling temperature for observer predictions.
pub const ORACLE_TEMPERATURE: f32 = 0.7;
/// Generation cap for one prediction.
pub const ORACLE_MAX_TOKENS: u32 = 1024;

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("oracle returned an empty response")]
    EmptyResponse,
    /// Non-empty reply in which no outcome field could be found.
    #[error("oracle reply carried no outcome fields")]
    InvalidResponse,
}

/// Source of outcome documents.
///
/// `structured_output` says whether the backing model honours constrained JSON
/// output; when it does not, the implementation must ask for the schema in the
/// prompt and tolerate prose around the payload.
#[async_trait]
pub trait EngagementOracle: Send + Sync {
    async fn predict(&self, prompt: &str, structured_output: bool) -> Result<String, OracleError>;
}

#[async_trait]
impl<T: EngagementOracle + ?Sized> EngagementOracle for Arc<T> {
    async fn predict(&self, prompt: &str, structured_output: bool) -> Result<String, OracleError> {
        (**self).predict(prompt, structured_output).await
    }
}

/// [`EngagementOracle`] backed by a chat-completions gateway.
pub struct GatewayOracle {
    gateway: Arc<dyn ChatGateway>,
    model: ChatModel,
    attribution: Attribution,
    temperature: f32,
    max_tokens: u32,
}

impl GatewayOracle {
    pub fn new(gateway: Arc<dyn ChatGateway>, model: ChatModel) -> Self {
        Self {
            gateway,
            model,
            attribution: Attribution::new("oracle::predict"),
            temperature: ORACLE_TEMPERATURE,
            max_tokens: ORACLE_MAX_TOKENS,
        }
    }

    pub fn with_attribution(mut self, attribution: Attribution) -> Self {
        self.attribution = attribution;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }

    pub fn model(&self) -> &ChatModel {
        &self.model
    }

    fn build_request(&self, prompt: &str, structured_output: bool) -> ChatRequest {
        let content = if structured_output {
            prompt.to_string()
        } else {
            with_schema_instruction(prompt)
        };
        let request = ChatRequest::new(
            self.model.clone(),
            vec![Message::user(content)],
            self.attribution.clone(),
        )
        .temperature(self.temperature)
        .max_tokens(self.max_tokens);

        if structured_output {
            request.json()
        } else {
            request
        }
    }
}

#[async_trait]
impl EngagementOracle for GatewayOracle {
    async fn predict(&self, prompt: &str, structured_output: bool) -> Result<String, OracleError> {
        let request = self.build_request(prompt, structured_output);
        let response = self.gateway.chat(request).await?;

        if response.content.trim().is_empty() {
            return Err(OracleError::EmptyResponse);
        }

        if structured_output {
            Ok(response.content)
        } else {
            Ok(outermost_object_span(&response.content)
                .unwrap_or(&response.content)
                .to_string())
        }
    }
}

static OBJECT_SPAN: OnceLock<Regex> = OnceLock::new();

/// Text from the first `{` to the last `}`, when both exist.
fn outermost_object_span(text: &str) -> Option<&str> {
    let re = OBJECT_SPAN.get_or_init(|| Regex::new(r"\{[\s\S]*\}").expect("static pattern"));
    re.find(text).map(|m| m.as_str())
}
