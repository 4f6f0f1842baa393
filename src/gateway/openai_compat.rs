//! Adapter for OpenAI-compatible chat completion endpoints.
//!
//! OpenRouter, OpenAI, DeepSeek, SiliconFlow and the other registered providers
//! all speak the same `/chat/completions` dialect; only base URL and credentials differ.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::types::{ChatRequest, ChatResponse, FinishReason, Message, OutputMode};
use crate::providers::ProviderSpec;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Largest response body we are willing to buffer.
const MAX_RESPONSE_BYTES: usize = 1 << 20;

/// Prompts above this are rejected before any bytes leave the process.
const MAX_PROMPT_CHARS: usize = 500_000;

/// HTTP timeout when `ORACLE_TIMEOUT_SECONDS` is unset.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const REFUSAL_OPENERS: &[&str] = &[
    "refus",
    "i cannot",
    "i can't",
    "i won't",
    "i will not",
    "i am unable to",
    "i'm unable to",
    "unable to comply",
    "unable to assist",
    "unable to help",
    "unable to provide",
];

/// Chat-completions adapter bound to one provider.
#[derive(Debug, Clone)]
pub struct OpenAiCompatAdapter {
    provider: &'static str,
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiCompatAdapter {
    /// Build from the environment variables registered for `spec`.
    ///
    /// The key must be set and non-blank. The base URL falls back to the
    /// registry default. OpenRouter additionally picks up
    /// `OPENROUTER_REFERER` and `OPENROUTER_APP_TITLE`.
    pub fn from_env(spec: &ProviderSpec) -> Result<Self, ProviderError> {
        let api_key = non_blank_env(spec.api_key_env)
            .ok_or_else(|| ProviderError::config(format!("{} not set", spec.api_key_env)))?;
        let base_url =
            non_blank_env(spec.base_url_env).unwrap_or_else(|| spec.default_base_url.to_string());
        let timeout = non_blank_env("ORACLE_TIMEOUT_SECONDS")
            .and_then(|s| s.trim().parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let (referer, app_title) = match spec.name {
            "openrouter" => (
                non_blank_env("OPENROUTER_REFERER"),
                non_blank_env("OPENROUTER_APP_TITLE"),
            ),
            _ => (None, None),
        };

        Self::with_config(spec.name, api_key, base_url, timeout, referer, app_title)
    }

    pub fn with_config(
        provider: &'static str,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        referer: Option<String>,
        app_title: Option<String>,
    ) -> Result<Self, ProviderError> {
        let headers = default_headers(&api_key.into(), referer.as_deref(), app_title.as_deref())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            provider,
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn read_capped_body(
        &self,
        mut response: reqwest::Response,
    ) -> Result<String, ProviderError> {
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > MAX_RESPONSE_BYTES {
                return Err(ProviderError::bad_response(
                    self.provider,
                    format!("response body exceeds {MAX_RESPONSE_BYTES} bytes"),
                    None,
                ));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn decode_success(
        &self,
        body: &str,
        ctx: ErrorContext,
    ) -> Result<(String, FinishReason, Option<WireUsage>), ProviderError> {
        let parsed: WireResponse = serde_json::from_str(body).map_err(|e| {
            ProviderError::bad_response(
                self.provider,
                format!("invalid JSON body: {e}"),
                Some(ctx.clone()),
            )
        })?;

        // Some providers report failures inside a 200.
        if let Some(error) = parsed.error {
            let message = error.message.unwrap_or_default();
            return Err(if looks_like_refusal(&message) {
                ProviderError::refused(message, Some(ctx))
            } else {
                ProviderError::bad_response(self.provider, message, Some(ctx))
            });
        }

        let Some(choice) = parsed.choices.into_iter().next() else {
            return Err(ProviderError::bad_response(
                self.provider,
                "response has no choices",
                Some(ctx),
            ));
        };

        let content = choice.message.map(WireChoiceMessage::into_text).unwrap_or_default();
        if looks_like_refusal(&content) {
            return Err(ProviderError::refused(content, Some(ctx)));
        }

        Ok((
            content,
            FinishReason::parse(choice.finish_reason.as_deref()),
            parsed.usage,
        ))
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let prompt_chars = req.prompt_chars();
        if prompt_chars > MAX_PROMPT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "prompt is {prompt_chars} chars, limit is {MAX_PROMPT_CHARS}"
            )));
        }

        let started = Instant::now();
        let response = self
            .client
            .post(self.chat_url())
            .json(&WireRequest::from(req))
            .send()
            .await?;

        let status = response.status().as_u16();
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let mut ctx = ErrorContext::new().with_status(status);
        if let Some(id) = &request_id {
            ctx = ctx.with_request_id(id);
        }

        let body = self.read_capped_body(response).await?;

        if !(200..300).contains(&status) {
            let (message, code) = error_details(&body);
            if let Some(code) = code {
                ctx = ctx.with_code(code);
            }
            let message = message.unwrap_or_else(|| format!("HTTP {status}"));
            return Err(ProviderError::from_status(self.provider, status, message, ctx));
        }

        let (content, finish_reason, usage) = self.decode_success(&body, ctx)?;
        let (input_tokens, output_tokens) = usage
            .map(|u| (u.prompt_tokens.unwrap_or(0), u.completion_tokens.unwrap_or(0)))
            .unwrap_or_default();

        Ok(ChatResponse {
            content: truncate_to_boundary(content, MAX_RESPONSE_BYTES),
            input_tokens,
            output_tokens,
            latency: started.elapsed(),
            finish_reason,
            request_id,
        })
    }
}

fn non_blank_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn default_headers(
    api_key: &str,
    referer: Option<&str>,
    app_title: Option<&str>,
) -> Result<HeaderMap, ProviderError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|_| ProviderError::config("API key is not a valid header value"))?;
    headers.insert(AUTHORIZATION, bearer);

    // Attribution headers are best effort; a bad value is dropped.
    for (name, value) in [("HTTP-Referer", referer), ("X-Title", app_title)] {
        if let Some(v) = value.and_then(|v| HeaderValue::from_str(v).ok()) {
            headers.insert(name, v);
        }
    }
    Ok(headers)
}

/// Refusals are recognised by their opening line, or the provider's stock phrase.
fn looks_like_refusal(text: &str) -> bool {
    let lower = text.trim_start().to_lowercase();
    let opener = lower.lines().next().unwrap_or_default();
    REFUSAL_OPENERS.iter().any(|p| opener.starts_with(p)) || lower.contains("request was refused")
}

/// `error.message` and `error.code` from a failure body, if it is JSON.
fn error_details(body: &str) -> (Option<String>, Option<String>) {
    let Ok(WireResponse {
        error: Some(error), ..
    }) = serde_json::from_str::<WireResponse>(body)
    else {
        return (None, None);
    };
    let code = error.code.map(|c| match c {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    });
    (error.message.filter(|m| !m.is_empty()), code)
}

fn truncate_to_boundary(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

impl<'a> From<&'a ChatRequest> for WireRequest<'a> {
    fn from(req: &'a ChatRequest) -> Self {
        Self {
            model: req.model.model_id(),
            messages: &req.messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            response_format: match req.output {
                OutputMode::Text => None,
                OutputMode::JsonObject => Some(serde_json::json!({ "type": "json_object" })),
            },
        }
    }
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
    error: Option<WireError>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: Option<WireChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

impl WireChoiceMessage {
    /// Message text, or the first non-empty tool-call arguments when a model
    /// answers a JSON-mode request through a tool call instead.
    fn into_text(self) -> String {
        match self.content {
            Some(text) if !text.trim().is_empty() => text,
            _ => self
                .tool_calls
                .into_iter()
                .filter_map(|call| call.function.and_then(|f| f.arguments))
                .find(|args| !args.trim().is_empty())
                .unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
struct WireToolCall {
    function: Option<WireFunction>,
}

#[derive(Deserialize)]
struct WireFunction {
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct WireError {
    message: Option<String>,
    code: Option<serde_json::Value>,
}
