//! Provider registry and structured-output capability table.
//!
//! The sampling core never consults this table directly: callers resolve a
//! provider and model here and hand the engine a single `structured_output` flag.

use serde::Serialize;

use crate::gateway::ProviderError;

/// Static description of one OpenAI-compatible provider.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProviderSpec {
    pub name: &'static str,
    pub default_base_url: &'static str,
    pub base_url_env: &'static str,
    pub api_key_env: &'static str,
    /// Recommended models; the first one is the provider default.
    pub models: &'static [&'static str],
}

pub const PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        name: "openai",
        default_base_url: "https://api.openai.com/v1",
        base_url_env: "OPENAI_BASE_URL",
        api_key_env: "OPENAI_API_KEY",
        models: &["gpt-4o", "gpt-4-turbo", "gpt-3.5-turbo"],
    },
    ProviderSpec {
        name: "openrouter",
        default_base_url: "https://openrouter.ai/api/v1",
        base_url_env: "OPENROUTER_BASE_URL",
        api_key_env: "OPENROUTER_API_KEY",
        models: &[
            "openai/gpt-4o",
            "anthropic/claude-3-opus",
            "anthropic/claude-3-sonnet",
        ],
    },
    ProviderSpec {
        name: "siliconflow",
        default_base_url: "https://api.siliconflow.cn/v1",
        base_url_env: "SILICONFLOW_BASE_URL",
        api_key_env: "SILICONFLOW_API_KEY",
        models: &["Pro/deepseek-ai/DeepSeek-R1", "Pro/deepseek-ai/DeepSeek-V3"],
    },
    ProviderSpec {
        name: "nebius",
        default_base_url: "https://api.studio.nebius.ai/v1",
        base_url_env: "NEBIUS_BASE_URL",
        api_key_env: "NEBIUS_API_KEY",
        models: &["deepseek-ai/DeepSeek-V3"],
    },
    ProviderSpec {
        name: "aliyun",
        default_base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1",
        base_url_env: "ALIYUN_BASE_URL",
        api_key_env: "ALIYUN_API_KEY",
        models: &["qwen-max-latest", "deepseek-v3", "deepseek-r1"],
    },
    ProviderSpec {
        name: "zhipuai",
        default_base_url: "https://open.bigmodel.cn/api/paas/v4",
        base_url_env: "ZHIPUAI_BASE_URL",
        api_key_env: "ZHIPUAI_API_KEY",
        models: &["glm-4-plus", "glm-4"],
    },
    ProviderSpec {
        name: "deepseek",
        default_base_url: "https://api.deepseek.com/v1",
        base_url_env: "DEEPSEEK_BASE_URL",
        api_key_env: "DEEPSEEK_API_KEY",
        models: &["deepseek-reasoner", "deepseek-coder"],
    },
    ProviderSpec {
        name: "tencent",
        default_base_url: "https://api.lkeap.cloud.tencent.com/v1",
        base_url_env: "TENCENT_BASE_URL",
        api_key_env: "TENCENT_API_KEY",
        models: &["deepseek-r1", "hunyuan"],
    },
];

pub const DEFAULT_PROVIDER: &str = "openrouter";

/// Models that reject `response_format = json_object`.
pub const NON_STRUCTURED_MODELS: &[&str] = &["deepseek-reasoner", "deepseek-coder", "hunyuan"];

pub fn provider_by_name(name: &str) -> Option<&'static ProviderSpec> {
    let name = name.trim();
    PROVIDERS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

pub fn provider_names() -> Vec<&'static str> {
    PROVIDERS.iter().map(|p| p.name).collect()
}

/// Whether `model` can be asked for constrained JSON output.
pub fn supports_structured_output(model: &str) -> bool {
    !NON_STRUCTURED_MODELS.contains(&model)
}

/// A provider plus the model chosen on it.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSelection {
    pub provider: &'static ProviderSpec,
    pub model: String,
    pub structured_output: bool,
}

impl ProviderSpec {
    pub fn default_model(&self) -> Option<&'static str> {
        self.models.first().copied()
    }

    pub fn recommends(&self, model: &str) -> bool {
        self.models.contains(&model)
    }
}

/// Resolve `(provider, model)` into a selection with its capability flag.
///
/// An unknown provider is a configuration error. A model outside the provider's
/// recommended list is allowed but logged.
pub fn select_model(provider: &str, model: Option<&str>) -> Result<ModelSelection, ProviderError> {
    let spec = provider_by_name(provider).ok_or_else(|| {
        ProviderError::config(format!(
            "unsupported provider: {provider} (supported: {})",
            provider_names().join(", ")
        ))
    })?;

    let model = match model.map(str::trim).filter(|m| !m.is_empty()) {
        Some(m) => {
            if !spec.recommends(m) {
                tracing::warn!(
                    provider = spec.name,
                    model = m,
                    "model is not in the provider's recommended list"
                );
            }
            m.to_string()
        }
        None => spec
            .default_model()
            .ok_or_else(|| ProviderError::config(format!("{} has no default model", spec.name)))?
            .to_string(),
    };

    Ok(ModelSelection {
        provider: spec,
        structured_output: supports_structured_output(&model),
        model,
    })
}
