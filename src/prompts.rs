//! Prompt templates for engagement predictions.
//!
//! Domain logic for rendering observer prompts. Provider-agnostic.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Platforms
// =============================================================================

/// Platform presets offered by the CLI. The engine only sees the label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Twitter,
    #[value(name = "tiktok")]
    TikTok,
    Instagram,
    #[value(name = "linkedin")]
    LinkedIn,
    Facebook,
    HackerNews,
    Reddit,
    BlogPost,
}

impl Platform {
    pub const ALL: [Platform; 8] = [
        Platform::Twitter,
        Platform::TikTok,
        Platform::Instagram,
        Platform::LinkedIn,
        Platform::Facebook,
        Platform::HackerNews,
        Platform::Reddit,
        Platform::BlogPost,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Platform::Twitter => "Twitter",
            Platform::TikTok => "TikTok",
            Platform::Instagram => "Instagram",
            Platform::LinkedIn => "LinkedIn",
            Platform::Facebook => "Facebook",
            Platform::HackerNews => "Hacker News",
            Platform::Reddit => "Reddit",
            Platform::BlogPost => "Blog Post",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Templates
// =============================================================================

pub const PLATFORM_PLACEHOLDER: &str = "{platform}";
pub const CONTENT_PLACEHOLDER: &str = "{content}";

/// Default observer prompt. Placeholders: `{platform}`, `{content}`.
pub const DEFAULT_TEMPLATE: &str = r#"Imagine you are a random user on {platform}. You came across the following content:
'''
{content}
'''
Decide whether to like, comment, share (retweet, repost, etc.), quote, or not.
Output your decision as a JSON object with the following fields:
- like: bool
- comment: bool
- share: bool
- quote: bool"#;

/// Appended to the prompt for models without constrained JSON output.
pub const SCHEMA_INSTRUCTION: &str = r#"Return the result as JSON in exactly this format:
{"like": number, "comment": number, "share": number, "quote": number}
Make sure the output is a valid JSON object and add no other text. Every value must be an integer (0 or 1), not a boolean."#;

/// Rendered prompt for one variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptInstance {
    pub text: String,
    /// blake3 hash of `text`, for traces.
    pub hash: String,
}

impl PromptInstance {
    fn new(text: String) -> Self {
        let hash = blake3::hash(text.as_bytes()).to_hex().to_string();
        Self { text, hash }
    }
}

/// Substitute platform label and content into `template`.
///
/// Content is inserted verbatim; the template is an opaque caller string.
pub fn render_prompt(template: &str, platform: &str, content: &str) -> PromptInstance {
    let text = template
        .replace(PLATFORM_PLACEHOLDER, platform.trim())
        .replace(CONTENT_PLACEHOLDER, content.trim());
    PromptInstance::new(text)
}

/// Prompt with the schema instruction appended.
pub fn with_schema_instruction(prompt: &str) -> String {
    format!("{}\n\n{SCHEMA_INSTRUCTION}", prompt.trim_end())
}

// =============================================================================
// TESTS
// =============================================================================
