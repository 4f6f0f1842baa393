//! Normalization of raw oracle text into an [`OutcomeSample`].
//!
//! Never fails. The ladder is: whole payload as JSON, first balanced `{...}`
//! span as JSON, per-field `"key": token` scan, then all zeros. A field that
//! cannot be determined on the rung that succeeded counts as `0`.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::outcome::{OutcomeField, OutcomeSample};

/// Which rung of the ladder produced the sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseSource {
    /// The whole payload parsed as a JSON object.
    Json,
    /// A balanced `{...}` span inside the payload parsed as a JSON object.
    EmbeddedJson,
    /// Field values were scanned out of broken JSON.
    FieldScan,
    /// Nothing usable; the all-zero sample.
    Unparseable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedOutcome {
    pub sample: OutcomeSample,
    pub source: ParseSource,
}

impl NormalizedOutcome {
    pub fn zero() -> Self {
        Self {
            sample: OutcomeSample::ZERO,
            source: ParseSource::Unparseable,
        }
    }
}

/// Longest payload excerpt carried into log lines.
const LOG_PREVIEW_CHARS: usize = 200;

static FIELD_PATTERNS: OnceLock<[(OutcomeField, Regex); 4]> = OnceLock::new();

fn field_patterns() -> &'static [(OutcomeField, Regex); 4] {
    FIELD_PATTERNS.get_or_init(|| {
        OutcomeField::ALL.map(|field| {
            let pattern = format!(r#"(?i)"{}"\s*:\s*(true|false|\d+)"#, field.key());
            // Static pattern built from fixed keys; compiling cannot fail.
            let re = Regex::new(&pattern).expect("field pattern is valid");
            (field, re)
        })
    })
}

/// Convert an oracle payload into a canonical sample.
pub fn normalize_outcome(raw: &str) -> NormalizedOutcome {
    let trimmed = raw.trim();

    if let Some(obj) = parse_object(trimmed) {
        return NormalizedOutcome {
            sample: sample_from_object(&obj),
            source: ParseSource::Json,
        };
    }

    if let Some(span) = first_balanced_object(trimmed) {
        if let Some(obj) = parse_object(span) {
            return NormalizedOutcome {
                sample: sample_from_object(&obj),
                source: ParseSource::EmbeddedJson,
            };
        }
    }

    if let Some(sample) = scan_fields(trimmed) {
        warn!(
            payload = %preview(trimmed),
            "oracle payload is not valid JSON; recovered fields by pattern scan"
        );
        return NormalizedOutcome {
            sample,
            source: ParseSource::FieldScan,
        };
    }

    warn!(
        payload = %preview(trimmed),
        "oracle payload carried no outcome fields; recording all-zero sample"
    );
    NormalizedOutcome::zero()
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

fn sample_from_object(obj: &Map<String, Value>) -> OutcomeSample {
    let mut sample = OutcomeSample::ZERO;
    for field in OutcomeField::ALL {
        let value = obj.get(field.key()).map(coerce_value).unwrap_or(0);
        sample.set(field, value);
    }
    sample
}

/// Coerce one JSON value to a non-negative count.
///
/// Booleans map to 0/1, numbers are truncated, strings are parsed as integers
/// or as `"true"`/`"false"`. Anything else, and any negative value, is 0.
pub fn coerce_value(value: &Value) -> u32 {
    match value {
        Value::Bool(b) => u32::from(*b),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                clamp_u32(u)
            } else if let Some(f) = n.as_f64() {
                truncate_f64(f)
            } else {
                0
            }
        }
        Value::String(s) => coerce_str(s),
        Value::Null | Value::Array(_) | Value::Object(_) => 0,
    }
}

fn coerce_str(s: &str) -> u32 {
    let t = s.trim();
    if let Ok(i) = t.parse::<i64>() {
        return if i < 0 { 0 } else { clamp_u32(i as u64) };
    }
    if t.eq_ignore_ascii_case("true") {
        1
    } else {
        0
    }
}

fn clamp_u32(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

fn truncate_f64(f: f64) -> u32 {
    if f.is_finite() && f > 0.0 {
        // `as` saturates for out-of-range floats.
        f.trunc() as u32
    } else {
        0
    }
}

/// First balanced `{...}` span, ignoring braces inside JSON strings.
pub fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let remainder = &text[start..];
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in remainder.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&remainder[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn scan_fields(text: &str) -> Option<OutcomeSample> {
    let mut sample = OutcomeSample::ZERO;
    let mut found = false;
    for (field, re) in field_patterns() {
        let Some(token) = re.captures(text).and_then(|c| c.get(1)) else {
            continue;
        };
        found = true;
        let token = token.as_str();
        let value = if token.eq_ignore_ascii_case("true") {
            1
        } else if token.eq_ignore_ascii_case("false") {
            0
        } else {
            token.parse::<u64>().map(clamp_u32).unwrap_or(u32::MAX)
        };
        sample.set(*field, value);
    }
    found.then_some(sample)
}

fn preview(text: &str) -> String {
    if text.chars().count() <= LOG_PREVIEW_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(LOG_PREVIEW_CHARS).collect();
    out.push('…');
    out
}
