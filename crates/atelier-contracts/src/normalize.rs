use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aspect::AspectRatio;

pub const DEFAULT_TEMPERATURE: f64 = 1.0;
pub const DEFAULT_TOP_P: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[default]
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    FourK,
}

impl Resolution {
    /// Uppercased match against `1K`/`2K`/`4K`; anything else is `1K`.
    pub fn parse_lenient(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_ascii_uppercase()).as_deref() {
            Some("2K") => Self::TwoK,
            Some("4K") => Self::FourK,
            _ => Self::OneK,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneK => "1K",
            Self::TwoK => "2K",
            Self::FourK => "4K",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    #[default]
    AllowAll,
    AllowAdults,
    BlockAll,
}

impl SafetyLevel {
    /// Lowercased match; unknown levels mean no restriction.
    pub fn parse_lenient(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("block_all") => Self::BlockAll,
            Some("allow_adults") => Self::AllowAdults,
            _ => Self::AllowAll,
        }
    }

    /// Per-category harm threshold understood by the multimodal backend.
    pub fn threshold(self) -> &'static str {
        match self {
            Self::AllowAll => "OFF",
            Self::AllowAdults => "BLOCK_MEDIUM_AND_ABOVE",
            Self::BlockAll => "BLOCK_LOW_AND_ABOVE",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllowAll => "allow_all",
            Self::AllowAdults => "allow_adults",
            Self::BlockAll => "block_all",
        }
    }
}

/// Tuning knobs exactly as the caller sent them: possibly missing, mistyped
/// or out of range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTuning {
    #[serde(default)]
    pub temperature: Option<Value>,
    #[serde(default)]
    pub top_p: Option<Value>,
    #[serde(default)]
    pub resolution: Option<Value>,
    #[serde(default)]
    pub safety_level: Option<Value>,
    #[serde(default, alias = "aspectRatio")]
    pub aspect_ratio: Option<Value>,
}

/// Backend-ready parameters derived from a request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub resolution: Resolution,
    pub safety: SafetyLevel,
    pub aspect_ratio: AspectRatio,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub config: GenerationConfig,
    pub notes: Vec<String>,
}

/// Invalid input never fails here; each field falls back to a default.
///
/// Field rules:
/// - temperature: number or numeric string, default 1.0, clamped to [0, 2]
/// - top_p: number or numeric string, default 0.95, clamped to [0, 1]
/// - resolution: `1K`/`2K`/`4K` case-insensitive, default `1K`
/// - safety_level: `block_all`/`allow_adults` case-insensitive, else `allow_all`
/// - aspect ratio: explicit ratio text first, then nearest to `width/height`
pub fn normalize(raw: &RawTuning, width: u32, height: u32) -> Normalized {
    let mut notes = Vec::new();
    let temperature = bounded_number(raw.temperature.as_ref(), DEFAULT_TEMPERATURE, 0.0, 2.0);
    let top_p = bounded_number(raw.top_p.as_ref(), DEFAULT_TOP_P, 0.0, 1.0);
    let resolution = Resolution::parse_lenient(raw.resolution.as_ref().and_then(Value::as_str));
    let safety = SafetyLevel::parse_lenient(raw.safety_level.as_ref().and_then(Value::as_str));
    let (aspect_ratio, snapped) = AspectRatio::resolve(
        raw.aspect_ratio.as_ref().and_then(Value::as_str),
        width,
        height,
    );
    if snapped {
        notes.push(format!("aspect ratio snapped to {aspect_ratio}."));
    }
    Normalized {
        config: GenerationConfig {
            temperature,
            top_p,
            resolution,
            safety,
            aspect_ratio,
        },
        notes,
    }
}

fn bounded_number(value: Option<&Value>, default: f64, min: f64, max: f64) -> f64 {
    let parsed = value
        .and_then(|row| match row {
            Value::Number(num) => num.as_f64(),
            Value::String(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|number| number.is_finite());
    parsed.unwrap_or(default).clamp(min, max)
}
