use serde::{Deserialize, Serialize};

use crate::normalize::RawTuning;

pub const DEFAULT_DIMENSION: u32 = 1024;
/// Most outputs one request may ask for; the front end offers up to four.
pub const MAX_OUTPUTS: u32 = 4;
pub const DEFAULT_COMPOSITE_PROMPT: &str = "Generate a professional retail eblast layout featuring these products. Use a clean, modern design.";

/// Single-card image request as sent by the front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub image_path: String,
    #[serde(default)]
    pub custom_prompt: Option<String>,
    #[serde(default)]
    pub mask_path: Option<String>,
    #[serde(default)]
    pub n: Option<u32>,
    #[serde(default = "default_server_version")]
    pub server_version: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(flatten)]
    pub tuning: RawTuning,
}

impl GenerationRequest {
    pub fn new(image_path: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            custom_prompt: Some(prompt.into()),
            mask_path: None,
            n: None,
            server_version: default_server_version(),
            width: None,
            height: None,
            tuning: RawTuning::default(),
        }
    }

    /// Missing or zero dimensions read as 1024.
    pub fn dimensions(&self) -> (u32, u32) {
        (
            non_zero_or(self.width, DEFAULT_DIMENSION),
            non_zero_or(self.height, DEFAULT_DIMENSION),
        )
    }

    /// `n` clamped to `1..=MAX_OUTPUTS`.
    pub fn output_count(&self) -> u32 {
        self.n.unwrap_or(1).clamp(1, MAX_OUTPUTS)
    }

    /// True when `n` asked for more outputs than one request may produce.
    pub fn output_count_capped(&self) -> bool {
        self.n.is_some_and(|n| n > MAX_OUTPUTS)
    }

    pub fn prompt(&self) -> Option<&str> {
        self.custom_prompt
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Multi-image layout request ("eblast").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeRequest {
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub settings: RawTuning,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl CompositeRequest {
    /// Layouts default to a portrait 1080x1920 frame.
    pub fn dimensions(&self) -> (u32, u32) {
        (non_zero_or(self.width, 1080), non_zero_or(self.height, 1920))
    }

    pub fn instruction(&self) -> &str {
        self.prompt
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_COMPOSITE_PROMPT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRequest {
    pub image_path: String,
    pub prompt: String,
    #[serde(default = "default_video_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default = "default_video_resolution")]
    pub resolution: String,
    #[serde(default = "default_video_duration")]
    pub duration: u32,
    #[serde(default)]
    pub generate_audio: bool,
    #[serde(default = "default_video_model")]
    pub model: String,
}

impl VideoRequest {
    pub fn new(image_path: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            image_path: image_path.into(),
            prompt: prompt.into(),
            aspect_ratio: default_video_aspect_ratio(),
            resolution: default_video_resolution(),
            duration: default_video_duration(),
            generate_audio: false,
            model: default_video_model(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleAnalysisRequest {
    pub images: Vec<String>,
    pub model_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResponse {
    pub images: Vec<String>,
    pub backend: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoResponse {
    pub video: String,
    pub operation: String,
    pub polls: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleAnalysis {
    pub prompt: String,
}

fn non_zero_or(value: Option<u32>, default: u32) -> u32 {
    value.filter(|value| *value > 0).unwrap_or(default)
}

fn default_server_version() -> String {
    "v2".to_string()
}

fn default_video_aspect_ratio() -> String {
    "16:9".to_string()
}

fn default_video_resolution() -> String {
    "1080p".to_string()
}

fn default_video_duration() -> u32 {
    8
}

fn default_video_model() -> String {
    "veo-3.1-generate-001".to_string()
}
