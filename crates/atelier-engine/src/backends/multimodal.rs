use std::time::Duration;

use atelier_contracts::media::{decode_base64, png_data_url};
use atelier_contracts::normalize::{GenerationConfig, SafetyLevel};
use atelier_contracts::{DispatchError, Result};
use serde_json::{json, Value};

use crate::assembler::ContentPayload;
use crate::config::GoogleConfig;
use crate::transport::{json_or_upstream, CallBody, HttpCall, HttpTransport};

const PROVIDER: &str = "multimodal";

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_HARASSMENT",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modalities {
    /// Single-card generation.
    Image,
    /// Composite layouts, where the model may reason in text first.
    TextAndImage,
}

impl Modalities {
    fn as_json(self) -> Value {
        match self {
            Self::Image => json!(["IMAGE"]),
            Self::TextAndImage => json!(["TEXT", "IMAGE"]),
        }
    }
}

pub struct MultimodalBackend<'a> {
    google: &'a GoogleConfig,
    transport: &'a dyn HttpTransport,
    timeout: Duration,
}

impl<'a> MultimodalBackend<'a> {
    pub fn new(google: &'a GoogleConfig, transport: &'a dyn HttpTransport, timeout: Duration) -> Self {
        Self {
            google,
            transport,
            timeout,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/publishers/google/models/{}:generateContent?key={}",
            self.google.api_base, self.google.image_model, self.google.api_key
        )
    }

    /// Issues `n` independent calls in sequence. Any failure fails the whole
    /// batch; earlier outputs are discarded.
    pub async fn generate(
        &self,
        content: &ContentPayload,
        config: &GenerationConfig,
        modalities: Modalities,
        n: u32,
    ) -> Result<Vec<String>> {
        let payload = build_payload(content, config, modalities);
        let mut images = Vec::new();
        for index in 0..n.max(1) {
            tracing::debug!(output = index + 1, of = n, "requesting multimodal output");
            images.push(self.generate_once(&payload).await?);
        }
        Ok(images)
    }

    async fn generate_once(&self, payload: &Value) -> Result<String> {
        let call = HttpCall::post(
            PROVIDER,
            self.endpoint(),
            self.timeout,
            CallBody::Json(payload.clone()),
        );
        let reply = self.transport.send(call).await?;
        let response = json_or_upstream(PROVIDER, reply)?;
        let bytes = first_inline_image(&response)?.ok_or_else(|| DispatchError::InvalidResponse {
            provider: PROVIDER,
            detail: "no image data returned".to_string(),
        })?;
        Ok(png_data_url(&bytes))
    }
}

pub fn build_payload(content: &ContentPayload, config: &GenerationConfig, modalities: Modalities) -> Value {
    json!({
        "contents": content.to_contents(),
        "generationConfig": {
            "temperature": config.temperature,
            "topP": config.top_p,
            "responseModalities": modalities.as_json(),
            "imageConfig": {
                "aspectRatio": config.aspect_ratio.as_str(),
                "imageSize": config.resolution.as_str(),
                "imageOutputOptions": { "mimeType": "image/png" },
            },
        },
        "safetySettings": safety_settings(config.safety),
    })
}

pub fn safety_settings(level: SafetyLevel) -> Vec<Value> {
    SAFETY_CATEGORIES
        .into_iter()
        .map(|category| {
            json!({
                "category": category,
                "threshold": level.threshold(),
            })
        })
        .collect()
}

/// Bytes of the first part that carries inline data, scanning candidates in
/// order.
fn first_inline_image(response: &Value) -> Result<Option<Vec<u8>>> {
    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for part in parts {
            let data = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(|inline| inline.get("data"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let bytes = decode_base64(data).map_err(|err| DispatchError::InvalidResponse {
                provider: PROVIDER,
                detail: format!("image base64 decode failed: {err}"),
            })?;
            return Ok(Some(bytes));
        }
    }
    Ok(None)
}
