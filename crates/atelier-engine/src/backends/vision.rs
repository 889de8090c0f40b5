use std::time::Duration;

use atelier_contracts::requests::{StyleAnalysis, StyleAnalysisRequest};
use atelier_contracts::{DispatchError, Result};
use serde_json::{json, Value};

use crate::config::{AzureConfig, VisionDeployment};
use crate::transport::{json_or_upstream, CallBody, HttpCall, HttpTransport};

const PROVIDER: &str = "vision";
const MAX_TOKENS: u32 = 1000;
const TEMPERATURE: f64 = 0.7;

/// Reverse-engineers a reusable generation prompt from sample designs.
pub struct StyleAnalyzer<'a> {
    azure: &'a AzureConfig,
    vision: &'a VisionDeployment,
    transport: &'a dyn HttpTransport,
    timeout: Duration,
}

impl<'a> StyleAnalyzer<'a> {
    pub fn new(
        azure: &'a AzureConfig,
        vision: &'a VisionDeployment,
        transport: &'a dyn HttpTransport,
        timeout: Duration,
    ) -> Self {
        Self {
            azure,
            vision,
            transport,
            timeout,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.azure.endpoint, self.vision.deployment, self.vision.api_version
        )
    }

    pub async fn analyze(&self, request: &StyleAnalysisRequest) -> Result<StyleAnalysis> {
        if request.images.is_empty() {
            return Err(DispatchError::InvalidRequest("no images provided".to_string()));
        }
        let call = HttpCall::post(
            PROVIDER,
            self.endpoint(),
            self.timeout,
            CallBody::Json(chat_payload(request)),
        )
        .header("api-key", self.azure.api_key.clone());
        let reply = self.transport.send(call).await?;
        let payload = json_or_upstream(PROVIDER, reply)?;
        let prompt = payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| DispatchError::InvalidResponse {
                provider: PROVIDER,
                detail: "missing choices[0].message.content".to_string(),
            })?;
        Ok(StyleAnalysis {
            prompt: prompt.to_string(),
        })
    }
}

fn instruction(model_name: &str) -> String {
    format!(
        "You are an expert graphic design analyst. These images are samples of a retail design system named '{model_name}'.\n\
         Write a highly detailed image generation prompt that recreates this exact style for a NEW product.\n\
         Cover only:\n\
         1. Background color (hex codes), texture and lighting.\n\
         2. Typography hierarchy (weight, color, placement of price vs. name).\n\
         3. Badge styles (shape, color, location).\n\
         4. Composition and product placement.\n\n\
         Output only the raw prompt text, with no conversational filler."
    )
}

/// Text block first, then one `image_url` block per sample.
pub fn chat_payload(request: &StyleAnalysisRequest) -> Value {
    let mut content = vec![json!({
        "type": "text",
        "text": instruction(&request.model_name),
    })];
    content.extend(request.images.iter().map(|image| {
        json!({
            "type": "image_url",
            "image_url": { "url": image },
        })
    }));
    json!({
        "messages": [
            { "role": "system", "content": "You are a helpful assistant." },
            { "role": "user", "content": content },
        ],
        "max_tokens": MAX_TOKENS,
        "temperature": TEMPERATURE,
    })
}
