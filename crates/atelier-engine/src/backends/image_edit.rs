use std::time::Duration;

use atelier_contracts::normalize::{GenerationConfig, Resolution, SafetyLevel};
use atelier_contracts::{DispatchError, Result};
use serde_json::Value;

use crate::config::AzureConfig;
use crate::resolver::ResolvedImage;
use crate::transport::{json_or_upstream, CallBody, FilePart, HttpCall, HttpTransport, MultipartBody};

const PROVIDER: &str = "image-edit";
const NO_PEOPLE_INSTRUCTION: &str = "Do not generate any people or faces.";

pub struct EditJob<'a> {
    pub prompt: &'a str,
    pub image: &'a ResolvedImage,
    pub mask: Option<&'a ResolvedImage>,
    pub n: u32,
    pub width: u32,
    pub height: u32,
    pub config: &'a GenerationConfig,
}

pub struct ImageEditBackend<'a> {
    azure: &'a AzureConfig,
    transport: &'a dyn HttpTransport,
    timeout: Duration,
}

impl<'a> ImageEditBackend<'a> {
    pub fn new(azure: &'a AzureConfig, transport: &'a dyn HttpTransport, timeout: Duration) -> Self {
        Self {
            azure,
            transport,
            timeout,
        }
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/openai/deployments/{}/images/edits?api-version={}",
            self.azure.endpoint, self.azure.deployment, self.azure.api_version
        )
    }

    pub fn build_form(&self, job: &EditJob<'_>) -> MultipartBody {
        let mut form = MultipartBody::default()
            .text("model", self.azure.deployment.clone())
            .text("prompt", edit_prompt(job.prompt, job.config.safety))
            .text("n", job.n.max(1).to_string())
            .text("size", edit_size(job.width, job.height))
            .text("quality", edit_quality(job.config.resolution))
            .text("input_fidelity", "high")
            .file(FilePart {
                field: "image[]".to_string(),
                file_name: job.image.file_name(),
                mime_type: job.image.mime_type.clone(),
                bytes: job.image.bytes.clone(),
            });
        if let Some(mask) = job.mask {
            form = form.file(FilePart {
                field: "mask".to_string(),
                file_name: "mask.png".to_string(),
                mime_type: "image/png".to_string(),
                bytes: mask.bytes.clone(),
            });
        }
        form
    }

    /// One edit call; the provider returns `n` images in a single reply.
    pub async fn edit(&self, job: EditJob<'_>) -> Result<Vec<String>> {
        let call = HttpCall::post(
            PROVIDER,
            self.endpoint(),
            self.timeout,
            CallBody::Multipart(self.build_form(&job)),
        )
        .header("api-key", self.azure.api_key.clone());
        let reply = self.transport.send(call).await?;
        let payload = json_or_upstream(PROVIDER, reply)?;
        extract_png_images(&payload)
    }
}

/// Wider requests get landscape, taller get portrait, otherwise square.
pub fn edit_size(width: u32, height: u32) -> &'static str {
    match width.cmp(&height) {
        std::cmp::Ordering::Greater => "1536x1024",
        std::cmp::Ordering::Less => "1024x1536",
        std::cmp::Ordering::Equal => "1024x1024",
    }
}

pub fn edit_quality(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::OneK => "medium",
        Resolution::TwoK | Resolution::FourK => "high",
    }
}

/// The edit API has no safety threshold, so `block_all` is expressed in the
/// prompt itself.
pub fn edit_prompt(prompt: &str, safety: SafetyLevel) -> String {
    let prompt = prompt.trim();
    match safety {
        SafetyLevel::BlockAll => format!("{prompt}\n\n{NO_PEOPLE_INSTRUCTION}"),
        SafetyLevel::AllowAll | SafetyLevel::AllowAdults => prompt.to_string(),
    }
}

fn extract_png_images(payload: &Value) -> Result<Vec<String>> {
    let images = payload
        .get("data")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row.get("b64_json").and_then(Value::as_str))
                .filter(|encoded| !encoded.is_empty())
                .map(|encoded| format!("data:image/png;base64,{encoded}"))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if images.is_empty() {
        return Err(DispatchError::InvalidResponse {
            provider: PROVIDER,
            detail: "no image data returned".to_string(),
        });
    }
    Ok(images)
}
