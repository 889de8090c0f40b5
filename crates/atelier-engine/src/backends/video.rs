use std::time::Duration;

use async_trait::async_trait;
use atelier_contracts::media::encode_base64;
use atelier_contracts::requests::VideoRequest;
use atelier_contracts::{DispatchError, Result};
use serde_json::{json, Value};

use crate::config::GoogleConfig;
use crate::poller::{Operation, OperationClient, PollStatus};
use crate::resolver::ResolvedImage;
use crate::transport::{json_or_upstream, truncate_text, CallBody, HttpCall, HttpTransport};

const PROVIDER: &str = "video";

/// Two-phase video job: `launch` returns an operation name, and the
/// [`OperationClient`] impl checks its status.
pub struct VideoBackend<'a> {
    google: &'a GoogleConfig,
    transport: &'a dyn HttpTransport,
    timeout: Duration,
}

impl<'a> VideoBackend<'a> {
    pub fn new(google: &'a GoogleConfig, transport: &'a dyn HttpTransport, timeout: Duration) -> Self {
        Self {
            google,
            transport,
            timeout,
        }
    }

    fn launch_url(&self, model: &str) -> String {
        format!(
            "{}/projects/{}/locations/{}/publishers/google/models/{}:predictLongRunning?key={}",
            self.google.regional_base(),
            self.google.project_id,
            self.google.location,
            model,
            self.google.api_key
        )
    }

    fn status_url(&self, operation: &str) -> String {
        format!(
            "{}/{}?key={}",
            self.google.regional_base(),
            operation.trim_start_matches('/'),
            self.google.api_key
        )
    }

    pub async fn launch(&self, request: &VideoRequest, source: &ResolvedImage) -> Result<Operation> {
        let call = HttpCall::post(
            PROVIDER,
            self.launch_url(&request.model),
            self.timeout,
            CallBody::Json(launch_payload(request, source)),
        );
        let reply = self.transport.send(call).await?;
        if !reply.is_success() {
            tracing::warn!(
                status = reply.status,
                body = %truncate_text(&reply.body, 512),
                "video launch rejected"
            );
            return Err(DispatchError::LaunchError {
                provider: PROVIDER,
                status: reply.status,
                body: reply.body,
            });
        }
        let status = reply.status;
        let payload: Value = serde_json::from_str(&reply.body).map_err(|_| DispatchError::LaunchError {
            provider: PROVIDER,
            status,
            body: reply.body.clone(),
        })?;
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| DispatchError::LaunchError {
                provider: PROVIDER,
                status,
                body: payload.to_string(),
            })?;
        Ok(Operation::submitted(name))
    }
}

#[async_trait]
impl OperationClient for VideoBackend<'_> {
    async fn fetch_status(&self, operation: &str) -> Result<PollStatus> {
        let call = HttpCall::get(PROVIDER, self.status_url(operation), self.timeout);
        let reply = self.transport.send(call).await?;
        let payload = json_or_upstream(PROVIDER, reply)?;
        Ok(parse_poll_status(&payload))
    }
}

pub fn launch_payload(request: &VideoRequest, source: &ResolvedImage) -> Value {
    json!({
        "instances": [{
            "prompt": request.prompt,
            "image": {
                "bytesBase64Encoded": encode_base64(&source.bytes),
                "mimeType": source.mime_type,
            },
        }],
        "parameters": {
            "aspectRatio": request.aspect_ratio,
            "durationSeconds": request.duration,
            "resolution": request.resolution,
            "generateAudio": request.generate_audio,
            "sampleCount": 1,
        },
    })
}

/// `{done, response: {videos: [{bytesBase64Encoded}]}, error?}`
pub fn parse_poll_status(payload: &Value) -> PollStatus {
    if !payload.get("done").and_then(Value::as_bool).unwrap_or(false) {
        return PollStatus::Pending;
    }
    let video = payload
        .pointer("/response/videos/0/bytesBase64Encoded")
        .and_then(Value::as_str)
        .filter(|encoded| !encoded.is_empty())
        .map(str::to_string);
    let error = payload.get("error").map(|error| {
        error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string())
    });
    PollStatus::Done { video, error }
}
