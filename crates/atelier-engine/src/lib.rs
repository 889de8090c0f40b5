pub mod assembler;
pub mod backends;
pub mod config;
pub mod poller;
pub mod resolver;
pub mod transport;

use std::sync::Arc;

use atelier_contracts::backends::ImageBackend;
use atelier_contracts::events::{EventPayload, EventTrail, RequestEvents};
use atelier_contracts::media::mp4_data_url;
use atelier_contracts::normalize::normalize;
use atelier_contracts::requests::{
    CompositeRequest, GenerationRequest, ImageResponse, StyleAnalysis, StyleAnalysisRequest,
    VideoRequest, VideoResponse,
};
use atelier_contracts::{DispatchError, Result};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::assembler::{push_unique_warning, ContentAssembler};
use crate::backends::{EditJob, ImageEditBackend, Modalities, MultimodalBackend, StyleAnalyzer, VideoBackend};
use crate::poller::{OperationPoller, Sleeper, TokioSleeper};
use crate::resolver::{MediaKind, ReferenceResolver, ResolvedImage};
use crate::transport::{HttpTransport, ReqwestTransport};

pub use crate::config::EngineConfig;

/// Routes each request: reference resolution, backend selection, parameter
/// normalization, provider call, and for video the operation poll loop.
pub struct Orchestrator {
    config: Arc<EngineConfig>,
    resolver: ReferenceResolver,
    transport: Arc<dyn HttpTransport>,
    sleeper: Arc<dyn Sleeper>,
    events: Option<EventTrail>,
}

impl Orchestrator {
    pub fn new(config: EngineConfig) -> Self {
        let resolver = ReferenceResolver::new(config.media_root.clone(), config.temp_dir.clone());
        Self {
            config: Arc::new(config),
            resolver,
            transport: Arc::new(ReqwestTransport::new()),
            sleeper: Arc::new(TokioSleeper),
            events: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Every request appends to this trail under its own request id.
    pub fn with_events(mut self, events: EventTrail) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Single-card image request routed by `server_version`.
    pub async fn generate_images(&self, request: &GenerationRequest) -> Result<ImageResponse> {
        let trail = self.trail("image").await;
        let span = tracing::info_span!("image", request_id = %trail.request_id);
        let result = self
            .run_images(request, &trail)
            .instrument(span)
            .await;
        trail
            .finish(result, |response| json!({ "images": response.images.len() }))
            .await
    }

    /// Multi-image layout through the multimodal backend.
    pub async fn generate_composite(&self, request: &CompositeRequest) -> Result<ImageResponse> {
        let trail = self.trail("composite").await;
        let span = tracing::info_span!("composite", request_id = %trail.request_id);
        let result = self
            .run_composite(request, &trail)
            .instrument(span)
            .await;
        trail
            .finish(result, |response| json!({ "images": response.images.len() }))
            .await
    }

    /// Launches a video job and polls it to a terminal state. `cancel` stops
    /// the poll loop at the next sleep.
    pub async fn generate_video(
        &self,
        request: &VideoRequest,
        cancel: Option<CancellationToken>,
    ) -> Result<VideoResponse> {
        let trail = self.trail("video").await;
        let span = tracing::info_span!("video", request_id = %trail.request_id);
        let result = self
            .run_video(request, cancel, &trail)
            .instrument(span)
            .await;
        trail
            .finish(result, |response| {
                json!({ "operation": response.operation, "polls": response.polls })
            })
            .await
    }

    pub async fn analyze_style(&self, request: &StyleAnalysisRequest) -> Result<StyleAnalysis> {
        let trail = self.trail("analyze_style").await;
        let span = tracing::info_span!("analyze_style", request_id = %trail.request_id);
        let result = self.run_style(request).instrument(span).await;
        trail.finish(result, |_| json!({})).await
    }

    async fn run_style(&self, request: &StyleAnalysisRequest) -> Result<StyleAnalysis> {
        let (azure, vision) = self.config.require_vision()?;
        let analyzer =
            StyleAnalyzer::new(azure, vision, self.transport.as_ref(), self.config.timeouts.vision);
        let analysis = analyzer.analyze(request).await?;
        tracing::info!(images = request.images.len(), "style analysis finished");
        Ok(analysis)
    }

    async fn run_images(
        &self,
        request: &GenerationRequest,
        trail: &RequestTrail,
    ) -> Result<ImageResponse> {
        let mut warnings = Vec::new();
        let selection = ImageBackend::select(&request.server_version);
        if let Some(reason) = selection.fallback_reason {
            tracing::warn!(selector = %selection.requested, "unknown backend selector");
            push_unique_warning(&mut warnings, reason);
        }
        let backend = selection.backend;
        trail
            .emit(
                "backend_selected",
                json!({ "backend": backend.name(), "requested": selection.requested }),
            )
            .await;

        let (width, height) = request.dimensions();
        let normalized = normalize(&request.tuning, width, height);
        for note in normalized.notes {
            push_unique_warning(&mut warnings, note);
        }
        let config = normalized.config;
        let n = request.output_count();
        if request.output_count_capped() {
            tracing::warn!(requested = ?request.n, n, "output count capped");
            push_unique_warning(&mut warnings, format!("Output count capped at {n}."));
        }

        let images = match backend {
            ImageBackend::ImageEdit => {
                let prompt = request.prompt().ok_or(DispatchError::MissingPrompt)?;
                let azure = self.config.require_azure(backend.name())?;
                let image = self.resolve(&request.image_path, MediaKind::Image, trail).await?;
                let mask = self.resolve_mask(request.mask_path.as_deref(), trail, &mut warnings).await;
                ImageEditBackend::new(azure, self.transport.as_ref(), self.config.timeouts.image_edit)
                    .edit(EditJob {
                        prompt,
                        image: &image,
                        mask: mask.as_ref(),
                        n,
                        width,
                        height,
                        config: &config,
                    })
                    .await?
            }
            ImageBackend::Multimodal => {
                let google = self.config.require_google(backend.name())?;
                let image = self.resolve(&request.image_path, MediaKind::Image, trail).await?;
                let mut assembler = ContentAssembler::new();
                assembler.push_resolved(&image);
                let (content, skipped) = assembler.finish(request.prompt().unwrap_or_default());
                for warning in skipped {
                    push_unique_warning(&mut warnings, warning);
                }
                MultimodalBackend::new(google, self.transport.as_ref(), self.config.timeouts.multimodal)
                    .generate(&content, &config, Modalities::Image, n)
                    .await?
            }
        };

        tracing::info!(backend = backend.name(), images = images.len(), "image request finished");
        Ok(ImageResponse {
            images,
            backend: backend.name().to_string(),
            warnings,
        })
    }

    async fn run_composite(
        &self,
        request: &CompositeRequest,
        trail: &RequestTrail,
    ) -> Result<ImageResponse> {
        let backend = ImageBackend::Multimodal;
        let google = self.config.require_google(backend.name())?;
        if request.images.is_empty() {
            return Err(DispatchError::InvalidRequest("no images provided".to_string()));
        }
        trail
            .emit(
                "backend_selected",
                json!({ "backend": backend.name(), "requested": "composite" }),
            )
            .await;

        let mut warnings = Vec::new();
        let (width, height) = request.dimensions();
        let normalized = normalize(&request.settings, width, height);
        for note in normalized.notes {
            push_unique_warning(&mut warnings, note);
        }

        let mut assembler = ContentAssembler::new();
        for (index, reference) in request.images.iter().enumerate() {
            assembler.push_encoded(index, reference);
        }
        if assembler.image_count() == 0 {
            return Err(DispatchError::InvalidRequest(
                "none of the supplied images could be decoded".to_string(),
            ));
        }
        let (content, skipped) = assembler.finish(request.instruction());
        for warning in skipped {
            push_unique_warning(&mut warnings, warning);
        }

        let images = MultimodalBackend::new(google, self.transport.as_ref(), self.config.timeouts.multimodal)
            .generate(&content, &normalized.config, Modalities::TextAndImage, 1)
            .await?;
        tracing::info!(
            images = content.image_count(),
            aspect_ratio = %normalized.config.aspect_ratio,
            "composite request finished"
        );
        Ok(ImageResponse {
            images,
            backend: backend.name().to_string(),
            warnings,
        })
    }

    async fn run_video(
        &self,
        request: &VideoRequest,
        cancel: Option<CancellationToken>,
        trail: &RequestTrail,
    ) -> Result<VideoResponse> {
        let google = self.config.require_google("video")?;
        let source = self
            .resolve(&request.image_path, MediaKind::VideoSource, trail)
            .await?;
        let backend = VideoBackend::new(google, self.transport.as_ref(), self.config.timeouts.video);

        let mut operation = backend.launch(request, &source).await?;
        drop(source);
        tracing::info!(operation = operation.name(), model = %request.model, "video job submitted");
        trail
            .emit(
                "operation_submitted",
                json!({ "operation": operation.name(), "model": request.model }),
            )
            .await;

        let mut poller = OperationPoller::new(&backend, self.sleeper.as_ref(), self.config.poll);
        if let Some(cancel) = cancel {
            poller = poller.with_cancellation(cancel);
        }
        while poller.step(&mut operation).await? {
            trail
                .emit(
                    "operation_polled",
                    json!({
                        "operation": operation.name(),
                        "polls": operation.polls(),
                        "status": operation.status().as_str(),
                    }),
                )
                .await;
        }

        let name = operation.name().to_string();
        let polls = operation.polls();
        let video = operation.into_video()?;
        Ok(VideoResponse {
            video: mp4_data_url(&video),
            operation: name,
            polls,
            warnings: Vec::new(),
        })
    }

    async fn resolve(
        &self,
        reference: &str,
        kind: MediaKind,
        trail: &RequestTrail,
    ) -> Result<ResolvedImage> {
        let image = self.resolver.resolve_as(reference, kind).await?;
        trail
            .emit(
                "reference_resolved",
                json!({
                    "path": image.path.to_string_lossy(),
                    "mime_type": image.mime_type,
                    "temporary": image.is_temporary(),
                }),
            )
            .await;
        Ok(image)
    }

    /// Masks are optional; one that cannot be resolved is dropped with a
    /// warning.
    async fn resolve_mask(
        &self,
        reference: Option<&str>,
        trail: &RequestTrail,
        warnings: &mut Vec<String>,
    ) -> Option<ResolvedImage> {
        let reference = reference.map(str::trim).filter(|value| !value.is_empty())?;
        match self.resolve(reference, MediaKind::Image, trail).await {
            Ok(mask) => Some(mask),
            Err(err) => {
                tracing::warn!(error = %err, "mask ignored");
                push_unique_warning(warnings, format!("Mask ignored: {err}"));
                None
            }
        }
    }

    async fn trail(&self, kind: &str) -> RequestTrail {
        let request_id = Uuid::new_v4().to_string();
        let events = self
            .events
            .as_ref()
            .map(|trail| trail.request(request_id.clone()));
        let trail = RequestTrail { request_id, events };
        trail.emit("request_started", json!({ "request": kind })).await;
        trail
    }
}

/// Event trail scoped to one request. Write failures are logged only.
struct RequestTrail {
    request_id: String,
    events: Option<RequestEvents>,
}

impl RequestTrail {
    async fn emit(&self, event_type: &'static str, payload: Value) {
        let Some(events) = self.events.clone() else {
            return;
        };
        let fields: EventPayload = match payload {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        };
        let written = tokio::task::spawn_blocking(move || events.record(event_type, fields)).await;
        match written {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => tracing::warn!(event = event_type, error = %err, "event write failed"),
            Err(err) => tracing::warn!(event = event_type, error = %err, "event write task failed"),
        }
    }

    async fn finish<T>(&self, result: Result<T>, summary: impl FnOnce(&T) -> Value) -> Result<T> {
        match &result {
            Ok(value) => self.emit("request_finished", summary(value)).await,
            Err(err) => {
                tracing::warn!(request_id = %self.request_id, kind = err.kind(), error = %err, "request failed");
                self.emit(
                    "request_failed",
                    json!({ "kind": err.kind(), "status": err.status_code(), "detail": err.to_string() }),
                )
                .await;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use atelier_contracts::events::EventTrail;
    use atelier_contracts::media::png_data_url;
    use atelier_contracts::requests::{
        CompositeRequest, GenerationRequest, StyleAnalysisRequest, VideoRequest, MAX_OUTPUTS,
    };
    use atelier_contracts::DispatchError;
    use serde_json::{json, Value};

    use super::Orchestrator;
    use crate::config::{AzureConfig, EngineConfig, GoogleConfig, PollSettings};
    use crate::poller::testing::InstantSleeper;
    use crate::transport::testing::RecordingTransport;
    use crate::transport::{CallBody, HttpReply};

    fn azure() -> AzureConfig {
        AzureConfig {
            endpoint: "https://studio.openai.azure.com".to_string(),
            api_key: "azure-key".to_string(),
            deployment: "gpt-image-1".to_string(),
            api_version: "2025-04-01-preview".to_string(),
            vision: None,
        }
    }

    fn gemini_image_reply() -> HttpReply {
        HttpReply::new(
            200,
            json!({"candidates": [{"content": {"parts": [{"inlineData": {"mimeType": "image/png", "data": "QQ=="}}]}}]})
                .to_string(),
        )
    }

    struct Fixture {
        _media: tempfile::TempDir,
        temp: tempfile::TempDir,
        transport: Arc<RecordingTransport>,
        orchestrator: Orchestrator,
    }

    fn fixture(
        replies: Vec<HttpReply>,
        configure: impl FnOnce(EngineConfig) -> EngineConfig,
    ) -> anyhow::Result<Fixture> {
        let media = tempfile::tempdir()?;
        std::fs::create_dir_all(media.path().join("public/Image"))?;
        std::fs::write(media.path().join("public/Image/card.png"), b"card-bytes")?;
        std::fs::write(media.path().join("public/Image/mask.png"), b"mask-bytes")?;
        let temp = tempfile::tempdir()?;
        let config = configure(EngineConfig::new(media.path()).with_temp_dir(temp.path()));
        let transport = Arc::new(RecordingTransport::new(replies));
        let orchestrator = Orchestrator::new(config)
            .with_transport(transport.clone())
            .with_sleeper(Arc::new(InstantSleeper::default()));
        Ok(Fixture {
            _media: media,
            temp,
            transport,
            orchestrator,
        })
    }

    fn sent_json(transport: &RecordingTransport, index: usize) -> Value {
        match &transport.calls()[index].body {
            CallBody::Json(body) => body.clone(),
            other => panic!("expected json body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn edit_without_prompt_fails_before_any_call() -> anyhow::Result<()> {
        let fx = fixture(Vec::new(), |config| config.with_azure(azure()))?;
        let mut request = GenerationRequest::new("public/Image/card.png", "   ");
        request.server_version = "v1".to_string();

        let err = fx.orchestrator.generate_images(&request).await.unwrap_err();
        assert!(matches!(err, DispatchError::MissingPrompt));
        assert_eq!(fx.transport.call_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn selected_backend_without_credentials_is_not_configured() -> anyhow::Result<()> {
        let fx = fixture(Vec::new(), |config| config.with_azure(azure()))?;
        let request = GenerationRequest::new("public/Image/card.png", "beach");

        let err = fx.orchestrator.generate_images(&request).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::BackendNotConfigured { backend: "multimodal", .. }
        ));
        assert_eq!(fx.transport.call_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn aspect_ratio_follows_requested_dimensions() -> anyhow::Result<()> {
        for ((width, height), expected) in [
            ((1920, 1080), "16:9"),
            ((1080, 1920), "9:16"),
            ((1500, 1500), "1:1"),
        ] {
            let fx = fixture(vec![gemini_image_reply()], |config| {
                config.with_google(GoogleConfig::new("g-key"))
            })?;
            let mut request = GenerationRequest::new("public/Image/card.png", "beach");
            request.width = Some(width);
            request.height = Some(height);

            let response = fx.orchestrator.generate_images(&request).await?;
            assert_eq!(response.backend, "multimodal");
            assert_eq!(response.images, vec![png_data_url(b"A")]);
            let body = sent_json(&fx.transport, 0);
            assert_eq!(body["generationConfig"]["imageConfig"]["aspectRatio"], json!(expected));
        }
        Ok(())
    }

    #[tokio::test]
    async fn multimodal_sends_image_before_prompt() -> anyhow::Result<()> {
        let fx = fixture(vec![gemini_image_reply(), gemini_image_reply()], |config| {
            config.with_google(GoogleConfig::new("g-key"))
        })?;
        let mut request = GenerationRequest::new("/Image/card.png", "Put it on a beach");
        request.n = Some(2);

        let response = fx.orchestrator.generate_images(&request).await?;
        assert_eq!(response.images.len(), 2);
        assert_eq!(fx.transport.call_count(), 2);
        let parts = &sent_json(&fx.transport, 0)["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], json!("image/png"));
        assert_eq!(parts[0]["inlineData"]["data"], json!("Y2FyZC1ieXRlcw=="));
        assert_eq!(parts[1]["text"], json!("Put it on a beach"));
        Ok(())
    }

    #[tokio::test]
    async fn oversized_output_count_is_capped_with_warning() -> anyhow::Result<()> {
        let replies = (0..MAX_OUTPUTS).map(|_| gemini_image_reply()).collect();
        let fx = fixture(replies, |config| config.with_google(GoogleConfig::new("g-key")))?;
        let mut request = GenerationRequest::new("public/Image/card.png", "beach");
        request.n = Some(u32::MAX);

        let response = fx.orchestrator.generate_images(&request).await?;
        assert_eq!(response.images.len(), MAX_OUTPUTS as usize);
        assert_eq!(fx.transport.call_count(), MAX_OUTPUTS as usize);
        assert_eq!(
            response.warnings,
            vec![format!("Output count capped at {MAX_OUTPUTS}.")]
        );
        Ok(())
    }

    #[tokio::test]
    async fn unknown_selector_falls_back_to_edit_with_warning() -> anyhow::Result<()> {
        let fx = fixture(
            vec![HttpReply::new(200, r#"{"data":[{"b64_json":"QUJD"}]}"#)],
            |config| config.with_azure(azure()),
        )?;
        let mut request = GenerationRequest::new("public/Image/card.png", "beach");
        request.server_version = "v3".to_string();
        request.mask_path = Some("public/Image/missing-mask.png".to_string());

        let response = fx.orchestrator.generate_images(&request).await?;
        assert_eq!(response.backend, "image-edit");
        assert_eq!(response.images, vec!["data:image/png;base64,QUJD".to_string()]);
        assert_eq!(
            response.warnings[0],
            "Unknown backend selector 'v3'; using image-edit."
        );
        assert!(response.warnings[1].starts_with("Mask ignored:"));
        let calls = fx.transport.calls();
        let CallBody::Multipart(form) = &calls[0].body else {
            panic!("expected multipart body");
        };
        assert_eq!(form.files.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn edit_attaches_resolved_mask() -> anyhow::Result<()> {
        let fx = fixture(
            vec![HttpReply::new(200, r#"{"data":[{"b64_json":"QUJD"}]}"#)],
            |config| config.with_azure(azure()),
        )?;
        let mut request = GenerationRequest::new("card.png", "beach");
        request.server_version = "v1".to_string();
        request.mask_path = Some("public/Image/mask.png".to_string());

        let response = fx.orchestrator.generate_images(&request).await?;
        assert!(response.warnings.is_empty());
        let calls = fx.transport.calls();
        let CallBody::Multipart(form) = &calls[0].body else {
            panic!("expected multipart body");
        };
        assert_eq!(form.files[1].field, "mask");
        assert_eq!(form.files[1].bytes, b"mask-bytes".to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn unresolvable_reference_is_not_found() -> anyhow::Result<()> {
        let fx = fixture(Vec::new(), |config| config.with_google(GoogleConfig::new("g-key")))?;
        let request = GenerationRequest::new("public/Image/nope.png", "beach");
        let err = fx.orchestrator.generate_images(&request).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert_eq!(fx.transport.call_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn composite_skips_malformed_images_and_uses_default_instruction() -> anyhow::Result<()> {
        let fx = fixture(vec![gemini_image_reply()], |config| {
            config.with_google(GoogleConfig::new("g-key"))
        })?;
        let request: CompositeRequest = serde_json::from_value(json!({
            "images": [png_data_url(b"one"), "data:image/png;base64,@@", png_data_url(b"two")],
            "settings": {"resolution": "4k"},
        }))?;

        let response = fx.orchestrator.generate_composite(&request).await?;
        assert_eq!(response.warnings.len(), 1);
        assert!(response.warnings[0].starts_with("Skipped image 2:"));

        let body = sent_json(&fx.transport, 0);
        let parts = body["contents"][0]["parts"].as_array().cloned().unwrap_or_default();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].get("inlineData").is_some());
        assert!(parts[1].get("inlineData").is_some());
        assert_eq!(
            parts[2]["text"],
            json!(atelier_contracts::requests::DEFAULT_COMPOSITE_PROMPT)
        );
        assert_eq!(body["generationConfig"]["imageConfig"]["aspectRatio"], json!("9:16"));
        assert_eq!(body["generationConfig"]["imageConfig"]["imageSize"], json!("4K"));
        assert_eq!(
            body["generationConfig"]["responseModalities"],
            json!(["TEXT", "IMAGE"])
        );
        Ok(())
    }

    #[tokio::test]
    async fn composite_with_no_usable_images_is_rejected() -> anyhow::Result<()> {
        let fx = fixture(Vec::new(), |config| config.with_google(GoogleConfig::new("g-key")))?;
        let request: CompositeRequest =
            serde_json::from_value(json!({"images": ["public/Image/card.png"]}))?;
        let err = fx.orchestrator.generate_composite(&request).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
        assert_eq!(fx.transport.call_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn video_runs_launch_then_polls_and_records_events() -> anyhow::Result<()> {
        let fx = fixture(
            vec![
                HttpReply::new(200, r#"{"name":"operations/77"}"#),
                HttpReply::new(200, r#"{"done":false}"#),
                HttpReply::new(200, r#"{"done":false}"#),
                HttpReply::new(200, r#"{"done":false}"#),
                HttpReply::new(200, r#"{"done":true,"response":{"videos":[{"bytesBase64Encoded":"TVA0"}]}}"#),
            ],
            |config| config.with_google(GoogleConfig::new("g-key")),
        )?;
        let events_path = fx.temp.path().join("events.jsonl");
        let orchestrator = fx
            .orchestrator
            .with_events(EventTrail::new(&events_path));
        let request = VideoRequest::new(png_data_url(b"frame"), "slow pan");

        let response = orchestrator.generate_video(&request, None).await?;
        assert_eq!(response.video, "data:video/mp4;base64,TVA0");
        assert_eq!(response.operation, "operations/77");
        assert_eq!(response.polls, 4);
        assert_eq!(fx.transport.call_count(), 5);

        let text = std::fs::read_to_string(&events_path)?;
        let events: Vec<Value> = text
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        let types: Vec<&str> = events
            .iter()
            .filter_map(|event| event["type"].as_str())
            .collect();
        assert_eq!(
            types,
            vec![
                "request_started",
                "reference_resolved",
                "operation_submitted",
                "operation_polled",
                "operation_polled",
                "operation_polled",
                "operation_polled",
                "request_finished",
            ]
        );
        let request_id = events[0]["request_id"].clone();
        assert!(request_id.as_str().is_some_and(|id| !id.is_empty()));
        assert!(events.iter().all(|event| event["request_id"] == request_id));
        assert_eq!(events[6]["status"], json!("done"));
        Ok(())
    }

    #[tokio::test]
    async fn video_that_never_finishes_times_out_at_ceiling() -> anyhow::Result<()> {
        let fx = fixture(
            vec![HttpReply::new(200, r#"{"name":"operations/slow"}"#)],
            |config| {
                config
                    .with_google(GoogleConfig::new("g-key"))
                    .with_poll(PollSettings {
                        interval: Duration::from_secs(5),
                        max_polls: 60,
                    })
            },
        )?;
        let transport = Arc::new(
            RecordingTransport::new(vec![HttpReply::new(200, r#"{"name":"operations/slow"}"#)])
                .repeating(HttpReply::new(200, r#"{"done":false}"#)),
        );
        let orchestrator = fx.orchestrator.with_transport(transport.clone());
        let request = VideoRequest::new(png_data_url(b"frame"), "slow pan");

        let err = orchestrator.generate_video(&request, None).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { polls: 60, .. }));
        assert_eq!(transport.call_count(), 61);
        Ok(())
    }

    #[tokio::test]
    async fn failed_request_is_recorded_in_trail() -> anyhow::Result<()> {
        let fx = fixture(Vec::new(), |config| config.with_google(GoogleConfig::new("g-key")))?;
        let events_path = fx.temp.path().join("trail/events.jsonl");
        let orchestrator = fx
            .orchestrator
            .with_events(EventTrail::new(&events_path));
        let request = VideoRequest::new("public/Video/missing.mp4", "p");

        let err = orchestrator.generate_video(&request, None).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
        let text = std::fs::read_to_string(&events_path)?;
        let last: Value = text
            .lines()
            .last()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or(Value::Null);
        assert_eq!(last["type"], json!("request_failed"));
        assert_eq!(last["status"], json!(404));
        Ok(())
    }

    #[tokio::test]
    async fn unwritable_trail_does_not_fail_the_request() -> anyhow::Result<()> {
        let fx = fixture(vec![gemini_image_reply()], |config| {
            config.with_google(GoogleConfig::new("g-key"))
        })?;
        let blocker = fx.temp.path().join("blocker");
        std::fs::write(&blocker, b"not a directory")?;
        let orchestrator = fx
            .orchestrator
            .with_events(EventTrail::new(blocker.join("events.jsonl")));
        let request = GenerationRequest::new("public/Image/card.png", "beach");

        let response = orchestrator.generate_images(&request).await?;
        assert_eq!(response.images, vec![png_data_url(b"A")]);
        assert!(!blocker.join("events.jsonl").exists());
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_trail() -> anyhow::Result<()> {
        let fx = fixture(vec![gemini_image_reply(), gemini_image_reply()], |config| {
            config.with_google(GoogleConfig::new("g-key"))
        })?;
        let events_path = fx.temp.path().join("events.jsonl");
        let orchestrator = fx.orchestrator.with_events(EventTrail::new(&events_path));
        let first = GenerationRequest::new("public/Image/card.png", "beach");
        let second = GenerationRequest::new("public/Image/card.png", "forest");

        let (a, b) = tokio::join!(
            orchestrator.generate_images(&first),
            orchestrator.generate_images(&second)
        );
        a?;
        b?;

        let text = std::fs::read_to_string(&events_path)?;
        let events: Vec<Value> = text
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        let mut ids: Vec<&str> = events
            .iter()
            .filter_map(|event| event["request_id"].as_str())
            .collect();
        assert_eq!(ids.len(), events.len());
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 2);
        let finished = events
            .iter()
            .filter(|event| event["type"] == json!("request_finished"))
            .count();
        assert_eq!(finished, 2);
        Ok(())
    }

    #[tokio::test]
    async fn style_analysis_requires_vision_deployment() -> anyhow::Result<()> {
        let fx = fixture(Vec::new(), |config| config.with_azure(azure()))?;
        let request = StyleAnalysisRequest {
            images: vec![png_data_url(b"x")],
            model_name: "Deals".to_string(),
        };
        let err = fx.orchestrator.analyze_style(&request).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::BackendNotConfigured { backend: "vision", .. }
        ));
        Ok(())
    }
}
