use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use atelier_contracts::events::EventTrail;
use atelier_contracts::media::{encode_base64, is_inline_image};
use atelier_contracts::normalize::RawTuning;
use atelier_contracts::requests::{
    CompositeRequest, GenerationRequest, StyleAnalysisRequest, VideoRequest,
};
use atelier_contracts::DispatchError;
use atelier_engine::resolver::mime_for_bytes;
use atelier_engine::{EngineConfig, Orchestrator};
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Runs one generation request against the backends configured in the
/// environment (and `.env`) and prints the result as JSON.
#[derive(Debug, Parser)]
#[command(name = "atelier", version, about = "Generative media request dispatcher")]
struct Cli {
    /// Base directory for relative image references (overrides REACT_PUBLIC_DIR).
    #[arg(long, global = true)]
    media_root: Option<PathBuf>,
    /// Append a JSONL event trail to this file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Single-card image generation or edit.
    Image(ImageArgs),
    /// Multi-image layout.
    Composite(CompositeArgs),
    /// Image-to-video job.
    Video(VideoArgs),
    /// Derive a reusable prompt from sample designs.
    AnalyzeStyle(AnalyzeStyleArgs),
}

/// Tunables stay raw strings so bad values get the documented defaults.
#[derive(Debug, Args)]
struct TuningArgs {
    #[arg(long)]
    temperature: Option<String>,
    #[arg(long)]
    top_p: Option<String>,
    #[arg(long)]
    resolution: Option<String>,
    #[arg(long)]
    safety_level: Option<String>,
    #[arg(long)]
    aspect_ratio: Option<String>,
}

impl TuningArgs {
    fn into_raw(self) -> RawTuning {
        RawTuning {
            temperature: self.temperature.map(Value::String),
            top_p: self.top_p.map(Value::String),
            resolution: self.resolution.map(Value::String),
            safety_level: self.safety_level.map(Value::String),
            aspect_ratio: self.aspect_ratio.map(Value::String),
        }
    }
}

#[derive(Debug, Args)]
struct ImageArgs {
    /// Load the full request body from a JSON file.
    #[arg(long, conflicts_with = "image")]
    request: Option<PathBuf>,
    #[arg(long, required_unless_present = "request")]
    image: Option<String>,
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long)]
    mask: Option<String>,
    #[arg(long)]
    n: Option<u32>,
    /// `v2` multimodal, `v1` image edit.
    #[arg(long, default_value = "v2")]
    server_version: String,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[command(flatten)]
    tuning: TuningArgs,
}

#[derive(Debug, Args)]
struct CompositeArgs {
    #[arg(long, conflicts_with = "image")]
    request: Option<PathBuf>,
    /// Data URL or local file; repeat for each product image.
    #[arg(long = "image", required_unless_present = "request")]
    image: Vec<String>,
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[command(flatten)]
    tuning: TuningArgs,
}

#[derive(Debug, Args)]
struct VideoArgs {
    #[arg(long, conflicts_with = "image")]
    request: Option<PathBuf>,
    #[arg(long, required_unless_present = "request")]
    image: Option<String>,
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long, default_value = "16:9")]
    aspect_ratio: String,
    #[arg(long, default_value = "1080p")]
    resolution: String,
    #[arg(long, default_value_t = 8)]
    duration: u32,
    #[arg(long)]
    generate_audio: bool,
    #[arg(long, default_value = "veo-3.1-generate-001")]
    model: String,
}

#[derive(Debug, Args)]
struct AnalyzeStyleArgs {
    #[arg(long, conflicts_with = "image")]
    request: Option<PathBuf>,
    #[arg(long = "image", required_unless_present = "request")]
    image: Vec<String>,
    #[arg(long, default_value = "Custom Style")]
    model_name: String,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atelier=info,atelier_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(err) = run().await {
        let body = match err.downcast_ref::<DispatchError>() {
            Some(dispatch) => serde_json::to_value(dispatch.to_body()).unwrap_or(Value::Null),
            None => json!({ "kind": "cli", "status": 1, "detail": format!("{err:#}") }),
        };
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string()));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = EngineConfig::from_env();
    if let Some(root) = cli.media_root {
        config.media_root = root;
    }
    config.validate()?;
    tracing::debug!(media_root = %config.media_root.display(), "configuration loaded");

    let mut orchestrator = Orchestrator::new(config);
    if let Some(path) = cli.events {
        orchestrator = orchestrator.with_events(EventTrail::new(path));
    }

    match cli.command {
        Command::Image(args) => {
            let request = match args.request {
                Some(path) => load_request(&path).await?,
                None => GenerationRequest {
                    image_path: args.image.unwrap_or_default(),
                    custom_prompt: args.prompt,
                    mask_path: args.mask,
                    n: args.n,
                    server_version: args.server_version,
                    width: args.width,
                    height: args.height,
                    tuning: args.tuning.into_raw(),
                },
            };
            print_json(&orchestrator.generate_images(&request).await?)
        }
        Command::Composite(args) => {
            let request = match args.request {
                Some(path) => load_request(&path).await?,
                None => CompositeRequest {
                    images: inline_files(args.image).await?,
                    prompt: args.prompt,
                    settings: args.tuning.into_raw(),
                    width: args.width,
                    height: args.height,
                },
            };
            print_json(&orchestrator.generate_composite(&request).await?)
        }
        Command::Video(args) => {
            let request = match args.request {
                Some(path) => load_request(&path).await?,
                None => VideoRequest {
                    image_path: args.image.unwrap_or_default(),
                    prompt: args.prompt,
                    aspect_ratio: args.aspect_ratio,
                    resolution: args.resolution,
                    duration: args.duration,
                    generate_audio: args.generate_audio,
                    model: args.model,
                },
            };
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received; cancelling video job polling");
                    on_interrupt.cancel();
                }
            });
            print_json(&orchestrator.generate_video(&request, Some(cancel)).await?)
        }
        Command::AnalyzeStyle(args) => {
            let request = match args.request {
                Some(path) => load_request(&path).await?,
                None => StyleAnalysisRequest {
                    images: inline_files(args.image).await?,
                    model_name: args.model_name,
                },
            };
            print_json(&orchestrator.analyze_style(&request).await?)
        }
    }
}

async fn load_request<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid request JSON in {}", path.display()))
}

/// Local files become data URLs; everything else passes through unchanged.
async fn inline_files(references: Vec<String>) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(references.len());
    for reference in references {
        let path = PathBuf::from(&reference);
        let is_file = tokio::fs::metadata(&path)
            .await
            .is_ok_and(|meta| meta.is_file());
        if is_inline_image(&reference) || !is_file {
            out.push(reference);
            continue;
        }
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed reading {}", path.display()))?;
        let mime = mime_for_bytes(&path, &bytes);
        out.push(format!("data:{mime};base64,{}", encode_base64(&bytes)));
    }
    Ok(out)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
