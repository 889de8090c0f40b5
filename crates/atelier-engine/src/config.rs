use std::env;
use std::path::PathBuf;
use std::time::Duration;

use atelier_contracts::{DispatchError, Result};

pub const DEFAULT_IMAGE_MODEL: &str = "gemini-3-pro-image-preview";
pub const DEFAULT_PROJECT_ID: &str = "content-factori";
pub const DEFAULT_LOCATION: &str = "us-central1";
pub const DEFAULT_VERTEX_API_BASE: &str = "https://aiplatform.googleapis.com/v1";

/// Azure OpenAI deployment used by the image-edit and vision backends.
#[derive(Debug, Clone)]
pub struct AzureConfig {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
    pub vision: Option<VisionDeployment>,
}

#[derive(Debug, Clone)]
pub struct VisionDeployment {
    pub deployment: String,
    pub api_version: String,
}

/// Google Vertex settings shared by the multimodal and video backends.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub api_key: String,
    pub image_model: String,
    pub project_id: String,
    pub location: String,
    pub api_base: String,
    /// Regional base for long-running video jobs. Defaults to
    /// `https://{location}-aiplatform.googleapis.com/v1`.
    pub regional_api_base: Option<String>,
}

impl GoogleConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            project_id: DEFAULT_PROJECT_ID.to_string(),
            location: DEFAULT_LOCATION.to_string(),
            api_base: DEFAULT_VERTEX_API_BASE.to_string(),
            regional_api_base: None,
        }
    }

    pub fn regional_base(&self) -> String {
        self.regional_api_base
            .clone()
            .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com/v1", self.location))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_polls: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub image_edit: Duration,
    pub multimodal: Duration,
    pub video: Duration,
    pub vision: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            image_edit: Duration::from_secs(120),
            multimodal: Duration::from_secs(120),
            video: Duration::from_secs(300),
            vision: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub media_root: PathBuf,
    pub temp_dir: PathBuf,
    pub azure: Option<AzureConfig>,
    pub google: Option<GoogleConfig>,
    pub poll: PollSettings,
    pub timeouts: Timeouts,
}

impl EngineConfig {
    pub fn new(media_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
            temp_dir: env::temp_dir(),
            azure: None,
            google: None,
            poll: PollSettings::default(),
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_azure(mut self, azure: AzureConfig) -> Self {
        self.azure = Some(azure);
        self
    }

    pub fn with_google(mut self, google: GoogleConfig) -> Self {
        self.google = Some(google);
        self
    }

    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    pub fn with_poll(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    pub fn from_env() -> Self {
        let media_root = non_empty_env("REACT_PUBLIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let temp_dir = non_empty_env("ATELIER_TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);

        let azure = match (
            non_empty_env("AZURE_OPENAI_ENDPOINT"),
            non_empty_env("AZURE_OPENAI_API_KEY"),
        ) {
            (Some(endpoint), Some(api_key)) => Some(AzureConfig {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                api_key,
                deployment: non_empty_env("AZURE_OPENAI_DEPLOYMENT_NAME").unwrap_or_default(),
                api_version: non_empty_env("AZURE_OPENAI_API_VERSION").unwrap_or_default(),
                vision: non_empty_env("VISION_DEPLOYMENT_NAME").map(|deployment| {
                    VisionDeployment {
                        deployment,
                        api_version: non_empty_env("VISION_API_VERSION").unwrap_or_default(),
                    }
                }),
            }),
            _ => None,
        };

        let google = non_empty_env("GOOGLE_CLOUD_API_KEY").map(|api_key| {
            let mut google = GoogleConfig::new(api_key);
            if let Some(model) = non_empty_env("GOOGLE_IMAGE_MODEL") {
                google.image_model = model;
            }
            if let Some(project) = non_empty_env("GOOGLE_CLOUD_PROJECT") {
                google.project_id = project;
            }
            if let Some(location) = non_empty_env("GOOGLE_CLOUD_LOCATION") {
                google.location = location;
            }
            if let Some(base) = non_empty_env("GOOGLE_VERTEX_API_BASE") {
                google.api_base = base.trim_end_matches('/').to_string();
            }
            google
        });

        Self {
            media_root,
            temp_dir,
            azure,
            google,
            poll: PollSettings::default(),
            timeouts: Timeouts::default(),
        }
    }

    /// Startup check: the media root must exist and at least one backend
    /// must have credentials.
    pub fn validate(&self) -> Result<()> {
        if !self.media_root.is_dir() {
            return Err(DispatchError::Config(format!(
                "media root {} is not a directory (set REACT_PUBLIC_DIR)",
                self.media_root.display()
            )));
        }
        if self.azure.is_none() && self.google.is_none() {
            return Err(DispatchError::Config(
                "no backend configured: set AZURE_OPENAI_ENDPOINT/AZURE_OPENAI_API_KEY or GOOGLE_CLOUD_API_KEY"
                    .to_string(),
            ));
        }
        if self.poll.max_polls == 0 {
            return Err(DispatchError::Config(
                "poll ceiling must allow at least one poll".to_string(),
            ));
        }
        Ok(())
    }

    /// Azure settings with a deployment name, or `BackendNotConfigured`.
    pub fn require_azure(&self, backend: &'static str) -> Result<&AzureConfig> {
        let azure = self
            .azure
            .as_ref()
            .ok_or_else(|| DispatchError::BackendNotConfigured {
                backend,
                missing: "AZURE_OPENAI_API_KEY/AZURE_OPENAI_ENDPOINT".to_string(),
            })?;
        if azure.deployment.is_empty() {
            return Err(DispatchError::BackendNotConfigured {
                backend,
                missing: "AZURE_OPENAI_DEPLOYMENT_NAME".to_string(),
            });
        }
        Ok(azure)
    }

    /// Azure settings plus the chat deployment used for style analysis.
    pub fn require_vision(&self) -> Result<(&AzureConfig, &VisionDeployment)> {
        let azure = self
            .azure
            .as_ref()
            .ok_or_else(|| DispatchError::BackendNotConfigured {
                backend: "vision",
                missing: "AZURE_OPENAI_API_KEY/AZURE_OPENAI_ENDPOINT".to_string(),
            })?;
        let vision = azure
            .vision
            .as_ref()
            .ok_or_else(|| DispatchError::BackendNotConfigured {
                backend: "vision",
                missing: "VISION_DEPLOYMENT_NAME".to_string(),
            })?;
        Ok((azure, vision))
    }

    pub fn require_google(&self, backend: &'static str) -> Result<&GoogleConfig> {
        self.google
            .as_ref()
            .ok_or_else(|| DispatchError::BackendNotConfigured {
                backend,
                missing: "GOOGLE_CLOUD_API_KEY".to_string(),
            })
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
