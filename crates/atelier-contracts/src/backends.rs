use serde::{Deserialize, Serialize};

/// Image backends a single-card request can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageBackend {
    /// Multimodal image generation (`v2`).
    Multimodal,
    /// Image edit with source image and optional mask (`v1`, legacy default).
    ImageEdit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSelection {
    pub backend: ImageBackend,
    pub requested: String,
    pub fallback_reason: Option<String>,
}

impl ImageBackend {
    pub fn name(self) -> &'static str {
        match self {
            Self::Multimodal => "multimodal",
            Self::ImageEdit => "image-edit",
        }
    }

    /// Maps the front end's version flag onto a backend. Unknown flags fall
    /// back to the image-edit backend and say so.
    pub fn select(selector: &str) -> BackendSelection {
        let normalized = selector.trim().to_ascii_lowercase();
        let (backend, fallback_reason) = match normalized.as_str() {
            "v2" | "multimodal" => (Self::Multimodal, None),
            "v1" | "edit" | "image-edit" => (Self::ImageEdit, None),
            _ => (
                Self::ImageEdit,
                Some(format!(
                    "Unknown backend selector '{}'; using image-edit.",
                    selector.trim()
                )),
            ),
        };
        BackendSelection {
            backend,
            requested: selector.trim().to_string(),
            fallback_reason,
        }
    }
}
