use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Every variant maps to a stable `kind` tag and an HTTP-like status code.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Reference resolution exhausted every candidate path.
    #[error("image file not found for '{reference}' (last attempted: {})", .last_attempted.display())]
    NotFound {
        reference: String,
        last_attempted: PathBuf,
    },

    /// Inline data URL that does not decode.
    #[error("invalid inline image encoding: {0}")]
    InvalidEncoding(String),

    #[error("prompt missing")]
    MissingPrompt,

    #[error("{backend} backend is not configured ({missing})")]
    BackendNotConfigured {
        backend: &'static str,
        missing: String,
    },

    /// Video job launch rejected or returned no operation name.
    #[error("{provider} launch failed ({status}): {body}")]
    LaunchError {
        provider: &'static str,
        status: u16,
        body: String,
    },

    /// Non-2xx reply from a provider; the body is kept verbatim.
    #[error("{provider} request failed ({status}): {body}")]
    UpstreamError {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("operation {operation} timed out after {polls} polls: {reason}")]
    Timeout {
        operation: String,
        polls: u32,
        reason: String,
    },

    #[error("operation {operation} failed: {detail}")]
    OperationFailed { operation: String, detail: String },

    #[error("operation {operation} cancelled after {polls} polls")]
    Cancelled { operation: String, polls: u32 },

    #[error("{provider} transport error: {detail}")]
    Transport {
        provider: &'static str,
        detail: String,
    },

    #[error("{provider} returned an unusable response: {detail}")]
    InvalidResponse {
        provider: &'static str,
        detail: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl DispatchError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidEncoding(_) => "invalid_encoding",
            Self::MissingPrompt => "missing_prompt",
            Self::BackendNotConfigured { .. } => "backend_not_configured",
            Self::LaunchError { .. } => "launch_error",
            Self::UpstreamError { .. } => "upstream_error",
            Self::Timeout { .. } => "timeout",
            Self::OperationFailed { .. } => "operation_failed",
            Self::Cancelled { .. } => "cancelled",
            Self::Transport { .. } => "transport",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Config(_) => "config",
            Self::Io { .. } => "io",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::InvalidEncoding(_) | Self::MissingPrompt | Self::InvalidRequest(_) => 400,
            Self::LaunchError { status, .. } | Self::UpstreamError { status, .. } => *status,
            Self::Timeout { .. } => 408,
            Self::Cancelled { .. } => 499,
            Self::Transport { .. } | Self::OperationFailed { .. } => 502,
            Self::BackendNotConfigured { .. }
            | Self::InvalidResponse { .. }
            | Self::Config(_)
            | Self::Io { .. } => 500,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind().to_string(),
            status: self.status_code(),
            detail: self.to_string(),
        }
    }
}

/// Serializable error shape handed back to the front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub status: u16,
    pub detail: String,
}

impl From<&DispatchError> for ErrorBody {
    fn from(err: &DispatchError) -> Self {
        err.to_body()
    }
}
