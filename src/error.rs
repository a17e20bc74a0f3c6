//! Pipeline error taxonomy.
//!
//! Every failure that can reach a caller of the capture → dispatch →
//! deliver pipeline is one of these kinds. Component-local errors
//! (`ClipboardError`, `X11Error`, `ConfigError`) convert into
//! [`PipelineError`] at the component boundary.

use std::fmt;

/// Shared error taxonomy for capture, providers, and delivery.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// No clipboard change within the settle bound. Usually absorbed
    /// as an empty selection; surfaced only when a whole scope times out.
    #[error("capture timed out: {0}")]
    CaptureTimeout(String),

    /// Restoring the pre-capture clipboard failed. Never fatal.
    #[error("clipboard restore failed: {0}")]
    ClipboardRestoreFailed(String),

    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// Connectivity failure or transport timeout.
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx response or a payload the adapter could not interpret.
    #[error("backend error{}: {detail}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Backend { status: Option<u16>, detail: String },

    #[error("cancelled")]
    Cancelled,

    #[error("model download failed: {0}")]
    ModelDownloadFailed(String),

    /// Second request while busy, or a mutation attempted mid-flight.
    #[error("busy: {0}")]
    ConcurrentUseConflict(String),

    /// The backend declared the text incompatible with the command.
    #[error("the text is incompatible with the requested change")]
    IncompatibleRequest,

    /// Capture could not run at all (injection API missing or denied).
    #[error("capture: {0}")]
    Capture(String),

    /// Delivery could not run (paste injection missing or denied).
    #[error("delivery: {0}")]
    Delivery(String),

    #[error("config: {0}")]
    Config(String),
}

/// Copyable discriminant of [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CaptureTimeout,
    ClipboardRestoreFailed,
    MissingCredential,
    NetworkError,
    BackendError,
    Cancelled,
    ModelDownloadFailed,
    ConcurrentUseConflict,
    IncompatibleRequest,
    Capture,
    Delivery,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::CaptureTimeout => "Capture timed out",
            ErrorKind::ClipboardRestoreFailed => "Clipboard not restored",
            ErrorKind::MissingCredential => "Missing credential",
            ErrorKind::NetworkError => "Network error",
            ErrorKind::BackendError => "Provider error",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::ModelDownloadFailed => "Model download failed",
            ErrorKind::ConcurrentUseConflict => "Busy",
            ErrorKind::IncompatibleRequest => "Incompatible request",
            ErrorKind::Capture => "Capture failed",
            ErrorKind::Delivery => "Paste failed",
            ErrorKind::Config => "Configuration error",
        };
        f.write_str(label)
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::CaptureTimeout(_) => ErrorKind::CaptureTimeout,
            PipelineError::ClipboardRestoreFailed(_) => ErrorKind::ClipboardRestoreFailed,
            PipelineError::MissingCredential(_) => ErrorKind::MissingCredential,
            PipelineError::Network(_) => ErrorKind::NetworkError,
            PipelineError::Backend { .. } => ErrorKind::BackendError,
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::ModelDownloadFailed(_) => ErrorKind::ModelDownloadFailed,
            PipelineError::ConcurrentUseConflict(_) => ErrorKind::ConcurrentUseConflict,
            PipelineError::IncompatibleRequest => ErrorKind::IncompatibleRequest,
            PipelineError::Capture(_) => ErrorKind::Capture,
            PipelineError::Delivery(_) => ErrorKind::Delivery,
            PipelineError::Config(_) => ErrorKind::Config,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    /// Shorthand for a backend error without an HTTP status.
    pub fn backend(detail: impl Into<String>) -> Self {
        PipelineError::Backend {
            status: None,
            detail: detail.into(),
        }
    }

    /// True for HTTP 429 and quota-exhaustion payloads.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            PipelineError::Backend { status, detail } => {
                *status == Some(429) || rate_limit_pattern().is_match(detail)
            }
            _ => false,
        }
    }

    /// Short, user-facing message: taxonomy kind plus backend detail.
    ///
    /// Returns `None` for cancellation, which completes silently.
    pub fn user_message(&self) -> Option<String> {
        if self.is_cancelled() {
            return None;
        }
        if self.is_rate_limited() {
            return Some(
                "Rate limit hit: the provider's usage limit was reached. \
                 Try again in a few moments or switch to a model with a higher limit."
                    .to_string(),
            );
        }
        let detail = match self {
            PipelineError::CaptureTimeout(d)
            | PipelineError::ClipboardRestoreFailed(d)
            | PipelineError::MissingCredential(d)
            | PipelineError::Network(d)
            | PipelineError::ModelDownloadFailed(d)
            | PipelineError::ConcurrentUseConflict(d)
            | PipelineError::Capture(d)
            | PipelineError::Delivery(d)
            | PipelineError::Config(d) => d.clone(),
            PipelineError::Backend { detail, .. } => detail.clone(),
            PipelineError::IncompatibleRequest => {
                "the selected text cannot be used with this command".to_string()
            }
            PipelineError::Cancelled => String::new(),
        };
        Some(format!("{}: {}", self.kind(), detail))
    }
}

/// Request URLs may carry credentials, so they never reach the message.
impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        let e = e.without_url();
        if e.is_decode() {
            PipelineError::backend(format!("malformed response: {e}"))
        } else if let Some(status) = e.status() {
            PipelineError::Backend {
                status: Some(status.as_u16()),
                detail: e.to_string(),
            }
        } else {
            PipelineError::Network(e.to_string())
        }
    }
}

fn rate_limit_pattern() -> &'static regex::Regex {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(r"(?i)rate[ _-]?limit|quota|exceeded|resource has been exhausted")
            .expect("static regex")
    })
}
