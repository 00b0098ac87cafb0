// Error types for the download pipeline

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    /// yt-dlp or ffmpeg not found in system
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// URL rejected by the engine (unsupported site, malformed link)
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Media exists but cannot be fetched (removed, private, geo-blocked)
    #[error("Media unavailable: {0}")]
    Unavailable(String),

    /// Network timeout while talking to the remote site
    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    /// Failed to parse engine JSON output
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Engine process failed or exited non-zero
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// ffmpeg exited non-zero
    #[error("Transcode failed for {path}: {message}")]
    TranscodeFailed { path: PathBuf, message: String },

    /// Caller-imposed deadline elapsed
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// Rejected before any external call was made
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown error with details
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl DownloadError {
    /// Whether the failure came from the caller's input rather than the engine
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::InvalidUrl(_))
    }
}

// Classify raw engine stderr into the closest variant, keeping the text.
impl From<String> for DownloadError {
    fn from(s: String) -> Self {
        let lower = s.to_lowercase();

        if lower.contains("timeout") || lower.contains("timed out") {
            return Self::NetworkTimeout(s);
        }

        if lower.contains("unsupported url") || lower.contains("invalid url") || lower.contains("is not a valid url") {
            return Self::InvalidUrl(s);
        }

        if lower.contains("video unavailable")
            || lower.contains("private video")
            || lower.contains("has been removed")
            || lower.contains("not available in your country")
        {
            return Self::Unavailable(s);
        }

        if lower.contains("command not found") || lower.contains("no such file or directory") {
            return Self::ToolNotFound(s);
        }

        if lower.contains("json") {
            return Self::ParseError(s);
        }

        if s.trim().is_empty() {
            return Self::Unknown("engine exited without an error message".to_string());
        }

        Self::ExecutionError(s)
    }
}

impl From<&str> for DownloadError {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}
