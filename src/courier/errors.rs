// Error types for the courier pipeline

use std::time::Duration;

use thiserror::Error;

/// Top-level pipeline error taxonomy
#[derive(Debug, Error)]
pub enum CourierError {
    /// Every bypass rung was exhausted without an acceptable page
    #[error("blocked: all bypass rungs exhausted for {url} (last status: {})", fmt_status(.last_status))]
    Blocked {
        url: String,
        last_status: Option<u16>,
    },

    /// Non-blocking HTTP failure (404, 410, ...) which escalation cannot fix
    #[error("HTTP {status} while fetching {url}")]
    HttpStatus { url: String, status: u16 },

    /// Network failure that survived local retries
    #[error("network error: {0}")]
    Network(String),

    /// A video candidate could not be turned into a fetchable artifact
    #[error("video resolution failed: {0}")]
    ResolutionFailed(#[from] ResolutionFailure),

    /// Payload too small, too large or with the wrong signature
    #[error("validation failed: {0}")]
    ValidationFailed(#[from] ValidationFailure),

    /// Per-candidate retry ceiling reached
    #[error("acquisition exhausted after {attempts} attempts: {last_error}")]
    AcquisitionExhausted { attempts: u32, last_error: String },

    /// Destination throttling
    #[error("rate limited by destination")]
    RateLimited { retry_after: Option<Duration> },

    /// Batch retry ceiling reached
    #[error("delivery abandoned for batch {batch_index} after {attempts} attempts: {reason}")]
    DeliveryAbandoned {
        batch_index: usize,
        attempts: u32,
        reason: String,
    },

    /// No valid reply arrived while awaiting a video source choice
    #[error("selection timed out")]
    SelectionTimeout,

    /// Another selection is already pending for this requester
    #[error("a video source selection is already pending for session {0}")]
    SelectionBusy(String),

    /// Required configuration is absent (fatal, never retried)
    #[error("missing configuration: {0}")]
    ConfigurationMissing(String),

    /// Selection gate received an event that is invalid in its current state
    #[error("invalid transition from {from} on {event}")]
    InvalidTransition { from: &'static str, event: &'static str },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn fmt_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

impl CourierError {
    /// Whether this error should be retried by the layer that observed it
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited { .. })
    }

    /// Short machine-friendly label used in attempt logs and reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Blocked { .. } => "BlockedError",
            Self::HttpStatus { .. } => "HttpStatus",
            Self::Network(_) => "Network",
            Self::ResolutionFailed(_) => "ResolutionFailed",
            Self::ValidationFailed(_) => "ValidationFailed",
            Self::AcquisitionExhausted { .. } => "AcquisitionExhausted",
            Self::RateLimited { .. } => "RateLimited",
            Self::DeliveryAbandoned { .. } => "DeliveryAbandoned",
            Self::SelectionTimeout => "SelectionTimeout",
            Self::SelectionBusy(_) => "SelectionBusy",
            Self::ConfigurationMissing(_) => "ConfigurationMissing",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::InvalidUrl(_) => "InvalidUrl",
            Self::Config(_) => "Config",
            Self::Io(_) => "Io",
        }
    }
}

/// Typed reason a video candidate ended in the Failed state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionFailure {
    #[error("no stream found on {0}")]
    NoStreamFound(String),

    #[error("token decode failed: {0}")]
    TokenDecodeFailed(String),

    #[error("external stream downloader is not installed")]
    ExternalToolUnavailable,

    #[error("external stream downloader failed: {0}")]
    ExternalToolFailed(String),

    #[error("page fetch failed: {0}")]
    PageUnavailable(String),
}

/// Why a downloaded payload was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("payload of {size} bytes is below the {min} byte minimum")]
    TooSmall { size: u64, min: u64 },

    #[error("payload of {size} bytes exceeds the {max} byte ceiling")]
    TooLarge { size: u64, max: u64 },

    #[error("unrecognized signature ({0})")]
    BadSignature(String),

    #[error("received an HTML page instead of media")]
    HtmlPayload,

    #[error("{failed} of {total} segments failed")]
    SegmentsFailed { failed: usize, total: usize },

    #[error("manifest lists no segments")]
    EmptyManifest,
}

/// Errors raised by the HTTP transport seam
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("scripted browser unavailable: {0}")]
    Unavailable(String),

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connect(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else {
            Self::Other(e.to_string())
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Other(e.to_string())
    }
}

impl From<TransportError> for CourierError {
    fn from(e: TransportError) -> Self {
        Self::Network(e.to_string())
    }
}

/// Errors returned by a messaging destination
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DestinationError {
    /// Flood control; the whole batch is retried after backing off
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// The destination refused this item; retrying will not help
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("destination transport error: {0}")]
    Transport(String),
}

impl DestinationError {
    /// Errors that should trigger a batch retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transport(_))
    }
}

impl From<std::io::Error> for DestinationError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

// Classify raw tool output into a resolution failure
impl From<String> for ResolutionFailure {
    fn from(s: String) -> Self {
        let lower = s.to_lowercase();

        if lower.contains("not found")
            || lower.contains("no such file")
            || lower.contains("command not found")
            || lower.contains("failed to start")
        {
            return Self::ExternalToolUnavailable;
        }

        if lower.contains("unsupported url") || lower.contains("no video formats") {
            return Self::NoStreamFound(s);
        }

        Self::ExternalToolFailed(s)
    }
}
