//! Error handling for the analysis core

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No usable evidence could be obtained for an event
    #[error("Acquisition failed for camera {camera_id}: {message}")]
    Acquisition { camera_id: String, message: String },

    /// Every capable provider failed or was capacity-capped
    #[error("All providers exhausted for camera {camera_id}: {message}")]
    ProviderExhausted { camera_id: String, message: String },

    /// A single provider attempt failed (feeds the fallback chain)
    #[error("Provider {provider} error: {message}")]
    Provider { provider: String, message: String },

    /// Provider or media call exceeded its deadline
    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    /// Correlation-internal error (swallowed at the service boundary)
    #[error("Correlation error: {0}")]
    Correlation(String),

    /// One notification action's side effect failed
    #[error("Action delivery failed ({channel}): {message}")]
    ActionDelivery { channel: String, message: String },

    /// Media handling error (ffmpeg, decode)
    #[error("Media error: {0}")]
    Media(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable code for logs and failure reports
    pub fn code(&self) -> &'static str {
        match self {
            Error::Acquisition { .. } => "ACQUISITION_FAILED",
            Error::ProviderExhausted { .. } => "PROVIDER_EXHAUSTED",
            Error::Provider { .. } => "PROVIDER_ERROR",
            Error::Timeout { .. } => "TIMEOUT",
            Error::Correlation(_) => "CORRELATION_ERROR",
            Error::ActionDelivery { .. } => "ACTION_DELIVERY_FAILED",
            Error::Media(_) => "MEDIA_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
