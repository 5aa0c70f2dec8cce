//! Error types for the voice pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Microphone or audio output could not be opened
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Transient recognition failure
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Transcript could not be mapped to an intent
    #[error("could not understand request: {0}")]
    Parse(String),

    /// Host command failed
    #[error("command failed: {0}")]
    Dispatch(String),

    /// Voice features are not permitted for this session
    #[error("voice permission denied: {0}")]
    PermissionDenied(String),

    /// Text-to-speech error
    #[error("speech synthesis error: {0}")]
    Synthesis(String),

    /// Audio processing error
    #[error("audio error: {0}")]
    Audio(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Preference store error
    #[error("preference error: {0}")]
    Preferences(String),

    /// Operation was cancelled by a newer session or a stop request
    #[error("operation cancelled")]
    Cancelled,

    /// The session orchestrator has shut down
    #[error("voice session closed")]
    SessionClosed,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error stops a turn from starting at all
    ///
    /// Everything else is absorbed into a spoken response.
    #[must_use]
    pub const fn prevents_turn(&self) -> bool {
        matches!(self, Self::DeviceUnavailable(_) | Self::PermissionDenied(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_device_and_permission_errors_prevent_turns() {
        assert!(Error::DeviceUnavailable("mic".into()).prevents_turn());
        assert!(Error::PermissionDenied("denied".into()).prevents_turn());
        assert!(!Error::Recognition("network".into()).prevents_turn());
        assert!(!Error::Parse("gibberish".into()).prevents_turn());
        assert!(!Error::Dispatch("host".into()).prevents_turn());
        assert!(!Error::Cancelled.prevents_turn());
    }
}
