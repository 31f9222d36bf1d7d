use thiserror::Error;

/// Domain-level errors for whisper-session.
#[derive(Error, Debug)]
pub enum DomainError {
    /// The engine returned no context or state handle.
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// The engine inference call returned a non-zero status.
    #[error("Transcription failed with engine status {code}")]
    Transcription { code: i32 },

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    /// The external audio converter exited unsuccessfully.
    #[error("Audio conversion failed ({status}): {stderr}")]
    AudioConversion { status: String, stderr: String },

    /// A recognized override key carried a value of the wrong shape.
    #[error("Invalid value for parameter '{key}': {reason}")]
    InvalidParameter { key: String, reason: String },

    /// The engine failed outside of inference, e.g. reading a segment.
    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl DomainError {
    /// Whether this error is fatal to the session rather than one invocation.
    #[must_use]
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, DomainError::Initialization(_) | DomainError::ModelNotFound(_))
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for DomainError {
    fn from(err: toml::de::Error) -> Self {
        DomainError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DomainError {
    fn from(err: toml::ser::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

impl From<hound::Error> for DomainError {
    fn from(err: hound::Error) -> Self {
        DomainError::Audio(err.to_string())
    }
}
