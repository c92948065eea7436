use thiserror::Error;

/// Top-level error type for the parley client.
///
/// Subsystem crates define their own error types and implement
/// `From<SubsystemError> for ParleyError` so that `?` works across crate
/// boundaries in the binary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParleyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Conversation error: {0}")]
    Conversation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl From<toml::de::Error> for ParleyError {
    fn from(err: toml::de::Error) -> Self {
        ParleyError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ParleyError {
    fn from(err: toml::ser::Error) -> Self {
        ParleyError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ParleyError {
    fn from(err: serde_json::Error) -> Self {
        ParleyError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for parley operations.
pub type Result<T> = std::result::Result<T, ParleyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ParleyError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ParleyError = io_err.into();
        assert!(matches!(err, ParleyError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let err: ParleyError = toml_err.into();
        assert!(matches!(err, ParleyError::Config(_)));
    }

    #[test]
    fn test_url_error_conversion() {
        let url_err = url::Url::parse("not a url").unwrap_err();
        let err: ParleyError = url_err.into();
        assert!(err.to_string().starts_with("Invalid URL"));
    }
}
