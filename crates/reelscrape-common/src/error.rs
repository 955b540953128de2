//! Common error types used throughout reelscrape.
//!
//! This module covers failures that are not specific to a provider call:
//! parsing domain values from strings, invalid caller input, and I/O done by
//! record sinks.

/// Common error type for reelscrape.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A string could not be parsed into a domain value.
    #[error("Invalid {kind}: {value}")]
    Parse {
        /// What was being parsed (e.g. "media kind").
        kind: &'static str,
        /// The rejected input.
        value: String,
    },

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serializing or deserializing a record failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new Parse error.
    pub fn parse<S: Into<String>>(kind: &'static str, value: S) -> Self {
        Self::Parse {
            kind,
            value: value.into(),
        }
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::parse("media kind", "podcast");
        assert_eq!(err.to_string(), "Invalid media kind: podcast");

        let err = Error::invalid_input("episode without season");
        assert_eq!(err.to_string(), "Invalid input: episode without season");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err = Error::from(serde_err);
        assert!(matches!(err, Error::Serialization(_)));
    }
}
