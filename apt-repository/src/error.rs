//! Error types for the APT repository primitives.

/// Result type for APT repository operations.
pub type Result<T> = std::result::Result<T, AptRepositoryError>;

/// Errors that can occur when working with APT repository metadata.
#[derive(Debug, thiserror::Error)]
pub enum AptRepositoryError {
    /// I/O error during encoding or decoding.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A control stanza line that is neither a field nor a continuation.
    #[error("Invalid control line: {0}")]
    InvalidControlLine(String),

    /// A required control field is absent.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field is present but its value cannot be interpreted.
    #[error("Invalid value for '{field}': {value}")]
    InvalidField {
        /// Field name as it appears in the stanza.
        field: String,
        /// The offending value.
        value: String,
    },

    /// A malformed `<hash> <size> <path>` line in a Release hash block.
    #[error("Invalid hash table line: {0}")]
    InvalidHashLine(String),
}

impl AptRepositoryError {
    /// Create a new missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField(field.into())
    }

    /// Create a new invalid field error.
    pub fn invalid_field(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            value: value.into(),
        }
    }
}
