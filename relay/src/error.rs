//! Error types for the relay service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Result type for relay operations.
pub type RelayResult<T> = std::result::Result<T, RelayError>;

/// Errors that can occur while syncing sources or serving the repository.
#[derive(Error, Debug)]
pub enum RelayError {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// APT metadata could not be produced or parsed.
    #[error(transparent)]
    Metadata(#[from] apt_repository::AptRepositoryError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Remote request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The package key already exists in the index. Benign during re-sync.
    #[error("package already indexed")]
    Duplicate,

    /// The requested distribution is not configured.
    #[error("Unknown distribution: {0}")]
    UnknownDistribution(String),

    /// The component/architecture scope holds no packages.
    #[error("no packages for {component}/{architecture} in '{dist}'; check is dist/suite have packages")]
    EmptyComponent {
        /// Distribution name.
        dist: String,
        /// Component name.
        component: String,
        /// Architecture name.
        architecture: String,
    },

    /// The distribution is configured but nothing is indexed for it.
    #[error("distribution '{0}' has no indexed packages; sync it first")]
    EmptyDistribution(String),

    /// No package matched a pool query.
    #[error("package not found")]
    PackageNotFound,

    /// A signing route was hit without a configured key.
    #[error("no PGP key configured")]
    SigningUnavailable,

    /// Signing requires a Codename or Suite in the apt configuration.
    #[error("signing requires Codename or Suite in apt-config")]
    MissingReleaseName,

    /// Signing requires at least one digest record in the Release.
    #[error("signing requires at least one digest record")]
    NoDigests,

    /// PGP operation failed.
    #[error("PGP error: {0}")]
    Pgp(String),

    /// The entry's originating source left the configuration.
    #[error("source '{0}' no longer available, re-sync packages")]
    SourceUnavailable(String),

    /// A remote object the source declared could not be found.
    #[error("remote object not found: {0}")]
    RemoteNotFound(String),

    /// Remote data did not parse as expected.
    #[error("malformed remote data: {0}")]
    MalformedRemote(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl RelayError {
    /// HTTP status this error maps to when it reaches a handler.
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::UnknownDistribution(_)
            | RelayError::PackageNotFound
            | RelayError::SigningUnavailable => StatusCode::NOT_FOUND,
            RelayError::MissingReleaseName
            | RelayError::NoDigests
            | RelayError::InvalidConfiguration(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable label for the JSON envelope.
    pub fn label(&self) -> &'static str {
        match self.status() {
            StatusCode::NOT_FOUND => "Not Found",
            StatusCode::BAD_REQUEST => "Bad Request",
            _ => "Internal Server Error",
        }
    }
}

/// A [`RelayError`] dressed up as the JSON error envelope every route
/// returns: `{"error", "message"}` plus a `detail` field when verbose
/// error reporting is enabled.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: serde_json::Value,
}

impl ApiError {
    /// Wrap a relay error, attaching debug detail when `verbose` is set.
    pub fn from_error(error: RelayError, verbose: bool) -> Self {
        let mut body = serde_json::json!({
            "error": error.label(),
            "message": error.to_string(),
        });
        if verbose {
            body["detail"] = serde_json::Value::String(format!("{:?}", error));
        }
        Self {
            status: error.status(),
            body,
        }
    }

    /// A 404 for an unmatched route.
    pub fn not_found(path: &str, method: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: serde_json::json!({
                "error": "Not Found",
                "message": format!("no route for {method} {path}"),
                "path": path,
                "method": method,
            }),
        }
    }

    /// A 400 with a bare message.
    pub fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: serde_json::json!({
                "error": "Bad Request",
                "message": message,
            }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            RelayError::UnknownDistribution("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RelayError::SigningUnavailable.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RelayError::MissingReleaseName.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::EmptyComponent {
                dist: "d".into(),
                component: "main".into(),
                architecture: "amd64".into()
            }
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            RelayError::Duplicate.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn verbose_flag_gates_detail() {
        let terse = ApiError::from_error(RelayError::PackageNotFound, false);
        assert!(terse.body.get("detail").is_none());
        let verbose = ApiError::from_error(RelayError::PackageNotFound, true);
        assert!(verbose.body.get("detail").is_some());
    }
}
