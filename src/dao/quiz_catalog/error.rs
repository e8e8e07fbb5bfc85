//! Error types for the quiz catalog HTTP client.

use reqwest::StatusCode;
use thiserror::Error;

/// Convenient result alias returning [`CatalogError`] failures.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Failures that can occur while talking to the quiz catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build catalog client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// A request could not be sent or timed out.
    #[error("failed to send catalog request to `{path}`")]
    RequestSend {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// The target instance or access code does not exist.
    #[error("catalog has no record for `{path}`")]
    NotFound { path: String },
    /// The caller is not allowed to access the target instance.
    #[error("access denied for `{path}`")]
    Forbidden { path: String },
    /// The catalog returned an unexpected status code.
    #[error("unexpected catalog response status {status} for `{path}`")]
    RequestStatus { path: String, status: StatusCode },
    /// Response payload could not be parsed into the expected model.
    #[error("failed to decode catalog response for `{path}`")]
    DecodeResponse {
        path: String,
        #[source]
        source: reqwest::Error,
    },
}
