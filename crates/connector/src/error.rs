//! Connector error types.

use slotfeed_core::ConfigurationError;
use thiserror::Error;

/// Failure of a single transport operation.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("connection to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("unexpected status from {endpoint}: {reason}")]
    Status { endpoint: String, reason: String },

    #[error("authentication as {user} on {endpoint} failed: {reason}")]
    Auth {
        endpoint: String,
        user: String,
        reason: String,
    },

    #[error("listing {directory} failed: {reason}")]
    List { directory: String, reason: String },

    #[error("fetching {path} failed: {reason}")]
    Fetch { path: String, reason: String },

    #[error("disconnect failed: {0}")]
    Disconnect(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("transport task failed: {0}")]
    Task(String),
}
