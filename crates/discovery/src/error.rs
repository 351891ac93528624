//! Discovery and checkpoint error types.

use slotfeed_connector::ConnectorError;
use slotfeed_core::ConfigurationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Listing failed on every attempt; the tick produced nothing.
    #[error("listing failed after {attempts} attempts: {source}")]
    ListingExhausted {
        attempts: u32,
        #[source]
        source: ConnectorError,
    },

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("not a checkpoint (bad magic)")]
    BadMagic,

    #[error("unsupported checkpoint version {0}")]
    Version(u16),

    #[error("checkpoint truncated: expected {expected} bytes, found {found}")]
    Truncated { expected: u64, found: u64 },

    #[error("checkpoint checksum mismatch")]
    Checksum,

    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
}
