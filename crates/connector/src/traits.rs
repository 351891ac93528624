//! Pull-connector contract.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use slotfeed_core::{ConfigurationError, Slot};
use tokio::io::AsyncWrite;

use crate::error::ConnectorError;

/// Trait for pull-based slot sources.
///
/// Every call runs its own connect → operate → disconnect cycle; sessions are
/// never kept warm between calls. Implementations serialize calls on one
/// instance, so parallel fetches need independent connectors.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    type Slot: Slot;

    /// List every file-like slot currently visible at the source, sorted by name.
    async fn list(&self) -> Result<Vec<Self::Slot>, ConnectorError>;

    /// Copy the full contents of `slot` into `sink`, returning the byte count.
    async fn fetch(
        &self,
        slot: &Self::Slot,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ConnectorError>;

    /// Human-readable name for logs (e.g. `ftp://host:21/outgoing`).
    fn name(&self) -> &str;
}

/// Shared handle to a connector producing slots of type `S`.
pub type DynConnector<S> = Arc<dyn SourceConnector<Slot = S>>;

/// Builds connectors from an opaque parameter payload.
///
/// Kept alongside emitted slots so that a consumer can rebuild an equivalent
/// connector long after discovery ran.
pub trait ConnectorFactory: Send + Sync + 'static {
    type Slot: Slot;
    type Params: Clone + fmt::Debug + PartialEq + Send + Sync + 'static;

    /// Validate `params` and build a connector. Performs no network I/O.
    fn create(&self, params: &Self::Params) -> Result<DynConnector<Self::Slot>, ConfigurationError>;
}
