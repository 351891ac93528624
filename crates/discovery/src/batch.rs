//! Batches handed downstream after a productive tick.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use slotfeed_connector::{ConnectorError, ConnectorFactory, DynConnector, RetryPolicy};
use slotfeed_core::{ConfigurationError, Slot, Tick};
use tokio::io::AsyncWrite;

/// Lazy fetch descriptor for one slot.
///
/// Carries the factory and parameters used at discovery time instead of an
/// open connection, so each fetch builds its own connector and session.
pub struct SlotFetch<F: ConnectorFactory> {
    slot: F::Slot,
    factory: Arc<F>,
    params: F::Params,
}

impl<F: ConnectorFactory> SlotFetch<F> {
    pub fn new(slot: F::Slot, factory: Arc<F>, params: F::Params) -> Self {
        Self { slot, factory, params }
    }

    pub fn slot(&self) -> &F::Slot {
        &self.slot
    }

    pub fn params(&self) -> &F::Params {
        &self.params
    }

    /// A fresh connector, independent of the one used for discovery.
    pub fn connector(&self) -> Result<DynConnector<F::Slot>, ConfigurationError> {
        self.factory.create(&self.params)
    }

    /// Single attempt, streaming straight into `sink`.
    pub async fn fetch_into(
        &self,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ConnectorError> {
        let connector = self.connector()?;
        connector.fetch(&self.slot, sink).await
    }

    /// Stream the slot into the file at `path`, retrying under `policy`.
    ///
    /// Every attempt recreates the file, so bytes from a failed attempt never
    /// precede the next attempt's. On final failure the file may hold a
    /// partial copy; removing it is up to the caller.
    pub async fn fetch_to_file(&self, path: &Path, policy: &RetryPolicy) -> Result<u64, ConnectorError> {
        let connector = self.connector()?;
        let connector = &connector;
        let slot = &self.slot;
        policy
            .run(move |_| async move {
                let mut file = tokio::fs::File::create(path).await?;
                let copied = connector.fetch(slot, &mut file).await?;
                file.sync_all().await?;
                Ok::<_, ConnectorError>(copied)
            })
            .await
    }
}

impl<F: ConnectorFactory> Clone for SlotFetch<F> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            factory: Arc::clone(&self.factory),
            params: self.params.clone(),
        }
    }
}

impl<F: ConnectorFactory> fmt::Debug for SlotFetch<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotFetch")
            .field("slot", &self.slot)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Equal when slot and parameters match; the factory is not compared.
impl<F: ConnectorFactory> PartialEq for SlotFetch<F> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.params == other.params
    }
}

/// One tick's worth of newly discovered slots.
pub struct DiscoveryBatch<F: ConnectorFactory> {
    pub tick: Tick,
    /// Sorted by timestamp, then name.
    pub slots: Vec<F::Slot>,
    pub count: usize,
    /// Newline-joined slot names.
    pub description: String,
    pub fetches: Vec<SlotFetch<F>>,
}

impl<F: ConnectorFactory> DiscoveryBatch<F> {
    pub fn new(tick: Tick, slots: Vec<F::Slot>, factory: &Arc<F>, params: &F::Params) -> Self {
        let description = slots
            .iter()
            .map(|slot| slot.name())
            .collect::<Vec<_>>()
            .join("\n");
        let fetches = slots
            .iter()
            .map(|slot| SlotFetch::new(slot.clone(), Arc::clone(factory), params.clone()))
            .collect();
        Self {
            tick,
            count: slots.len(),
            slots,
            description,
            fetches,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|slot| slot.name())
    }
}

impl<F: ConnectorFactory> Clone for DiscoveryBatch<F> {
    fn clone(&self) -> Self {
        Self {
            tick: self.tick,
            slots: self.slots.clone(),
            count: self.count,
            description: self.description.clone(),
            fetches: self.fetches.clone(),
        }
    }
}

impl<F: ConnectorFactory> fmt::Debug for DiscoveryBatch<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryBatch")
            .field("tick", &self.tick)
            .field("count", &self.count)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

impl<F: ConnectorFactory> PartialEq for DiscoveryBatch<F> {
    fn eq(&self, other: &Self) -> bool {
        self.tick == other.tick
            && self.slots == other.slots
            && self.description == other.description
            && self.fetches == other.fetches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotfeed_connector::{SourceConnector, SourceConnectorFactory};
    use slotfeed_core::config::{SourceConfig, TransportKind};
    use slotfeed_core::RemoteFile;

    fn local_source(root: &std::path::Path) -> SourceConfig {
        SourceConfig::new(TransportKind::Local, root.to_string_lossy(), "incoming")
    }

    #[test]
    fn batch_describes_its_slots() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = Arc::new(SourceConnectorFactory);
        let slots = vec![RemoteFile::new("a.csv", None), RemoteFile::new("b.csv", None)];

        let batch = DiscoveryBatch::new(Tick(5), slots, &factory, &local_source(tmp.path()));

        assert_eq!(batch.count, 2);
        assert_eq!(batch.description, "a.csv\nb.csv");
        assert_eq!(batch.fetches.len(), 2);
        assert_eq!(batch.fetches[1].slot().name, "b.csv");
        assert_eq!(batch.names().collect::<Vec<_>>(), vec!["a.csv", "b.csv"]);
    }

    #[tokio::test]
    async fn fetch_builds_independent_connector() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("incoming")).unwrap();
        std::fs::write(tmp.path().join("incoming/a.csv"), "hello").unwrap();

        let source = local_source(tmp.path());
        let fetch = SlotFetch::new(
            RemoteFile::new("a.csv", None),
            Arc::new(SourceConnectorFactory),
            source.clone(),
        );

        let mut sink = Vec::new();
        assert_eq!(fetch.fetch_into(&mut sink).await.unwrap(), 5);
        assert_eq!(sink, b"hello");

        let out = tmp.path().join("copy.csv");
        assert_eq!(fetch.fetch_to_file(&out, &RetryPolicy::new(2)).await.unwrap(), 5);
        assert_eq!(std::fs::read(&out).unwrap(), b"hello");

        let connector = fetch.connector().unwrap();
        assert_eq!(connector.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fetch_to_file_returns_last_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("incoming")).unwrap();

        let fetch = SlotFetch::new(
            RemoteFile::new("gone.csv", None),
            Arc::new(SourceConnectorFactory),
            local_source(tmp.path()),
        );
        let err = fetch
            .fetch_to_file(&tmp.path().join("gone.csv"), &RetryPolicy::new(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::ObjectStore(_)));
    }

    #[test]
    fn invalid_params_surface_at_connector_build() {
        let fetch = SlotFetch::new(
            RemoteFile::new("a.csv", None),
            Arc::new(SourceConnectorFactory),
            SourceConfig::new(TransportKind::Ftp, "", "/out"),
        );
        assert!(fetch.connector().is_err());
    }
}
