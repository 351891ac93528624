//! Downstream consumers of discovery batches.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use slotfeed_connector::{ConnectorError, ConnectorFactory, RetryPolicy};
use slotfeed_core::Slot;
use tracing::{debug, info, warn};

use crate::batch::DiscoveryBatch;

/// What one delivery did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    pub written: usize,
    pub skipped: usize,
    pub bytes: u64,
}

#[async_trait]
pub trait BatchSink<F: ConnectorFactory>: Send + Sync {
    async fn deliver(&self, batch: &DiscoveryBatch<F>) -> Result<DeliverySummary, ConnectorError>;
}

/// Writes each slot of a batch to `root/<slot name>`.
///
/// Files already present are left alone, so replaying restored batches does
/// not refetch them. Names that would escape `root` are skipped.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
    retry: RetryPolicy,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            root: root.into(),
            retry,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_path(&self, name: &str) -> Option<PathBuf> {
        let rel = Path::new(name);
        let mut components = rel.components().peekable();
        if components.peek().is_none() || !components.all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(rel))
    }
}

/// In-progress download next to its final name.
fn part_path(target: &Path) -> PathBuf {
    let mut part = target.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

#[async_trait]
impl<F: ConnectorFactory> BatchSink<F> for DirectorySink {
    async fn deliver(&self, batch: &DiscoveryBatch<F>) -> Result<DeliverySummary, ConnectorError> {
        let mut summary = DeliverySummary::default();

        for fetch in &batch.fetches {
            let name = fetch.slot().name();
            let Some(target) = self.target_path(name) else {
                warn!(slot = name, "slot name escapes output directory, skipping");
                summary.skipped += 1;
                continue;
            };
            if tokio::fs::try_exists(&target).await? {
                debug!(slot = name, "already delivered");
                summary.skipped += 1;
                continue;
            }

            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let part = part_path(&target);
            let copied = match fetch.fetch_to_file(&part, &self.retry).await {
                Ok(copied) => copied,
                Err(e) => {
                    let _ = tokio::fs::remove_file(&part).await;
                    return Err(e);
                }
            };
            tokio::fs::rename(&part, &target).await?;

            summary.written += 1;
            summary.bytes += copied;
        }

        info!(
            tick = %batch.tick,
            written = summary.written,
            skipped = summary.skipped,
            bytes = summary.bytes,
            "batch delivered"
        );
        Ok(summary)
    }
}
