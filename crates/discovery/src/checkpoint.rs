//! Checkpoint encoding and persistence for the slot window.
//!
//! Layout of an encoded checkpoint:
//!
//! ```text
//! "SLOTCKPT" | version: u16 BE | sha256(payload): 32 bytes | len: u64 BE | payload
//! ```
//!
//! The payload is the MessagePack encoding of [`Checkpoint`] with named fields.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use slotfeed_core::{Slot, Tick};
use tracing::{debug, info};

use crate::error::CheckpointError;
use crate::window::SlotWindow;

const MAGIC: &[u8; 8] = b"SLOTCKPT";
const VERSION: u16 = 1;
const HEADER_LEN: usize = MAGIC.len() + 2 + 32 + 8;

/// Slots selected at one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry<S> {
    pub tick: Tick,
    pub slots: Vec<S>,
}

/// The remembered history at snapshot time, ascending by tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint<S> {
    pub entries: Vec<CheckpointEntry<S>>,
}

impl<S> Default for Checkpoint<S> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<S> Checkpoint<S> {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn slot_count(&self) -> usize {
        self.entries.iter().map(|e| e.slots.len()).sum()
    }
}

pub struct CheckpointCodec;

impl CheckpointCodec {
    /// Copy of the current history. Pruned entries are not included.
    pub fn snapshot<S: Slot>(window: &SlotWindow<S>) -> Checkpoint<S> {
        Checkpoint {
            entries: window
                .entries_since(Tick::MIN)
                .into_iter()
                .map(|(tick, slots)| CheckpointEntry { tick, slots })
                .collect(),
        }
    }

    /// Replay `checkpoint` into `window` in ascending tick order.
    ///
    /// Returns the replayed entries so callers can rebuild what the live run
    /// emitted. Replaying the same checkpoint twice leaves the window unchanged.
    pub fn restore<S: Slot>(window: &mut SlotWindow<S>, checkpoint: &Checkpoint<S>) -> Vec<(Tick, Vec<S>)> {
        let mut entries: Vec<(Tick, Vec<S>)> = checkpoint
            .entries
            .iter()
            .map(|e| (e.tick, e.slots.clone()))
            .collect();
        entries.sort_by_key(|(tick, _)| *tick);

        for (tick, slots) in &entries {
            window.record(*tick, slots.clone());
        }
        entries
    }

    pub fn encode<S: Slot>(checkpoint: &Checkpoint<S>) -> Result<Vec<u8>, CheckpointError> {
        let payload = rmp_serde::to_vec_named(checkpoint)?;
        let digest = Sha256::digest(&payload);

        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_be_bytes());
        out.extend_from_slice(&digest);
        out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    pub fn decode<S: Slot>(bytes: &[u8]) -> Result<Checkpoint<S>, CheckpointError> {
        if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
            return Err(CheckpointError::BadMagic);
        }
        if bytes.len() < HEADER_LEN {
            return Err(CheckpointError::Truncated {
                expected: HEADER_LEN as u64,
                found: bytes.len() as u64,
            });
        }

        let (header, payload) = bytes.split_at(HEADER_LEN);
        let version = u16::from_be_bytes([header[8], header[9]]);
        if version != VERSION {
            return Err(CheckpointError::Version(version));
        }
        let checksum = &header[10..42];
        let mut len = [0u8; 8];
        len.copy_from_slice(&header[42..50]);
        let expected = u64::from_be_bytes(len);
        if payload.len() as u64 != expected {
            return Err(CheckpointError::Truncated {
                expected: HEADER_LEN as u64 + expected,
                found: bytes.len() as u64,
            });
        }
        if Sha256::digest(payload).as_slice() != checksum {
            return Err(CheckpointError::Checksum);
        }

        Ok(rmp_serde::from_slice(payload)?)
    }

    /// Encode and hand the bytes to `store`.
    pub async fn save<S: Slot>(
        store: &dyn CheckpointStore,
        checkpoint: &Checkpoint<S>,
    ) -> Result<(), CheckpointError> {
        let bytes = Self::encode(checkpoint)?;
        store.save(&bytes).await?;
        debug!(
            entries = checkpoint.entries.len(),
            bytes = bytes.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    /// `None` when the store holds no checkpoint yet.
    pub async fn load<S: Slot>(store: &dyn CheckpointStore) -> Result<Option<Checkpoint<S>>, CheckpointError> {
        match store.load().await? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// Durable home for encoded checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, bytes: &[u8]) -> Result<(), CheckpointError>;

    async fn load(&self) -> Result<Option<Vec<u8>>, CheckpointError>;
}

/// Single checkpoint file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, bytes: &[u8]) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<Vec<u8>>, CheckpointError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                info!(path = %self.path.display(), bytes = bytes.len(), "checkpoint loaded");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
