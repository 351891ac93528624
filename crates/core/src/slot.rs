//! Slots: named, optionally dated units of remote data.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A unit of remote data that can be listed and fetched.
///
/// Implementors must order themselves with [`slot_order`] (optionally adding
/// further tie-breaks) so that emitted batches are time-ordered.
pub trait Slot:
    Clone + Ord + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Name, unique within one listing.
    fn name(&self) -> &str;

    /// Modification time, when the transport reports one.
    fn timestamp(&self) -> Option<DateTime<Utc>>;
}

/// Total order over slots.
///
/// Timestamped slots come first, ordered by timestamp then name. Slots without
/// a timestamp follow, ordered by name.
pub fn slot_order<A: Slot + ?Sized, B: Slot + ?Sized>(a: &A, b: &B) -> Ordering {
    match (a.timestamp(), b.timestamp()) {
        (Some(ta), Some(tb)) => ta.cmp(&tb).then_with(|| a.name().cmp(b.name())),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.name().cmp(b.name()),
    }
}

/// A file discovered on a remote directory or object store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteFile {
    pub name: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// Size in bytes, if the listing reported it.
    #[serde(default)]
    pub size: Option<u64>,
}

impl RemoteFile {
    pub fn new(name: impl Into<String>, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.into(),
            timestamp,
            size: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

impl Slot for RemoteFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }
}

impl Ord for RemoteFile {
    fn cmp(&self, other: &Self) -> Ordering {
        slot_order(self, other).then_with(|| self.size.cmp(&other.size))
    }
}

impl PartialOrd for RemoteFile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RemoteFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.timestamp {
            Some(ts) => write!(f, "{} @ {}", self.name, ts.to_rfc3339()),
            None => write!(f, "{}", self.name),
        }
    }
}
