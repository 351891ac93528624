//! Range filters deciding which slots are eligible for discovery.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::slot::Slot;

/// Constraint on eligible slots, by recency and/or explicit exclusion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotRange {
    /// No constraint.
    #[default]
    Unbounded,
    /// Slots modified at or after `since`.
    Date { since: Option<DateTime<Utc>> },
    /// Same date test, and the name must not be excluded.
    DateAndExclusion {
        since: Option<DateTime<Utc>>,
        excluded: Option<HashSet<String>>,
    },
}

impl SlotRange {
    /// Pick the narrowest variant describing the given bounds.
    pub fn from_bounds(since: Option<DateTime<Utc>>, excluded: Vec<String>) -> Self {
        if !excluded.is_empty() {
            Self::DateAndExclusion {
                since,
                excluded: Some(excluded.into_iter().collect()),
            }
        } else if since.is_some() {
            Self::Date { since }
        } else {
            Self::Unbounded
        }
    }

    pub fn accepts<S: Slot + ?Sized>(&self, slot: &S) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Date { since } => date_accepts(*since, slot),
            Self::DateAndExclusion { since, excluded } => {
                date_accepts(*since, slot)
                    && !excluded
                        .as_ref()
                        .is_some_and(|names| names.contains(slot.name()))
            }
        }
    }
}

// A slot without a timestamp is never excluded by date.
fn date_accepts<S: Slot + ?Sized>(since: Option<DateTime<Utc>>, slot: &S) -> bool {
    match (since, slot.timestamp()) {
        (Some(since), Some(ts)) => ts >= since,
        _ => true,
    }
}
