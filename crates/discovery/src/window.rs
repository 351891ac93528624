use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use slotfeed_core::{Slot, Tick};

/// Remembered discovery history.
///
/// `history` maps each tick that produced slots to those slots, in the order
/// they were emitted. `seen` holds every name ever recorded and is what the
/// dedup check consults.
///
/// `prune` only trims `history`. Names stay in `seen` for the life of the
/// window, so the set grows with every distinct slot ever discovered and a
/// pruned name is never rediscovered.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotWindow<S> {
    history: BTreeMap<Tick, Vec<S>>,
    seen: HashSet<String>,
}

impl<S> Default for SlotWindow<S> {
    fn default() -> Self {
        Self {
            history: BTreeMap::new(),
            seen: HashSet::new(),
        }
    }
}

impl<S: Slot> SlotWindow<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.seen.contains(name)
    }

    /// Store `slots` under `tick`, replacing any earlier entry for that tick.
    pub fn record(&mut self, tick: Tick, slots: Vec<S>) {
        self.seen.extend(slots.iter().map(|s| s.name().to_string()));
        self.history.insert(tick, slots);
    }

    /// Drop history entries strictly older than `cutoff`. Returns how many went.
    pub fn prune(&mut self, cutoff: Tick) -> usize {
        let kept = self.history.split_off(&cutoff);
        let removed = self.history.len();
        self.history = kept;
        removed
    }

    /// Copies of every entry at or after `since`, ascending by tick.
    pub fn entries_since(&self, since: Tick) -> Vec<(Tick, Vec<S>)> {
        self.history
            .range(since..)
            .map(|(tick, slots)| (*tick, slots.clone()))
            .collect()
    }

    pub fn slots_at(&self, tick: Tick) -> Option<&[S]> {
        self.history.get(&tick).map(Vec::as_slice)
    }

    /// Number of remembered ticks.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    pub fn oldest_tick(&self) -> Option<Tick> {
        self.history.keys().next().copied()
    }
}

/// Handle shared between the engine and maintenance tasks.
pub type SharedSlotWindow<S> = Arc<Mutex<SlotWindow<S>>>;

pub fn new_shared_window<S>() -> SharedSlotWindow<S> {
    Arc::new(Mutex::new(SlotWindow::default()))
}

/// Lock the window, recovering from a poisoned lock.
///
/// Every mutation leaves the window consistent before it can panic, so the
/// data behind a poisoned lock is still usable.
pub fn lock_window<S>(window: &Mutex<SlotWindow<S>>) -> MutexGuard<'_, SlotWindow<S>> {
    window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
