use std::sync::Arc;
use std::time::Duration;

use slotfeed_connector::{ConnectorFactory, DynConnector, RetryPolicy};
use slotfeed_core::config::DiscoveryConfig;
use slotfeed_core::{slot_order, ConfigurationError, Slot, SlotRange, Tick};
use tracing::{debug, error, info};

use crate::batch::DiscoveryBatch;
use crate::checkpoint::{Checkpoint, CheckpointCodec};
use crate::error::DiscoveryError;
use crate::window::{lock_window, new_shared_window, SharedSlotWindow};

/// Default remember window, in tick intervals.
pub const DEFAULT_REMEMBER_MULTIPLIER: u32 = 100;

// ── Options ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryOptions {
    /// Listing attempts per tick.
    pub max_retries: u32,
    pub tick_interval: Duration,
    pub remember_multiplier: u32,
    pub range: SlotRange,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            tick_interval: Duration::from_secs(60),
            remember_multiplier: DEFAULT_REMEMBER_MULTIPLIER,
            range: SlotRange::Unbounded,
        }
    }
}

impl DiscoveryOptions {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            tick_interval: config.tick_interval(),
            remember_multiplier: config.remember_multiplier,
            range: config.range(),
        }
    }

    pub fn remember_duration(&self) -> Duration {
        self.tick_interval.saturating_mul(self.remember_multiplier)
    }
}

// ── State ───────────────────────────────────────────────────────────

/// Where the engine is within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Listing,
    Filtering,
    Emitting,
    /// The last tick exhausted its listing retries.
    Fatal,
}

// ── Engine ──────────────────────────────────────────────────────────

/// Decides, tick by tick, which listed slots are new.
///
/// Only `list` is retried here. Ticks take `&mut self`, so one runs at a
/// time; pruning and snapshots may run concurrently through [`Self::window`].
/// The window lock is never held across connector I/O.
pub struct DiscoveryEngine<F: ConnectorFactory> {
    factory: Arc<F>,
    params: F::Params,
    connector: DynConnector<F::Slot>,
    retry: RetryPolicy,
    range: SlotRange,
    remember: Duration,
    window: SharedSlotWindow<F::Slot>,
    state: EngineState,
}

impl<F: ConnectorFactory> DiscoveryEngine<F> {
    /// Builds the discovery connector up front, so bad parameters fail here.
    pub fn new(factory: Arc<F>, params: F::Params, options: DiscoveryOptions) -> Result<Self, ConfigurationError> {
        let connector = factory.create(&params)?;
        info!(
            connector = connector.name(),
            max_retries = options.max_retries,
            remember_secs = options.remember_duration().as_secs(),
            "discovery engine ready"
        );
        Ok(Self {
            factory,
            params,
            connector,
            retry: RetryPolicy::new(options.max_retries),
            remember: options.remember_duration(),
            range: options.range,
            window: new_shared_window(),
            state: EngineState::Idle,
        })
    }

    /// Run one discovery pass.
    ///
    /// `Ok(None)` means the source was checked and nothing new appeared. An
    /// exhausted listing is an error; the tick records nothing and the next
    /// tick starts over.
    pub async fn tick(&mut self, now: Tick) -> Result<Option<DiscoveryBatch<F>>, DiscoveryError> {
        self.state = EngineState::Listing;
        let connector = &self.connector;
        let listed = match self.retry.run(|_| connector.list()).await {
            Ok(listed) => listed,
            Err(source) => {
                self.state = EngineState::Fatal;
                let attempts = self.retry.max_attempts();
                error!(tick = %now, attempts, error = %source, "listing failed, tick aborted");
                return Err(DiscoveryError::ListingExhausted { attempts, source });
            }
        };

        self.state = EngineState::Filtering;
        let listed_count = listed.len();
        let fresh = {
            let mut window = lock_window(&self.window);
            let mut fresh: Vec<F::Slot> = listed
                .into_iter()
                .filter(|slot| self.range.accepts(slot) && !window.contains(slot.name()))
                .collect();
            fresh.sort_by(|a, b| slot_order(a, b));
            if !fresh.is_empty() {
                window.record(now, fresh.clone());
            }
            fresh
        };

        if fresh.is_empty() {
            debug!(tick = %now, listed = listed_count, "no new slots");
            self.state = EngineState::Idle;
            return Ok(None);
        }

        self.state = EngineState::Emitting;
        let batch = DiscoveryBatch::new(now, fresh, &self.factory, &self.params);
        info!(
            tick = %now,
            listed = listed_count,
            count = batch.count,
            "discovered new slots"
        );
        self.state = EngineState::Idle;
        Ok(Some(batch))
    }

    /// Forget history older than the remember window, measured from `now`.
    pub fn prune(&self, now: Tick) -> usize {
        self.prune_before(now.saturating_sub(self.remember))
    }

    pub fn prune_before(&self, cutoff: Tick) -> usize {
        let removed = lock_window(&self.window).prune(cutoff);
        if removed > 0 {
            debug!(cutoff = %cutoff, removed, "pruned slot history");
        }
        removed
    }

    pub fn snapshot(&self) -> Checkpoint<F::Slot> {
        CheckpointCodec::snapshot(&*lock_window(&self.window))
    }

    /// Replay a checkpoint, returning the batches the live run emitted for it.
    pub fn restore(&mut self, checkpoint: &Checkpoint<F::Slot>) -> Vec<DiscoveryBatch<F>> {
        let entries = CheckpointCodec::restore(&mut *lock_window(&self.window), checkpoint);
        info!(
            entries = entries.len(),
            slots = checkpoint.slot_count(),
            "restored discovery history"
        );
        entries
            .into_iter()
            .map(|(tick, slots)| DiscoveryBatch::new(tick, slots, &self.factory, &self.params))
            .collect()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Shared handle for maintenance tasks.
    pub fn window(&self) -> SharedSlotWindow<F::Slot> {
        Arc::clone(&self.window)
    }

    pub fn remember_duration(&self) -> Duration {
        self.remember
    }

    pub fn connector_name(&self) -> &str {
        self.connector.name()
    }
}
