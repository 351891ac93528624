//! discovery-worker: periodic slot discovery against one configured source.
//!
//! Each tick lists the source, emits the slots not seen before, writes them to
//! the output directory, and checkpoints the remembered history. On startup
//! the last checkpoint is replayed, so a restart neither loses nor repeats
//! slots. A listing that exhausts its retries stops the worker with an error.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use slotfeed_connector::{RetryPolicy, SourceConnectorFactory};
use slotfeed_core::config::{load_dotenv, Config};
use slotfeed_core::{RemoteFile, Tick};
use slotfeed_discovery::{
    lock_window, BatchSink, CheckpointCodec, DirectorySink, DiscoveryBatch, DiscoveryEngine,
    DiscoveryError, DiscoveryOptions, FileCheckpointStore, SharedSlotWindow,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Incremental slot discovery worker.
#[derive(Parser, Debug)]
#[command(name = "discovery-worker", version, about)]
struct Cli {
    /// Config profile; every key is looked up as `{PROFILE}_{KEY}` first.
    /// Defaults to `SLOTFEED_PROFILE`.
    #[arg(long)]
    profile: Option<String>,

    /// Checkpoint file, overriding the profile's CHECKPOINT_PATH.
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Output directory, overriding the profile's OUTPUT_DIR.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Prune interval in seconds (defaults to the tick interval).
    #[arg(long, env = "DISCOVERY_PRUNE_INTERVAL")]
    prune_interval: Option<u64>,

    /// Run a single tick, checkpoint, and exit.
    #[arg(long)]
    once: bool,
}

// ── DiscoveryWorker ─────────────────────────────────────────────────

type Batch = DiscoveryBatch<SourceConnectorFactory>;

struct DiscoveryWorker {
    engine: DiscoveryEngine<SourceConnectorFactory>,
    sink: DirectorySink,
    store: FileCheckpointStore,
    /// Batches whose delivery failed; retried before the next tick's batch.
    pending: Vec<Batch>,
}

impl DiscoveryWorker {
    /// Replay the stored checkpoint, redelivering anything not yet on disk.
    async fn restore(&mut self) -> Result<(), DiscoveryError> {
        let checkpoint = match CheckpointCodec::load::<RemoteFile>(&self.store).await? {
            Some(checkpoint) if !checkpoint.is_empty() => checkpoint,
            Some(_) | None => {
                info!(path = %self.store.path().display(), "no checkpointed history, starting fresh");
                return Ok(());
            }
        };
        let replay = self.engine.restore(&checkpoint);
        self.pending.extend(replay);
        self.deliver_pending().await;
        Ok(())
    }

    async fn deliver_pending(&mut self) {
        let mut failed = Vec::new();
        for batch in self.pending.drain(..) {
            if let Err(e) = self.sink.deliver(&batch).await {
                warn!(tick = %batch.tick, error = %e, "delivery failed, will retry");
                failed.push(batch);
            }
        }
        self.pending = failed;
    }

    async fn run_tick(&mut self) -> Result<(), DiscoveryError> {
        let batch = self.engine.tick(Tick::now()).await?;
        if let Some(batch) = batch {
            debug!(tick = %batch.tick, slots = %batch.description, "new slots");
            self.pending.push(batch);
            self.checkpoint().await?;
        }
        if !self.pending.is_empty() {
            self.deliver_pending().await;
        }
        Ok(())
    }

    async fn checkpoint(&self) -> Result<(), DiscoveryError> {
        CheckpointCodec::save(&self.store, &self.engine.snapshot()).await?;
        Ok(())
    }
}

/// Prune the shared window on its own timer until shutdown.
async fn prune_loop(
    window: SharedSlotWindow<RemoteFile>,
    remember: Duration,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut timer = tokio::time::interval(every);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = timer.tick() => {
                let cutoff = Tick::now().saturating_sub(remember);
                let removed = lock_window(&window).prune(cutoff);
                if removed > 0 {
                    info!(cutoff = %cutoff, removed, "pruned slot history");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let mut config = match &cli.profile {
        Some(profile) => Config::for_profile(profile)?,
        None => Config::from_env()?,
    };
    if let Some(path) = cli.checkpoint {
        config.worker.checkpoint_path = path;
    }
    if let Some(dir) = cli.output_dir {
        config.worker.output_dir = dir;
    }
    config.validate()?;
    config.log_summary();
    debug!(config = %config.redacted_summary(), "effective config");

    let options = DiscoveryOptions::from_config(&config.discovery);
    let tick_interval = options.tick_interval;
    let engine = DiscoveryEngine::new(Arc::new(SourceConnectorFactory), config.source.clone(), options)?;

    let mut worker = DiscoveryWorker {
        engine,
        sink: DirectorySink::new(&config.worker.output_dir, RetryPolicy::new(config.discovery.max_retries)),
        store: FileCheckpointStore::new(&config.worker.checkpoint_path),
        pending: Vec::new(),
    };
    worker.restore().await?;

    if cli.once {
        worker.run_tick().await?;
        worker.checkpoint().await?;
        info!("discovery-worker finished single tick");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        let _ = shutdown_tx.send(true);
    });

    let prune_every = cli
        .prune_interval
        .map(Duration::from_secs)
        .unwrap_or(tick_interval);
    let pruner = tokio::spawn(prune_loop(
        worker.engine.window(),
        worker.engine.remember_duration(),
        prune_every,
        shutdown_rx.clone(),
    ));

    info!(
        source = worker.engine.connector_name(),
        output_dir = %worker.sink.root().display(),
        interval_ms = tick_interval.as_millis() as u64,
        "discovery-worker starting"
    );

    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut shutdown = shutdown_rx;
    let outcome = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = worker.run_tick().await {
                    error!(error = %e, "discovery tick failed, stopping worker");
                    break Err(e);
                }
            }
            _ = shutdown.changed() => break Ok(()),
        }
    };

    pruner.abort();
    worker.checkpoint().await?;
    if !worker.pending.is_empty() {
        warn!(batches = worker.pending.len(), "exiting with undelivered batches; they replay from the checkpoint");
    }

    outcome?;
    info!("discovery-worker exited cleanly");
    Ok(())
}
