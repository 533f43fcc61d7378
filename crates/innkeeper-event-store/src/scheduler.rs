//! Background maintenance tasks.
//!
//! Three independent tokio tasks drive partition provisioning, snapshot
//! materialization and retention, each on its own interval and each going
//! through the store's public operations only.

use std::sync::Arc;
use std::time::Duration;

use innkeeper_core::storage::AuditStorage;
use innkeeper_core::time::shift_months;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::store::AuditStore;

/// Periods of the background tasks. A zero period disables that task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// How often partitions are precreated (and old ones retired).
    pub precreate_every: Duration,
    /// How often snapshot candidates are flushed.
    pub snapshot_every: Duration,
    /// How often the retention sweep runs.
    pub sweep_every: Duration,
    /// Retire partitions that ended more than this many months before the
    /// current month. `None` never retires.
    pub retire_after_months: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            precreate_every: Duration::from_secs(60 * 60),
            snapshot_every: Duration::from_secs(30),
            sweep_every: Duration::from_secs(24 * 60 * 60),
            retire_after_months: Some(1),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Job {
    Partitions,
    Snapshots,
    Retention,
}

impl Job {
    const fn name(self) -> &'static str {
        match self {
            Self::Partitions => "partitions",
            Self::Snapshots => "snapshots",
            Self::Retention => "retention",
        }
    }
}

/// Spawns the maintenance tasks.
pub struct Scheduler;

impl Scheduler {
    /// Starts every task with a non-zero period. Must be called within a
    /// tokio runtime.
    #[must_use]
    pub fn spawn<S: AuditStorage + 'static>(
        store: Arc<AuditStore<S>>,
        config: SchedulerConfig,
    ) -> SchedulerHandle {
        let (shutdown, signal) = watch::channel(false);
        let jobs = [
            (Job::Partitions, config.precreate_every),
            (Job::Snapshots, config.snapshot_every),
            (Job::Retention, config.sweep_every),
        ];
        let tasks = jobs
            .into_iter()
            .filter(|(_, period)| !period.is_zero())
            .map(|(job, period)| {
                let store = Arc::clone(&store);
                let signal = signal.clone();
                let retire_after = config.retire_after_months;
                tokio::spawn(run_periodic(store, job, period, retire_after, signal))
            })
            .collect();
        SchedulerHandle { shutdown, tasks }
    }
}

/// Running maintenance tasks.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Number of running tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signals every task to stop and waits for them. A job in progress
    /// finishes first.
    pub async fn shutdown(self) {
        // Receivers only go away once every task has exited.
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "maintenance task panicked");
            }
        }
        info!("maintenance tasks stopped");
    }
}

async fn run_periodic<S: AuditStorage + 'static>(
    store: Arc<AuditStore<S>>,
    job: Job,
    period: Duration,
    retire_after_months: Option<u32>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(job = job.name(), period = ?period, "maintenance task started");

    while !*shutdown.borrow() {
        tokio::select! {
            _ = ticker.tick() => run_job(&store, job, retire_after_months).await,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    info!(job = job.name(), "maintenance task stopped");
}

async fn run_job<S: AuditStorage + 'static>(
    store: &AuditStore<S>,
    job: Job,
    retire_after_months: Option<u32>,
) {
    match job {
        Job::Partitions => {
            if let Err(e) = store.precreate(None).await {
                warn!(error = %e, "partition precreate failed");
            }
            let Some(months) = retire_after_months else {
                return;
            };
            let Some(older_than) = shift_months(store.now(), -i64::from(months)) else {
                return;
            };
            if let Err(e) = store.retire(older_than).await {
                warn!(error = %e, "partition retire failed");
            }
        }
        Job::Snapshots => {
            store.flush_snapshots().await;
        }
        Job::Retention => {
            if let Err(e) = store.sweep(store.now()).await {
                warn!(error = %e, "retention sweep failed");
            }
        }
    }
}
