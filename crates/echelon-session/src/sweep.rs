//! The two background sweeps of the registry.
//!
//! Each sweep is its own task with its own [`TickScheduler`]. They share
//! nothing but the registry, and stop when the shutdown channel flips.

use std::sync::Arc;

use echelon_tick::{TickConfig, TickScheduler};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::SessionRegistry;

/// Join handles of the running sweep tasks.
pub struct SweepHandles {
    pub expiry: JoinHandle<()>,
    pub liveness: JoinHandle<()>,
}

impl SweepHandles {
    /// Waits for both tasks to finish (after shutdown was signalled).
    pub async fn join(self) {
        if let Err(e) = self.expiry.await {
            tracing::error!(error = %e, "expiry sweep task failed");
        }
        if let Err(e) = self.liveness.await {
            tracing::error!(error = %e, "liveness sweep task failed");
        }
    }
}

impl SessionRegistry {
    /// Spawns the expiry sweep and the game-server liveness sweep.
    ///
    /// Both run until `shutdown` becomes `true` or its sender is dropped.
    /// A zero interval in the config disables the corresponding sweep.
    pub fn spawn_sweeps(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> SweepHandles {
        let expiry = {
            let registry = Arc::clone(self);
            let scheduler = TickScheduler::new(TickConfig::every(self.config().expiry_sweep_interval));
            tokio::spawn(run_sweep("expiry", scheduler, shutdown.clone(), move || {
                let registry = Arc::clone(&registry);
                async move {
                    let expired = registry.expire_stale().await;
                    if !expired.is_empty() {
                        tracing::debug!(count = expired.len(), "expiry sweep removed sessions");
                    }
                }
            }))
        };

        let liveness = {
            let registry = Arc::clone(self);
            let scheduler =
                TickScheduler::new(TickConfig::every(self.config().liveness_sweep_interval));
            tokio::spawn(run_sweep("liveness", scheduler, shutdown, move || {
                let registry = Arc::clone(&registry);
                async move {
                    let evicted = registry.probe_game_servers().await;
                    if !evicted.is_empty() {
                        tracing::debug!(count = evicted.len(), "liveness sweep evicted game servers");
                    }
                }
            }))
        };

        SweepHandles { expiry, liveness }
    }
}

async fn run_sweep<F, Fut>(
    name: &'static str,
    mut scheduler: TickScheduler,
    mut shutdown: watch::Receiver<bool>,
    mut pass: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    tracing::debug!(sweep = name, period = ?scheduler.period(), "sweep started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            tick = scheduler.wait_for_tick() => {
                tracing::trace!(sweep = name, tick = tick.tick, "sweep pass");
                pass().await;
                scheduler.record_tick_end();
                tracing::trace!(sweep = name, took = ?scheduler.last_run(), "sweep pass done");
            }
        }
    }
    tracing::debug!(sweep = name, passes = scheduler.tick_count(), "sweep stopped");
}
