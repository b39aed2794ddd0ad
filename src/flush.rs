//! Periodic flush of the state table to the durable store.
//!
//! Each tick snapshots the table and fans the writes out as independent
//! tasks under a concurrency bound. A failed entry (re-validation, write
//! error or timeout) is removed from the table so a later complete cycle
//! rebuilds it; the other entries are unaffected.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::error::PersistError;
use crate::state::{StateTable, VehicleState};
use crate::store::StateStore;

#[derive(Debug, Clone)]
pub struct FlushConfig {
    pub interval: Duration,
    /// Upper bound on a single durable write before it counts as failed.
    pub write_timeout: Duration,
    /// Maximum concurrent writes per tick.
    pub concurrency: usize,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            write_timeout: Duration::from_secs(10),
            concurrency: 4,
        }
    }
}

/// Runs flush ticks until the shutdown flag flips. The final in-progress
/// tick is allowed to finish.
pub async fn run_flush_loop(
    table: Arc<StateTable>,
    store: Arc<dyn StateStore>,
    config: FlushConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // interval fires immediately; skip the tick at t=0
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                flush_once(&table, store.clone(), &config).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("flush loop stopping");
                    break;
                }
            }
        }
    }
}

/// One flush tick: snapshot, fan out, gather. Returns how many entries
/// were durably written.
pub async fn flush_once(
    table: &Arc<StateTable>,
    store: Arc<dyn StateStore>,
    config: &FlushConfig,
) -> usize {
    let snapshot = table.snapshot().await;
    if snapshot.is_empty() {
        debug!("flush tick with no tracked states");
        return 0;
    }

    let total = snapshot.len();
    let semaphore = Arc::new(Semaphore::new(config.concurrency));
    let mut tasks = Vec::with_capacity(total);

    for state in snapshot {
        let sem = semaphore.clone();
        let store = store.clone();
        let table = table.clone();
        let write_timeout = config.write_timeout;

        tasks.push(tokio::spawn(async move {
            let _permit = sem.acquire().await.expect("flush semaphore closed");

            let car_id = state.car_id;
            match write_state(store.as_ref(), &state, write_timeout).await {
                Ok(()) => {
                    debug!(car_id, "state flushed");
                    true
                }
                Err(e) => {
                    error!(car_id, error = %e, "state flush failed, dropping entry");
                    table.remove(car_id).await;
                    false
                }
            }
        }));
    }

    // Gather without short-circuiting: one slow or failing entry must
    // never block the others.
    let mut written = 0;
    for task in tasks {
        if let Ok(true) = task.await {
            written += 1;
        }
    }

    info!(written, total, "flush tick complete");
    written
}

/// Re-validates and writes one entry under the configured timeout.
async fn write_state(
    store: &dyn StateStore,
    state: &VehicleState,
    write_timeout: Duration,
) -> Result<(), PersistError> {
    if let Err(reason) = state.validate() {
        return Err(PersistError::Validation {
            car_id: state.car_id,
            reason,
        });
    }

    match tokio::time::timeout(write_timeout, store.write_state(state)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(PersistError::Write {
            car_id: state.car_id,
            source,
        }),
        Err(_) => Err(PersistError::Timeout {
            car_id: state.car_id,
            secs: write_timeout.as_secs(),
        }),
    }
}
