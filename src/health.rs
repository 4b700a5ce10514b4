use crate::{PoolStats, StoreCounts};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    /// At least one worker is idle
    Ok,
    /// Every worker is busy; new tasks queue
    Saturated,
    /// The pool has been shut down
    Closed,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthLevel,
    pub version: &'static str,
    pub pool: PoolStats,
    pub tasks: StoreCounts,
    pub in_flight: usize,
}

impl HealthReport {
    pub fn new(pool: PoolStats, tasks: StoreCounts, in_flight: usize) -> Self {
        let status = if pool.closed {
            HealthLevel::Closed
        } else if pool.available == 0 {
            debug!(
                "Worker pool saturated: {} busy, {} tasks in flight",
                pool.in_use, in_flight
            );
            HealthLevel::Saturated
        } else {
            HealthLevel::Ok
        };

        Self {
            status,
            version: env!("CARGO_PKG_VERSION"),
            pool,
            tasks,
            in_flight,
        }
    }
}
