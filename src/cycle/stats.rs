use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Process-lifetime counters, reset only by a restart.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStatistics {
    pub total_discovered: u64,
    pub total_new: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Everything the scheduler and dispatch mutate, behind one lock.
#[derive(Debug, Default)]
pub struct SchedulerState {
    pub stats: RunStatistics,
    pub running: bool,
}

pub type SharedState = Arc<Mutex<SchedulerState>>;

impl SchedulerState {
    pub fn shared() -> SharedState {
        Arc::new(Mutex::new(Self::default()))
    }
}
