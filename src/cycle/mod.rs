pub mod discovery;
pub mod dispatch;
pub mod scheduler;
pub mod stats;


pub use discovery::{dedup_by_id, DiscoveryCoordinator, DiscoveryOutcome};
pub use dispatch::{DispatchController, DispatchReport};
pub use scheduler::{CycleOutcome, CycleScheduler, CycleSettings};
pub use stats::{RunStatistics, SchedulerState, SharedState};
