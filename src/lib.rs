pub mod api;
pub mod browser;
pub mod config;
pub mod cycle;
pub mod error;
pub mod notify;
pub mod parser;
pub mod sources;
pub mod storage;

pub use config::Config;
pub use cycle::{CycleOutcome, CycleScheduler, CycleSettings, RunStatistics};
pub use error::{DispatchError, Result};
pub use parser::Listing;
pub use sources::ListingSource;
pub use storage::{ApplicationStore, SqliteApplicationStore};
