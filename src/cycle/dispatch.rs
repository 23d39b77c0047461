use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::{DispatchError, RecoveryStrategy};
use crate::parser::Listing;
use crate::sources::SourceRegistry;
use crate::storage::{ApplicationStore, EventLevel};

use super::stats::SharedState;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub succeeded: u64,
    pub failed: u64,
    /// Listings whose source was not registered.
    pub skipped: u64,
}

/// Applies to listings one at a time with a randomized pause in between.
pub struct DispatchController {
    store: Arc<dyn ApplicationStore>,
    state: SharedState,
    delay_min: Duration,
    delay_max: Duration,
}

impl DispatchController {
    pub fn new(store: Arc<dyn ApplicationStore>, state: SharedState, delay_min: Duration, delay_max: Duration) -> Self {
        let delay_max = delay_max.max(delay_min);
        Self {
            store,
            state,
            delay_min,
            delay_max,
        }
    }

    pub async fn dispatch(&self, sources: &SourceRegistry, listings: &[Listing]) -> DispatchReport {
        let mut report = DispatchReport::default();

        for (index, listing) in listings.iter().enumerate() {
            let attempt = match sources.get(&listing.source_name) {
                Some(source) => source.apply(listing).await,
                None => Err(DispatchError::SourceUnavailable(listing.source_name.clone()).into()),
            };

            let succeeded = match attempt {
                Ok(true) => {
                    info!("Applied to {} ({})", listing.title, listing.id);
                    true
                }
                Ok(false) => {
                    warn!("Application to {} was not accepted", listing.id);
                    false
                }
                Err(e) => match DispatchError::strategy_for(e.as_ref(), RecoveryStrategy::RecordFailure) {
                    RecoveryStrategy::SkipListing => {
                        warn!(listing_id = %listing.id, error = %e, "Skipping listing");
                        report.skipped += 1;
                        continue;
                    }
                    _ => {
                        error!(listing_id = %listing.id, source = %listing.source_name, error = %e, "Application failed");
                        false
                    }
                },
            };

            if let Err(e) = self.store.record_application(listing, succeeded).await {
                match e.recovery_strategy() {
                    RecoveryStrategy::LogAndContinue => {
                        error!(listing_id = %listing.id, error = %e, "Failed to record application, counters still updated")
                    }
                    strategy => error!(listing_id = %listing.id, error = %e, ?strategy, "Failed to record application"),
                }
            }

            {
                let mut state = self.state.lock().await;
                if succeeded {
                    state.stats.total_succeeded += 1;
                } else {
                    state.stats.total_failed += 1;
                }
            }

            if succeeded {
                report.succeeded += 1;
                self.store
                    .append_event(EventLevel::Info, &format!("Applied to {}", listing.summary_line()), Some(&listing.id))
                    .await;
            } else {
                report.failed += 1;
                self.store
                    .append_event(
                        EventLevel::Warning,
                        &format!("Application failed for {}", listing.summary_line()),
                        Some(&listing.id),
                    )
                    .await;
            }

            if index + 1 < listings.len() {
                let delay = self.next_delay();
                debug!("Waiting {:?} before next application", delay);
                sleep(delay).await;
            }
        }

        report
    }

    fn next_delay(&self) -> Duration {
        if self.delay_max == self.delay_min {
            return self.delay_min;
        }
        let mut rng = rand::thread_rng();
        let millis = rng.gen_range(self.delay_min.as_millis()..=self.delay_max.as_millis());
        Duration::from_millis(millis as u64)
    }
}
