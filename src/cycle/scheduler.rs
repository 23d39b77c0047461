use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{DispatchError, RecoveryStrategy, Result};
use crate::notify::NotificationGateway;
use crate::sources::{dispose_all, SourceRegistry};
use crate::storage::{ApplicationStore, EventLevel};

use super::discovery::DiscoveryCoordinator;
use super::dispatch::{DispatchController, DispatchReport};
use super::stats::{RunStatistics, SchedulerState, SharedState};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum CycleOutcome {
    Skipped(String),
    Completed(DispatchReport),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub cities: Vec<String>,
    pub cooldown: Duration,
    pub discovery_timeout: Duration,
    pub apply_delay_min: Duration,
    pub apply_delay_max: Duration,
}

impl CycleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cities: config.search.cities.clone(),
            cooldown: config.schedule.cooldown,
            discovery_timeout: config.pacing.discovery_timeout,
            apply_delay_min: config.pacing.apply_delay_min,
            apply_delay_max: config.pacing.apply_delay_max,
        }
    }
}

struct TimerLoop {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

// Everything a cycle touches. Shared with the spawned cycle task so a
// dropped caller cannot cancel a cycle halfway through.
struct CycleRunner {
    sources: SourceRegistry,
    cities: Vec<String>,
    cooldown: Duration,
    store: Arc<dyn ApplicationStore>,
    notifier: Arc<dyn NotificationGateway>,
    discovery: DiscoveryCoordinator,
    dispatch: DispatchController,
    state: SharedState,
}

/// Runs discovery followed by dispatch, at most one cycle at a time and
/// never twice within the cooldown window.
pub struct CycleScheduler {
    runner: Arc<CycleRunner>,
    timer: Mutex<Option<TimerLoop>>,
}

impl CycleScheduler {
    pub fn new(
        sources: SourceRegistry,
        store: Arc<dyn ApplicationStore>,
        notifier: Arc<dyn NotificationGateway>,
        settings: CycleSettings,
    ) -> Self {
        let state = SchedulerState::shared();
        let discovery = DiscoveryCoordinator::new(store.clone(), settings.discovery_timeout);
        let dispatch = DispatchController::new(
            store.clone(),
            state.clone(),
            settings.apply_delay_min,
            settings.apply_delay_max,
        );

        let runner = CycleRunner {
            sources,
            cities: settings.cities,
            cooldown: settings.cooldown,
            store,
            notifier,
            discovery,
            dispatch,
            state,
        };

        Self {
            runner: Arc::new(runner),
            timer: Mutex::new(None),
        }
    }

    /// Run one cycle unless another is in flight or the last one started
    /// less than `cooldown` ago. Never returns an error; failures are
    /// logged, recorded as events and reported through the notifier.
    ///
    /// The cycle runs on its own task and finishes even if the returned
    /// future is dropped.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let runner = self.runner.clone();
        match tokio::spawn(async move { runner.run_cycle().await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Cycle task did not complete: {}", e);
                CycleOutcome::Failed(format!("cycle task did not complete: {}", e))
            }
        }
    }

    /// Manual trigger, subject to the same guards as timer ticks.
    pub async fn trigger(&self) -> CycleOutcome {
        self.run_cycle().await
    }

    /// Start the timer loop. The first cycle runs immediately. Returns
    /// `false` if the loop is already running.
    pub async fn start(&self, every: Duration) -> bool {
        let mut timer = self.timer.lock().await;
        if timer.is_some() {
            warn!("Scheduler already started");
            return false;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let runner = self.runner.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        debug!("Scheduler loop received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let outcome = runner.run_cycle().await;
                        debug!("Scheduled cycle outcome: {:?}", outcome);
                    }
                }
            }
        });

        *timer = Some(TimerLoop { shutdown_tx, handle });
        info!("Scheduler started, interval {}s", every.as_secs());
        true
    }

    /// Stop the timer loop after the cycle in flight, if any, finishes.
    /// Returns `false` if no loop was running.
    pub async fn stop(&self) -> bool {
        let Some(timer) = self.timer.lock().await.take() else {
            return false;
        };

        let _ = timer.shutdown_tx.send(true);
        if let Err(e) = timer.handle.await {
            warn!("Scheduler loop ended abnormally: {}", e);
        }
        info!("Scheduler stopped");
        true
    }

    pub async fn is_scheduled(&self) -> bool {
        self.timer.lock().await.is_some()
    }

    pub async fn is_running(&self) -> bool {
        self.runner.state.lock().await.running
    }

    pub async fn statistics(&self) -> RunStatistics {
        self.runner.state.lock().await.stats.clone()
    }

    pub fn store(&self) -> Arc<dyn ApplicationStore> {
        self.runner.store.clone()
    }

    /// Stop the timer loop and release every source.
    pub async fn shutdown(&self) {
        self.stop().await;
        dispose_all(&self.runner.sources).await;
    }
}

impl CycleRunner {
    async fn run_cycle(&self) -> CycleOutcome {
        {
            let mut state = self.state.lock().await;
            if state.running {
                info!("Cycle already running, skipping trigger");
                return CycleOutcome::Skipped("cycle already running".to_string());
            }
            let now = Utc::now();
            if let Some(last_run) = state.stats.last_run_at {
                let elapsed = now.signed_duration_since(last_run).to_std().unwrap_or(Duration::ZERO);
                if elapsed < self.cooldown {
                    let remaining = self.cooldown - elapsed;
                    info!("Cooldown active, next cycle possible in {}s", remaining.as_secs());
                    return CycleOutcome::Skipped(format!("cooldown active for another {}s", remaining.as_secs()));
                }
            }
            state.running = true;
            state.stats.last_run_at = Some(now);
        }

        info!("Starting discovery cycle");
        let result = AssertUnwindSafe(self.execute()).catch_unwind().await;

        self.state.lock().await.running = false;

        match result {
            Ok(Ok(report)) => {
                info!(
                    "Cycle finished: {} succeeded, {} failed, {} skipped",
                    report.succeeded, report.failed, report.skipped
                );
                CycleOutcome::Completed(report)
            }
            Ok(Err(e)) => {
                let kind = e.downcast_ref::<DispatchError>().map(DispatchError::kind).unwrap_or("cycle");
                if DispatchError::strategy_for(e.as_ref(), RecoveryStrategy::AbortCycle) == RecoveryStrategy::FixConfig {
                    error!("Cycle cannot run until the configuration is fixed");
                }
                self.report_failure(kind, &e.to_string()).await
            }
            Err(panic) => {
                let message = panic_message(&*panic);
                self.report_failure("panic", &format!("cycle panicked: {}", message)).await
            }
        }
    }

    async fn execute(&self) -> Result<DispatchReport> {
        if self.sources.is_empty() {
            return Err(DispatchError::Cycle("No listing sources registered".to_string()).into());
        }

        let discovery = self.discovery.discover_new(&self.sources, &self.cities).await;
        self.state.lock().await.stats.total_discovered += discovery.total_discovered;

        if discovery.new_listings.is_empty() {
            info!("No new listings this cycle");
            return Ok(DispatchReport::default());
        }

        let new_listings = discovery.new_listings;
        let report = self.dispatch.dispatch(&self.sources, &new_listings).await;

        let snapshot = {
            let mut state = self.state.lock().await;
            state.stats.total_new += new_listings.len() as u64;
            state.stats.clone()
        };

        self.store
            .append_event(
                EventLevel::Info,
                &format!(
                    "Cycle processed {} new listings: {} succeeded, {} failed",
                    new_listings.len(),
                    report.succeeded,
                    report.failed
                ),
                None,
            )
            .await;

        if let Err(e) = self.notifier.notify_new_listings(&new_listings, &snapshot).await {
            warn!("Failed to send new-listings notification: {}", e);
        }

        Ok(report)
    }

    async fn report_failure(&self, kind: &str, description: &str) -> CycleOutcome {
        error!("Cycle failed ({}): {}", kind, description);
        self.store
            .append_event(EventLevel::Error, &format!("Cycle failed ({}): {}", kind, description), None)
            .await;
        if let Err(e) = self.notifier.notify_error(kind, description).await {
            warn!("Failed to send error notification: {}", e);
        }
        CycleOutcome::Failed(description.to_string())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
