pub mod webhook;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::NotificationConfig;
use crate::cycle::RunStatistics;
use crate::error::Result;
use crate::parser::Listing;

pub use webhook::WebhookNotifier;

/// Receives cycle summaries and cycle failures. Best effort: callers log
/// and drop any error returned here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn notify_new_listings(&self, listings: &[Listing], stats: &RunStatistics) -> Result<()>;
    async fn notify_error(&self, error_kind: &str, description: &str) -> Result<()>;
}

/// Fans notifications out to providers under a per-day send budget.
pub struct NotificationManager {
    providers: Vec<Box<dyn NotificationGateway>>,
    settings: NotificationConfig,
    sent_today: Mutex<(NaiveDate, u32)>,
}

impl NotificationManager {
    pub fn new(settings: NotificationConfig) -> Self {
        Self {
            providers: Vec::new(),
            settings,
            sent_today: Mutex::new((Local::now().date_naive(), 0)),
        }
    }

    /// Build the manager with the providers the configuration asks for.
    pub fn from_config(settings: &NotificationConfig) -> Result<Self> {
        let mut manager = Self::new(settings.clone());
        if let Some(ref url) = settings.webhook_url {
            manager.add_provider(Box::new(WebhookNotifier::new(url.clone())?));
        }
        Ok(manager)
    }

    pub fn add_provider(&mut self, provider: Box<dyn NotificationGateway>) {
        self.providers.push(provider);
    }

    pub async fn sent_today(&self) -> u32 {
        let counter = self.sent_today.lock().await;
        if counter.0 == Local::now().date_naive() {
            counter.1
        } else {
            0
        }
    }

    // reserve one send from today's budget, false once it is used up
    async fn take_budget(&self) -> bool {
        let today = Local::now().date_naive();
        let mut counter = self.sent_today.lock().await;
        if counter.0 != today {
            *counter = (today, 0);
        }
        if counter.1 >= self.settings.max_per_day {
            return false;
        }
        counter.1 += 1;
        true
    }
}

#[async_trait]
impl NotificationGateway for NotificationManager {
    async fn notify_new_listings(&self, listings: &[Listing], stats: &RunStatistics) -> Result<()> {
        if !self.settings.notify_on_new_listings || self.providers.is_empty() {
            return Ok(());
        }
        if listings.len() < self.settings.min_listings {
            debug!("{} new listings below notification threshold", listings.len());
            return Ok(());
        }
        if !self.take_budget().await {
            warn!("Daily notification limit reached, skipping new-listings summary");
            return Ok(());
        }

        for provider in &self.providers {
            if let Err(e) = provider.notify_new_listings(listings, stats).await {
                warn!("Notification provider failed to send summary: {}", e);
            }
        }
        info!("Sent summary for {} new listings", listings.len());
        Ok(())
    }

    async fn notify_error(&self, error_kind: &str, description: &str) -> Result<()> {
        if !self.settings.notify_on_errors || self.providers.is_empty() {
            return Ok(());
        }
        if !self.take_budget().await {
            warn!("Daily notification limit reached, error notification not sent");
            return Ok(());
        }

        for provider in &self.providers {
            if let Err(e) = provider.notify_error(error_kind, description).await {
                warn!("Notification provider failed to send error: {}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use crate::parser::sample_listing;

    fn settings(max_per_day: u32) -> NotificationConfig {
        NotificationConfig {
            webhook_url: None,
            notify_on_new_listings: true,
            notify_on_errors: true,
            min_listings: 1,
            max_per_day,
        }
    }

    #[tokio::test]
    async fn test_daily_limit_applies_across_kinds() {
        let mut provider = MockNotificationGateway::new();
        provider.expect_notify_new_listings().times(1).returning(|_, _| Ok(()));
        provider.expect_notify_error().times(1).returning(|_, _| Ok(()));

        let mut manager = NotificationManager::new(settings(2));
        manager.add_provider(Box::new(provider));

        let listings = vec![sample_listing("A", "immonet")];
        let stats = RunStatistics::default();

        manager.notify_new_listings(&listings, &stats).await.unwrap();
        manager.notify_error("cycle", "boom").await.unwrap();
        // budget exhausted, provider must not be called again
        manager.notify_new_listings(&listings, &stats).await.unwrap();
        manager.notify_error("cycle", "boom").await.unwrap();

        assert_eq!(manager.sent_today().await, 2);
    }

    #[tokio::test]
    async fn test_threshold_and_toggles() {
        let mut provider = MockNotificationGateway::new();
        provider.expect_notify_new_listings().times(0);
        provider.expect_notify_error().times(0);

        let mut config = settings(10);
        config.min_listings = 2;
        config.notify_on_errors = false;
        let mut manager = NotificationManager::new(config);
        manager.add_provider(Box::new(provider));

        let listings = vec![sample_listing("A", "immonet")];
        manager
            .notify_new_listings(&listings, &RunStatistics::default())
            .await
            .unwrap();
        manager.notify_error("cycle", "ignored").await.unwrap();
        assert_eq!(manager.sent_today().await, 0);
    }

    #[tokio::test]
    async fn test_provider_failure_is_swallowed() {
        let mut failing = MockNotificationGateway::new();
        failing
            .expect_notify_error()
            .times(1)
            .returning(|_, _| Err(DispatchError::Network("webhook down".into()).into()));
        let mut healthy = MockNotificationGateway::new();
        healthy.expect_notify_error().times(1).returning(|_, _| Ok(()));

        let mut manager = NotificationManager::new(settings(10));
        manager.add_provider(Box::new(failing));
        manager.add_provider(Box::new(healthy));

        assert!(manager.notify_error("cycle", "boom").await.is_ok());
    }

    #[test]
    fn test_from_config_without_webhook() {
        let manager = NotificationManager::from_config(&settings(10)).unwrap();
        assert!(manager.providers.is_empty());
    }
}
