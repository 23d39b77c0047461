use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::cycle::RunStatistics;
use crate::error::{DispatchError, Result};
use crate::notify::NotificationGateway;
use crate::parser::Listing;

// Discord caps embeds per message at 10
const MAX_LISTING_EMBEDS: usize = 9;

/// Posts Discord-compatible embed payloads to a webhook url.
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DispatchError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, webhook_url })
    }

    async fn send_webhook(&self, payload: &Value) -> Result<()> {
        for attempt in 1..=2 {
            let response = self
                .client
                .post(&self.webhook_url)
                .json(payload)
                .send()
                .await
                .map_err(|e| DispatchError::Network(format!("Failed to send webhook: {}", e)))?;

            let status = response.status();
            if status.is_success() {
                debug!("Webhook sent successfully");
                return Ok(());
            }
            if status.as_u16() == 429 && attempt == 1 {
                warn!("Webhook rate limited, waiting...");
                sleep(Duration::from_secs(2)).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Network(format!("Webhook failed with status {}: {}", status, body)).into());
        }
        Err(DispatchError::Network("Webhook still rate limited".to_string()).into())
    }
}

pub fn create_listings_payload(listings: &[Listing], stats: &RunStatistics) -> Value {
    let mut embeds: Vec<Value> = listings
        .iter()
        .take(MAX_LISTING_EMBEDS)
        .map(|listing| {
            json!({
                "title": listing.title,
                "url": listing.url,
                "color": 0x4CAF50,
                "fields": [
                    { "name": "Price", "value": format!("{:.0} €", listing.price), "inline": true },
                    { "name": "Rooms", "value": listing.room_count.to_string(), "inline": true },
                    { "name": "Size", "value": format!("{:.0} m²", listing.size), "inline": true },
                    { "name": "City", "value": listing.city, "inline": true },
                    { "name": "Source", "value": listing.source_name, "inline": true }
                ],
                "timestamp": listing.discovered_at.to_rfc3339()
            })
        })
        .collect();

    embeds.push(json!({
        "title": "Statistics",
        "color": 0x0099FF,
        "description": format!(
            "Discovered: {}\nNew: {}\nSucceeded: {}\nFailed: {}",
            stats.total_discovered, stats.total_new, stats.total_succeeded, stats.total_failed
        ),
        "footer": { "text": "rental-dispatch" }
    }));

    let extra = listings.len().saturating_sub(MAX_LISTING_EMBEDS);
    let mut content = format!(
        "{} new listings processed, {} applications succeeded and {} failed so far",
        listings.len(),
        stats.total_succeeded,
        stats.total_failed
    );
    if extra > 0 {
        content.push_str(&format!(" ({} listings not shown)", extra));
    }

    json!({ "content": content, "embeds": embeds })
}

pub fn create_error_payload(error_kind: &str, description: &str) -> Value {
    json!({
        "embeds": [{
            "title": format!("⚠️ Cycle error: {}", error_kind),
            "description": description,
            "color": 0xFF0000,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "footer": { "text": "rental-dispatch" }
        }]
    })
}

#[async_trait]
impl NotificationGateway for WebhookNotifier {
    async fn notify_new_listings(&self, listings: &[Listing], stats: &RunStatistics) -> Result<()> {
        let payload = create_listings_payload(listings, stats);
        self.send_webhook(&payload).await
    }

    async fn notify_error(&self, error_kind: &str, description: &str) -> Result<()> {
        let payload = create_error_payload(error_kind, description);
        self.send_webhook(&payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::sample_listing;

    #[test]
    fn test_listings_payload_caps_embeds() {
        let listings: Vec<Listing> = (0..12)
            .map(|i| sample_listing(&format!("L{}", i), "immonet"))
            .collect();
        let stats = RunStatistics {
            total_discovered: 20,
            total_new: 12,
            ..RunStatistics::default()
        };

        let payload = create_listings_payload(&listings, &stats);
        let embeds = payload["embeds"].as_array().unwrap();
        assert_eq!(embeds.len(), MAX_LISTING_EMBEDS + 1);
        assert!(payload["content"].as_str().unwrap().contains("3 listings not shown"));
        assert!(embeds.last().unwrap()["description"]
            .as_str()
            .unwrap()
            .contains("New: 12"));
    }

    #[test]
    fn test_listings_payload_reports_failures() {
        let listings = vec![sample_listing("A", "immonet"), sample_listing("B", "immonet")];
        let stats = RunStatistics {
            total_new: 2,
            total_failed: 2,
            ..RunStatistics::default()
        };

        let payload = create_listings_payload(&listings, &stats);
        let content = payload["content"].as_str().unwrap();
        assert!(content.contains("0 applications succeeded and 2 failed"));
        assert!(!content.contains("applications sent"));
    }

    #[test]
    fn test_error_payload() {
        let payload = create_error_payload("cycle", "database locked");
        assert_eq!(payload["embeds"][0]["description"], "database locked");
        assert!(payload["embeds"][0]["title"].as_str().unwrap().contains("cycle"));
    }
}
