use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::browser::{BrowserManager, ContactFormFiller, FormLayout};
use crate::config::{ApplicantProfile, BrowserSettings, ImmonetSettings};
use crate::error::{DispatchError, Result};
use crate::parser::{ImmonetListingParser, Listing, SearchCriteria};
use crate::sources::ListingSource;

pub const SOURCE_NAME: &str = "immonet";

pub struct ImmonetSource {
    client: Client,
    settings: ImmonetSettings,
    parser: ImmonetListingParser,
    criteria: SearchCriteria,
    form: ContactFormFiller,
    browser_settings: BrowserSettings,
    // launched on the first application, not at startup
    browser: Mutex<Option<Arc<BrowserManager>>>,
}

impl ImmonetSource {
    pub fn new(
        settings: ImmonetSettings,
        criteria: SearchCriteria,
        applicant: ApplicantProfile,
        browser_settings: BrowserSettings,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(concat!("rental-dispatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DispatchError::Network(format!("Failed to create HTTP client: {}", e)))?;

        let parser = ImmonetListingParser::new(settings.base_url.clone())?;
        let form = ContactFormFiller::new(applicant, FormLayout::immonet(), settings.page_settle);

        Ok(Self {
            client,
            settings,
            parser,
            criteria,
            form,
            browser_settings,
            browser: Mutex::new(None),
        })
    }

    fn location_id(&self, city: &str) -> Result<&str> {
        self.settings
            .location_ids
            .get(city)
            .map(String::as_str)
            .ok_or_else(|| DispatchError::Config(format!("No immonet location id configured for {}", city)).into())
    }

    async fn fetch_search_page(&self, city: &str) -> Result<String> {
        let url = format!("{}{}", self.settings.base_url.trim_end_matches('/'), self.settings.search_path);
        let location = self.location_id(city)?;

        let response = self
            .client
            .get(&url)
            .query(&[
                ("distributionTypes", "Rent"),
                ("estateTypes", "House,Apartment"),
                ("locations", location),
                ("order", "Default"),
            ])
            .send()
            .await
            .map_err(DispatchError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Network(format!("immonet search for {} returned {}", city, status)).into());
        }

        Ok(response.text().await.map_err(DispatchError::from)?)
    }

    async fn browser(&self) -> Result<Arc<BrowserManager>> {
        let mut slot = self.browser.lock().await;
        if let Some(browser) = slot.as_ref() {
            return Ok(browser.clone());
        }
        let browser = Arc::new(BrowserManager::launch(&self.browser_settings, SOURCE_NAME).await?);
        *slot = Some(browser.clone());
        Ok(browser)
    }
}

#[async_trait]
impl ListingSource for ImmonetSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn search(&self, city: &str) -> Result<Vec<Listing>> {
        let html = self.fetch_search_page(city).await?;
        let parsed = self.parser.parse_search_page(&html, city, SOURCE_NAME);
        let total = parsed.len();

        let matching: Vec<Listing> = parsed
            .into_iter()
            .filter(|listing| self.criteria.matches(listing))
            .collect();

        info!("immonet - {}: {} listings, {} within criteria", city, total, matching.len());
        Ok(matching)
    }

    async fn apply(&self, listing: &Listing) -> Result<bool> {
        let browser = self.browser().await?;
        let page = browser.open_page(&listing.url).await?;

        let outcome = self.form.submit(&page).await;

        if let Err(e) = page.close().await {
            debug!("Failed to close page for {}: {}", listing.id, e);
        }

        match outcome {
            Ok(true) => Ok(true),
            Ok(false) => {
                warn!("immonet contact form incomplete for {}", listing.url);
                Ok(false)
            }
            Err(e) => Err(DispatchError::Submission(format!("{}: {}", listing.url, e)).into()),
        }
    }

    async fn dispose(&self) -> Result<()> {
        if let Some(browser) = self.browser.lock().await.take() {
            browser.shutdown().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> ImmonetSource {
        ImmonetSource::new(
            ImmonetSettings::default(),
            SearchCriteria::default(),
            ApplicantProfile::default(),
            BrowserSettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_location_lookup() {
        let source = source();
        assert_eq!(source.location_id("Berlin").unwrap(), "AD08DE8634");
        assert!(source.location_id("Atlantis").is_err());
    }

    #[tokio::test]
    async fn test_search_unknown_city_fails_without_network() {
        let source = source();
        assert!(source.search("Atlantis").await.is_err());
    }

    #[tokio::test]
    async fn test_dispose_without_browser() {
        let source = source();
        assert!(source.dispose().await.is_ok());
        assert_eq!(source.name(), SOURCE_NAME);
    }
}
