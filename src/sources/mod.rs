pub mod immonet;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{DispatchError, Result};
use crate::parser::Listing;

pub use immonet::ImmonetSource;

/// A site that can be searched for listings and applied to.
///
/// Each variant owns its own clients and browser; variants share no state.
/// Sources apply the user's search criteria before returning listings.
#[async_trait]
pub trait ListingSource: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, city: &str) -> Result<Vec<Listing>>;

    /// Submit an application. `Ok(false)` means the site refused or the
    /// form could not be completed; `Err` means the attempt blew up.
    async fn apply(&self, listing: &Listing) -> Result<bool>;

    async fn dispose(&self) -> Result<()>;
}

/// Sources keyed by `ListingSource::name`, matched against `Listing::source_name`.
pub type SourceRegistry = HashMap<String, Arc<dyn ListingSource>>;

pub fn registry_from(sources: Vec<Arc<dyn ListingSource>>) -> SourceRegistry {
    sources
        .into_iter()
        .map(|source| (source.name().to_string(), source))
        .collect()
}

pub const KNOWN_SOURCES: &[&str] = &[immonet::SOURCE_NAME];

/// Build every source enabled in the configuration.
pub fn build_sources(config: &Config) -> Result<SourceRegistry> {
    let mut sources: Vec<Arc<dyn ListingSource>> = Vec::new();

    for name in &config.sources.enabled {
        match name.as_str() {
            immonet::SOURCE_NAME => {
                let source = ImmonetSource::new(
                    config.sources.immonet.clone(),
                    config.search.criteria(),
                    config.applicant.clone(),
                    config.browser.clone(),
                )?;
                sources.push(Arc::new(source));
            }
            other => {
                return Err(DispatchError::Config(format!("Unknown source '{}'", other)).into());
            }
        }
    }

    info!("Built {} listing sources", sources.len());
    Ok(registry_from(sources))
}

/// Dispose every source, logging failures instead of stopping early.
pub async fn dispose_all(sources: &SourceRegistry) {
    for (name, source) in sources {
        if let Err(e) = source.dispose().await {
            warn!("Failed to dispose source {}: {}", name, e);
        } else {
            info!("Disposed source {}", name);
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted source for pipeline tests.
    pub struct MockSource {
        name: String,
        listings: Mutex<HashMap<String, Vec<Listing>>>,
        failing_cities: HashSet<String>,
        search_delay: Option<Duration>,
        failing_applies: HashSet<String>,
        refused_applies: HashSet<String>,
        pub search_calls: AtomicUsize,
        pub applied: Mutex<Vec<String>>,
        pub disposed: AtomicUsize,
    }

    impl MockSource {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                listings: Mutex::new(HashMap::new()),
                failing_cities: HashSet::new(),
                search_delay: None,
                failing_applies: HashSet::new(),
                refused_applies: HashSet::new(),
                search_calls: AtomicUsize::new(0),
                applied: Mutex::new(Vec::new()),
                disposed: AtomicUsize::new(0),
            }
        }

        pub fn with_listings(self, city: &str, ids: &[&str]) -> Self {
            let listings = ids
                .iter()
                .map(|id| {
                    let mut listing = crate::parser::sample_listing(id, &self.name);
                    listing.city = city.to_string();
                    listing
                })
                .collect();
            self.listings.lock().unwrap().insert(city.to_string(), listings);
            self
        }

        pub fn failing_search(mut self, city: &str) -> Self {
            self.failing_cities.insert(city.to_string());
            self
        }

        pub fn slow_search(mut self, delay: Duration) -> Self {
            self.search_delay = Some(delay);
            self
        }

        pub fn failing_apply(mut self, id: &str) -> Self {
            self.failing_applies.insert(id.to_string());
            self
        }

        pub fn refusing_apply(mut self, id: &str) -> Self {
            self.refused_applies.insert(id.to_string());
            self
        }

        pub fn applied_ids(&self) -> Vec<String> {
            self.applied.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ListingSource for MockSource {
        fn name(&self) -> &str {
            &self.name
        }

        async fn search(&self, city: &str) -> Result<Vec<Listing>> {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.search_delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing_cities.contains(city) {
                return Err(DispatchError::Network(format!("{} unreachable", city)).into());
            }
            Ok(self.listings.lock().unwrap().get(city).cloned().unwrap_or_default())
        }

        async fn apply(&self, listing: &Listing) -> Result<bool> {
            self.applied.lock().unwrap().push(listing.id.clone());
            if self.failing_applies.contains(&listing.id) {
                return Err(DispatchError::Submission(format!("form for {} crashed", listing.id)).into());
            }
            Ok(!self.refused_applies.contains(&listing.id))
        }

        async fn dispose(&self) -> Result<()> {
            self.disposed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
