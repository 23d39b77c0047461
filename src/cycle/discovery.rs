use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{DispatchError, RecoveryStrategy, Result};
use crate::parser::Listing;
use crate::sources::{ListingSource, SourceRegistry};
use crate::storage::ApplicationStore;

#[derive(Debug, Clone, Default)]
pub struct DiscoveryOutcome {
    /// Listings with no application record, at most one per id.
    pub new_listings: Vec<Listing>,
    /// Raw count returned by the sources before any filtering.
    pub total_discovered: u64,
}

/// Fans searches out over every (source, city) pair and keeps the listings
/// the store has never seen.
pub struct DiscoveryCoordinator {
    store: Arc<dyn ApplicationStore>,
    search_timeout: Duration,
}

impl DiscoveryCoordinator {
    pub fn new(store: Arc<dyn ApplicationStore>, search_timeout: Duration) -> Self {
        Self {
            store,
            search_timeout,
        }
    }

    pub async fn discover_new(&self, sources: &SourceRegistry, cities: &[String]) -> DiscoveryOutcome {
        if sources.is_empty() || cities.is_empty() {
            debug!("Nothing to search: {} sources, {} cities", sources.len(), cities.len());
            return DiscoveryOutcome::default();
        }

        let discovered = self.search_all(sources, cities).await;
        let total_discovered = discovered.len() as u64;

        let unique = dedup_by_id(discovered);
        let mut new_listings = Vec::with_capacity(unique.len());
        for listing in unique {
            match self.store.has_applied(&listing.id).await {
                Ok(false) => new_listings.push(listing),
                Ok(true) => debug!("Already applied to {}", listing.id),
                Err(e) => warn!(listing_id = %listing.id, error = %e, "Store lookup failed, treating listing as seen"),
            }
        }

        info!(
            "Discovery finished: {} listings found, {} new",
            total_discovered,
            new_listings.len()
        );

        DiscoveryOutcome {
            new_listings,
            total_discovered,
        }
    }

    // results are concatenated in completion order
    async fn search_all(&self, sources: &SourceRegistry, cities: &[String]) -> Vec<Listing> {
        let permits = Arc::new(Semaphore::new(sources.len()));
        let mut tasks = FuturesUnordered::new();

        for (name, source) in sources {
            for city in cities {
                let source = source.clone();
                let permits = permits.clone();
                let source_name = name.clone();
                let task_city = city.clone();
                let search_timeout = self.search_timeout;

                let handle = tokio::spawn(async move {
                    search_pair(source, &source_name, &task_city, permits, search_timeout).await
                });

                let source_name = name.clone();
                let city = city.clone();
                tasks.push(async move { (source_name, city, handle.await) });
            }
        }

        let mut discovered = Vec::new();
        while let Some((source_name, city, joined)) = tasks.next().await {
            let result: Result<Vec<Listing>> = match joined {
                Ok(result) => result,
                Err(e) => Err(DispatchError::Cycle(format!("search task aborted: {}", e)).into()),
            };

            match result {
                Ok(listings) => {
                    debug!(source = %source_name, city = %city, count = listings.len(), "Search finished");
                    discovered.extend(listings);
                }
                Err(e) => match DispatchError::strategy_for(e.as_ref(), RecoveryStrategy::ContributeNothing) {
                    RecoveryStrategy::FixConfig => {
                        error!(source = %source_name, city = %city, error = %e, "Search misconfigured, contributing nothing")
                    }
                    _ => warn!(source = %source_name, city = %city, error = %e, "Search failed, contributing nothing"),
                },
            }
        }

        discovered
    }
}

async fn search_pair(
    source: Arc<dyn ListingSource>,
    source_name: &str,
    city: &str,
    permits: Arc<Semaphore>,
    search_timeout: Duration,
) -> Result<Vec<Listing>> {
    let _permit = permits
        .acquire_owned()
        .await
        .map_err(|e| DispatchError::Cycle(format!("Discovery semaphore closed: {}", e)))?;

    match timeout(search_timeout, source.search(city)).await {
        Ok(result) => result,
        Err(_) => Err(DispatchError::SourceTimeout {
            source_name: source_name.to_string(),
            city: city.to_string(),
            seconds: search_timeout.as_secs(),
        }
        .into()),
    }
}

/// Keep the first listing for each id, preserving order.
pub fn dedup_by_id(listings: Vec<Listing>) -> Vec<Listing> {
    let mut seen = HashSet::new();
    listings
        .into_iter()
        .filter(|listing| seen.insert(listing.id.clone()))
        .collect()
}
