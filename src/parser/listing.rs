use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::hash::{Hash, Hasher};

/// One rental offer as scraped from a source.
///
/// Identity is the `id` alone: two listings with the same id are the same
/// listing even if price or title changed between polls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub price: f64,
    pub size: f64,
    pub room_count: u32,
    pub city: String,
    pub url: String,
    pub provider_name: String,
    pub discovered_at: DateTime<Utc>,
    pub source_name: String,
}

impl PartialEq for Listing {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Listing {}

impl Hash for Listing {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Listing {
    // derive a stable id from the url when the site exposes nothing better
    pub fn id_from_url(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.trim_end_matches('/').as_bytes());
        format!("{:x}", hasher.finalize())[..16].to_string()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{} | {:.0} EUR | {} rooms | {:.0} m² | {} ({})",
            self.title, self.price, self.room_count, self.size, self.city, self.source_name
        )
    }
}

/// User criteria every source applies before returning listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchCriteria {
    pub max_price: f64,
    pub min_rooms: u32,
    pub max_rooms: u32,
}

impl Default for SearchCriteria {
    fn default() -> Self {
        Self {
            max_price: 2000.0,
            min_rooms: 1,
            max_rooms: 5,
        }
    }
}

impl SearchCriteria {
    pub fn matches(&self, listing: &Listing) -> bool {
        if listing.price > self.max_price {
            return false;
        }
        listing.room_count >= self.min_rooms && listing.room_count <= self.max_rooms
    }
}

#[cfg(test)]
pub(crate) fn sample_listing(id: &str, source_name: &str) -> Listing {
    Listing {
        id: id.to_string(),
        title: format!("Wohnung {}", id),
        price: 1000.0,
        size: 55.0,
        room_count: 2,
        city: "Berlin".to_string(),
        url: format!("https://example.com/expose/{}", id),
        provider_name: "Test-Anbieter".to_string(),
        discovered_at: Utc::now(),
        source_name: source_name.to_string(),
    }
}
