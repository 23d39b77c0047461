use crate::error::DispatchError;
use crate::parser::Listing;
use chrono::Utc;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

const DEFAULT_ROOMS: u32 = 2;
const DEFAULT_SIZE: f64 = 50.0;
const UNKNOWN: &str = "Unbekannt";

/// html parser for immonet search result pages
pub struct ImmonetListingParser {
    base_url: String,
    item_selector: Selector,
    link_selector: Selector,
    title_selector: Selector,
    price_selector: Selector,
    details_selector: Selector,
    provider_selector: Selector,
    rooms_pattern: Regex,
    size_pattern: Regex,
    number_pattern: Regex,
}

impl ImmonetListingParser {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DispatchError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            item_selector: parse_selector("div.classified-item")?,
            link_selector: parse_selector("a[href]")?,
            title_selector: parse_selector("h2, h3")?,
            price_selector: parse_selector("span.price")?,
            details_selector: parse_selector("div.details")?,
            provider_selector: parse_selector(".provider")?,
            rooms_pattern: parse_regex(r"(\d+)\s*Zimmer")?,
            size_pattern: parse_regex(r"(\d+(?:[.,]\d+)?)\s*m²")?,
            number_pattern: parse_regex(r"\d+(?:\.\d+)?")?,
        })
    }

    /// Pull every listing out of a search page. Elements that cannot be
    /// parsed are skipped, they never fail the whole page.
    pub fn parse_search_page(&self, html: &str, city: &str, source_name: &str) -> Vec<Listing> {
        let document = Html::parse_document(html);
        let mut listings = Vec::new();

        for element in document.select(&self.item_selector) {
            match self.parse_item(&element, city, source_name) {
                Some(listing) => listings.push(listing),
                None => warn!("Skipping listing element without link on {} page for {}", source_name, city),
            }
        }

        debug!("Parsed {} listings from {} page for {}", listings.len(), source_name, city);
        listings
    }

    fn parse_item(&self, element: &ElementRef, city: &str, source_name: &str) -> Option<Listing> {
        let href = element
            .select(&self.link_selector)
            .next()
            .and_then(|link| link.value().attr("href"))?;

        let url = if href.starts_with("http") {
            href.to_string()
        } else {
            format!("{}{}", self.base_url, href)
        };

        let title = element
            .select(&self.title_selector)
            .next()
            .map(|e| collapse_text(&e))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string());

        let price = element
            .select(&self.price_selector)
            .next()
            .map(|e| self.parse_price(&collapse_text(&e)))
            .unwrap_or(0.0);

        let (room_count, size) = match element.select(&self.details_selector).next() {
            Some(details) => {
                let text = collapse_text(&details);
                (self.parse_rooms(&text), self.parse_size(&text))
            }
            None => (DEFAULT_ROOMS, DEFAULT_SIZE),
        };

        let provider_name = element
            .select(&self.provider_selector)
            .next()
            .map(|e| collapse_text(&e))
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string());

        Some(Listing {
            id: extract_id_from_url(&url),
            title,
            price,
            size,
            room_count,
            city: city.to_string(),
            url,
            provider_name,
            discovered_at: Utc::now(),
            source_name: source_name.to_string(),
        })
    }

    // "1.472,50 € Kaltmiete" -> 1472.5
    pub fn parse_price(&self, text: &str) -> f64 {
        let normalized = text.replace('.', "").replace(',', ".");
        self.number_pattern
            .find(&normalized)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0)
    }

    pub fn parse_rooms(&self, text: &str) -> u32 {
        self.rooms_pattern
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(DEFAULT_ROOMS)
    }

    pub fn parse_size(&self, text: &str) -> f64 {
        self.size_pattern
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().replace(',', ".").parse().ok())
            .unwrap_or(DEFAULT_SIZE)
    }
}

/// Expose urls carry a uuid segment; fall back to the last path segment.
pub fn extract_id_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    if let Some(uuid_like) = segments
        .iter()
        .find(|s| s.len() == 36 && s.matches('-').count() == 4)
    {
        return uuid_like.to_string();
    }

    match segments.last() {
        Some(last) if !last.contains('.') && !last.ends_with(':') => last.to_string(),
        _ => Listing::id_from_url(url),
    }
}

fn collapse_text(element: &ElementRef) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_selector(css: &str) -> Result<Selector, DispatchError> {
    Selector::parse(css).map_err(|e| DispatchError::Parse(format!("Invalid selector '{}': {}", css, e)))
}

fn parse_regex(pattern: &str) -> Result<Regex, DispatchError> {
    Regex::new(pattern).map_err(|e| DispatchError::Parse(format!("Invalid pattern '{}': {}", pattern, e)))
}
