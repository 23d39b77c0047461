pub mod listing;
pub mod listing_parser;

pub use listing::*;
pub use listing_parser::{extract_id_from_url, ImmonetListingParser};
