pub mod contact_form;
pub mod manager;

pub use contact_form::{ContactFormFiller, FormLayout};
pub use manager::BrowserManager;
