//! URL handling module for Carsweep
//!
//! Detail links are deduplicated by their normalized form, and relative links
//! found on listing pages are resolved against the page they came from.

mod normalize;

pub use normalize::{normalize_url, resolve_link};
