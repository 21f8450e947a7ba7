//! Actix-web middleware shared across the Chronofact HTTP surface.

pub mod cors;
pub mod logging;

pub use cors::*;
pub use logging::*;
