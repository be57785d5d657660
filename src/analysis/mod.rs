//! Read-only analysis over a loaded graph: integrity checks, snapshot comparison, listings.

pub mod compare;
pub mod integrity;
pub mod listing;

pub use integrity::{IntegrityReport, analyze};
