//! Bulk repairs applied through the remote service.
//!
//! Every remediator runs through an [`Executor`], which handles dry runs,
//! pacing between mutations, batch limits, stop requests and the per-run
//! [`RemediationReport`]. A failed mutation is logged and skipped.

pub mod dedup;
pub mod executor;
pub mod orphans;
pub mod ownership;
pub mod permissions;

pub use dedup::execute_dedup;
pub use executor::{Executor, RemediationConfig, RemediationError, RemediationReport};
pub use orphans::remove_orphans;
pub use ownership::transfer_ownership;
pub use permissions::remove_permission;
