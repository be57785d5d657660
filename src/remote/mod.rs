//! Remote drive boundary: service trait, wire shapes, pagination, offline backend.

pub mod error;
pub mod fixture;
pub mod pager;
pub mod query;
pub mod service;
pub mod types;

pub use error::{FailureClass, RemoteError};
pub use service::{DriveService, RemoteResult};
