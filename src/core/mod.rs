//! Core types: errors, configuration, path helpers, interrupt handling.

pub mod config;
pub mod errors;
pub mod paths;
pub mod signals;
