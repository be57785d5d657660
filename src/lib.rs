#![forbid(unsafe_code)]

//! Drive Audit Helper (dah): audits and repairs large remote drive accounts.
//!
//! Pipeline:
//! 1. **Download**: page through every item, fetch each item's permissions,
//!    persist one JSON record per line with its listing position
//! 2. **Resume**: replay a partial stream, re-fetch failed records, continue
//!    the listing exactly where it stopped
//! 3. **Graph**: rebuild the multi-parent hierarchy with aggregate sizes and
//!    display paths
//! 4. **Analyze**: multi-parent items, duplicate entries, duplicate content,
//!    dedup candidates, orphans, foreign ownership, snapshot comparison
//! 5. **Remediate**: dedup, ownership transfer, permission removal and orphan
//!    removal through the remote service
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use drive_audit_helper::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use drive_audit_helper::graph::DriveGraph;
//! use drive_audit_helper::analysis::integrity::analyze;
//! ```

pub mod prelude;

pub mod analysis;
pub mod core;
pub mod download;
pub mod graph;
pub mod logger;
pub mod remediate;
pub mod remote;
