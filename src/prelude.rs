//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use drive_audit_helper::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{DahError, Result};
pub use crate::core::signals::StopSignal;

// Remote
pub use crate::remote::fixture::FixtureDrive;
pub use crate::remote::pager::PagePosition;
pub use crate::remote::{DriveService, FailureClass, RemoteError};

// Download
pub use crate::download::{
    DownloadReport, DownloaderConfig, MetadataDownloader, MetadataRecord, ResumePlan, Resumer,
};

// Graph and analysis
pub use crate::analysis::integrity::{IntegrityReport, analyze};
pub use crate::graph::{DriveGraph, DriveNode, NodeIdx};

// Remediation
pub use crate::remediate::{Executor, RemediationConfig, RemediationReport};

// Logging
pub use crate::logger::activity::{ActivityLogger, ActivityLoggerHandle};
