//! DAH-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::remote::error::RemoteError;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, DahError>;

/// Top-level error type for Drive Audit Helper.
#[derive(Debug, Error)]
pub enum DahError {
    #[error("[DAH-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DAH-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[DAH-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DAH-2001] invalid metadata record at line {line}: {details}")]
    InvalidRecord { line: usize, details: String },

    #[error("[DAH-2002] cannot resume download: {details}")]
    ResumeInconsistent { details: String },

    #[error("[DAH-2003] linking {id} under {parent} would create a cycle")]
    GraphCycle { id: String, parent: String },

    #[error("[DAH-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[DAH-3001] remote {operation} failed: {source}")]
    Remote {
        operation: &'static str,
        #[source]
        source: RemoteError,
    },

    #[error("[DAH-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DAH-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[DAH-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl DahError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "DAH-1001",
            Self::MissingConfig { .. } => "DAH-1002",
            Self::ConfigParse { .. } => "DAH-1003",
            Self::InvalidRecord { .. } => "DAH-2001",
            Self::ResumeInconsistent { .. } => "DAH-2002",
            Self::GraphCycle { .. } => "DAH-2003",
            Self::Serialization { .. } => "DAH-2101",
            Self::Remote { .. } => "DAH-3001",
            Self::Io { .. } => "DAH-3002",
            Self::ChannelClosed { .. } => "DAH-3003",
            Self::Runtime { .. } => "DAH-3900",
        }
    }

    /// Whether an operator re-run might resolve the failure.
    ///
    /// Nothing inside the crate retries automatically; this only drives the
    /// wording of CLI diagnostics.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Remote { source, .. } => source.is_retryable(),
            Self::Io { .. } | Self::ChannelClosed { .. } | Self::Runtime { .. } => true,
            _ => false,
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for a failed remote call.
    #[must_use]
    pub const fn remote(operation: &'static str, source: RemoteError) -> Self {
        Self::Remote { operation, source }
    }
}

impl From<serde_json::Error> for DahError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for DahError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
