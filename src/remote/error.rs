//! Classified failures reported by the remote drive service.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Coarse classification of a failed remote call.
///
/// This is what the downloader stores in a record's `error` field, so the
/// serialized names are part of the persisted stream format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The id no longer resolves (404).
    NotFound,
    /// The caller may not read or change the item (401/403).
    PermissionDenied,
    /// The service asked us to slow down (429, or 403 with a rate reason).
    RateLimited,
    /// The service failed on its side (5xx).
    Server,
    /// The request never produced a response.
    Transport,
    /// The service rejected the request shape (400, 409, …).
    InvalidRequest,
    /// Anything else, including legacy streams that only stored `true`.
    Unknown,
}

impl FailureClass {
    /// Map an HTTP-style status code to a failure class.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            404 | 410 => Self::NotFound,
            401 | 403 => Self::PermissionDenied,
            429 => Self::RateLimited,
            400..=499 => Self::InvalidRequest,
            500..=599 => Self::Server,
            _ => Self::Unknown,
        }
    }

    /// Stable snake_case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::RateLimited => "rate_limited",
            Self::Server => "server",
            Self::Transport => "transport",
            Self::InvalidRequest => "invalid_request",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed remote call: classification, optional status, and the service's message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{class}{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
pub struct RemoteError {
    /// Coarse classification used for reporting and persistence.
    pub class: FailureClass,
    /// Status code when the service returned one.
    pub status: Option<u16>,
    /// Message as reported by the service or transport.
    pub message: String,
}

impl RemoteError {
    /// Build an error without a status code.
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            status: None,
            message: message.into(),
        }
    }

    /// Build an error from an HTTP-style status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::from_status(status),
            status: Some(status),
            message: message.into(),
        }
    }

    /// Whether an operator re-run might succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.class,
            FailureClass::RateLimited | FailureClass::Server | FailureClass::Transport
        )
    }
}

/// Deserialize a record's `error` field.
///
/// Accepts the current form (a failure class string or `null`) as well as the
/// boolean flag written by older downloaders (`false` → none, `true` → unknown).
pub fn deserialize_failure<'de, D>(deserializer: D) -> Result<Option<FailureClass>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Flag(bool),
        Class(FailureClass),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None | Some(Raw::Flag(false)) => None,
        Some(Raw::Flag(true)) => Some(FailureClass::Unknown),
        Some(Raw::Class(class)) => Some(class),
    })
}
