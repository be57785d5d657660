//! Request and response shapes exchanged with the remote drive service.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

/// Permission role that designates the owner of an item.
pub const ROLE_OWNER: &str = "owner";

/// Principal type for an individual account.
pub const PRINCIPAL_USER: &str = "user";

/// Attributes of one remote file or folder as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteItem {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub md5_checksum: Option<String>,
    #[serde(default)]
    pub trashed: bool,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl RemoteItem {
    /// Folder mime type used by the service.
    pub const FOLDER_MIME_TYPE: &'static str = "application/vnd.google-apps.folder";

    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(Self::FOLDER_MIME_TYPE)
    }
}

/// One permission entry on a remote item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub id: String,
    /// Principal type: `user`, `group`, `domain` or `anyone`.
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    #[serde(default)]
    pub email_address: Option<String>,
}

impl Permission {
    /// Whether this entry grants `role` to the individual account `email`.
    pub fn grants(&self, role: &str, email: &str) -> bool {
        self.role == role && self.is_user(email)
    }

    /// Whether this entry is a `user` permission for `email`.
    pub fn is_user(&self, email: &str) -> bool {
        self.kind == PRINCIPAL_USER
            && self
                .email_address
                .as_deref()
                .is_some_and(|addr| addr.eq_ignore_ascii_case(email))
    }
}

/// Body of a permission-create call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPermission {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub email_address: String,
}

impl NewPermission {
    /// A `user` permission granting `role` to `email`.
    pub fn user(role: &str, email: &str) -> Self {
        Self {
            kind: PRINCIPAL_USER.to_string(),
            role: role.to_string(),
            email_address: email.to_string(),
        }
    }
}

/// Parameters of a paged listing call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListRequest {
    pub page_size: u32,
    pub page_token: Option<String>,
    /// Optional service-side filter expression.
    pub query: Option<String>,
}

impl ListRequest {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            page_token: None,
            query: None,
        }
    }

    #[must_use]
    pub fn with_page_token(mut self, page_token: Option<String>) -> Self {
        self.page_token = page_token;
        self
    }

    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Derive the request for the page after `page`, or `None` on the last page.
    pub fn next_after<T>(&self, page: &Page<T>) -> Option<Self> {
        page.next_page_token.as_ref().map(|token| Self {
            page_size: self.page_size,
            page_token: Some(token.clone()),
            query: self.query.clone(),
        })
    }
}

/// One page of a listing response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_page_token: Option<String>) -> Self {
        Self {
            items,
            next_page_token,
        }
    }
}
