//! Graph nodes.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

use crate::remote::error::FailureClass;
use crate::remote::types::{PRINCIPAL_USER, Permission, ROLE_OWNER};

/// Rendered in place of a name that has not been observed yet.
pub const UNKNOWN_NAME: &str = "<unknown>";

/// Position of a node in the graph arena. Stable for the life of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeIdx(pub(crate) usize);

impl NodeIdx {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A (principal type, role, principal identity) triple.
///
/// Field order gives the sort order used when comparing permission sets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub kind: String,
    pub role: String,
    pub principal: Option<String>,
}

impl PermissionEntry {
    pub fn is_user(&self, email: &str) -> bool {
        self.kind == PRINCIPAL_USER
            && self
                .principal
                .as_deref()
                .is_some_and(|p| p.eq_ignore_ascii_case(email))
    }

    pub fn is_owner(&self, email: &str) -> bool {
        self.role == ROLE_OWNER && self.is_user(email)
    }
}

impl From<&Permission> for PermissionEntry {
    fn from(p: &Permission) -> Self {
        Self {
            kind: p.kind.clone(),
            role: p.role.clone(),
            principal: p.email_address.clone(),
        }
    }
}

/// One file or folder.
///
/// A node first referenced as someone's parent is a placeholder: a root with
/// no name and zero size, filled in when its own record arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveNode {
    pub id: String,
    /// `None` until observed.
    pub name: Option<String>,
    /// Bytes of this item alone.
    pub intrinsic_size: u64,
    /// Intrinsic size plus the aggregate of every child, once per path.
    pub size: u64,
    pub md5: Option<String>,
    pub mime_type: Option<String>,
    pub trashed: bool,
    pub error: Option<FailureClass>,
    /// Sorted; compared as a set.
    pub permissions: Vec<PermissionEntry>,
    pub path: String,
    pub(crate) observed: bool,
    pub(crate) parent_ids: Vec<String>,
    pub(crate) parents: Vec<NodeIdx>,
    pub(crate) children: Vec<NodeIdx>,
}

impl DriveNode {
    pub(crate) fn placeholder(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            intrinsic_size: 0,
            size: 0,
            md5: None,
            mime_type: None,
            trashed: false,
            error: None,
            permissions: Vec::new(),
            path: UNKNOWN_NAME.to_string(),
            observed: false,
            parent_ids: Vec::new(),
            parents: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_NAME)
    }

    pub fn parent_ids(&self) -> &[String] {
        &self.parent_ids
    }

    pub fn parents(&self) -> &[NodeIdx] {
        &self.parents
    }

    pub fn children(&self) -> &[NodeIdx] {
        &self.children
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Referenced but never described by a record.
    pub fn is_placeholder(&self) -> bool {
        !self.observed
    }

    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(crate::remote::types::RemoteItem::FOLDER_MIME_TYPE)
    }

    pub fn owned_by(&self, email: &str) -> bool {
        self.permissions.iter().any(|p| p.is_owner(email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_renders_unknown_name() {
        let node = DriveNode::placeholder("root");
        assert_eq!(node.display_name(), UNKNOWN_NAME);
        assert_eq!(node.path, UNKNOWN_NAME);
        assert!(node.is_root());
        assert!(node.is_placeholder());
    }

    #[test]
    fn empty_name_is_not_unknown() {
        let mut node = DriveNode::placeholder("x");
        node.name = Some(String::new());
        assert_eq!(node.display_name(), "");
    }

    #[test]
    fn owner_check_needs_user_principal() {
        let entry = PermissionEntry {
            kind: "user".to_string(),
            role: "owner".to_string(),
            principal: Some("Me@Example.org".to_string()),
        };
        assert!(entry.is_owner("me@example.org"));
        let group = PermissionEntry {
            kind: "group".to_string(),
            ..entry
        };
        assert!(!group.is_owner("me@example.org"));
    }
}
