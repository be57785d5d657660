//! Persisted metadata record: one line of the download stream.

use serde::{Deserialize, Deserializer, Serialize};

use crate::core::errors::{DahError, Result};
use crate::remote::error::{FailureClass, deserialize_failure};
use crate::remote::pager::PagePosition;
use crate::remote::types::{Permission, RemoteItem};

/// Full metadata of one item plus where it sat in the listing.
///
/// `error` is `Some` when the permission fetch for this item failed; such
/// records carry empty permissions and are re-fetched on resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_size")]
    pub size: Option<u64>,
    #[serde(default)]
    pub md5_checksum: Option<String>,
    #[serde(default)]
    pub trashed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default, deserialize_with = "deserialize_failure")]
    pub error: Option<FailureClass>,
    #[serde(rename = "batch_info", default)]
    pub batch_info: PagePosition,
}

impl MetadataRecord {
    /// Combine a listed item with its permission fetch outcome.
    pub fn from_item(
        item: RemoteItem,
        position: PagePosition,
        permissions: std::result::Result<Vec<Permission>, FailureClass>,
    ) -> Self {
        let (permissions, error) = match permissions {
            Ok(perms) => (perms, None),
            Err(class) => (Vec::new(), Some(class)),
        };
        Self {
            id: item.id,
            name: item.name,
            parents: item.parents,
            size: item.size,
            md5_checksum: item.md5_checksum,
            trashed: item.trashed,
            mime_type: item.mime_type,
            permissions,
            error,
            batch_info: position,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Reject records the graph cannot ingest. `line` is used for the error only.
    pub fn validate(&self, line: usize) -> Result<()> {
        let invalid = |details: String| Err(DahError::InvalidRecord { line, details });
        if self.id.trim().is_empty() {
            return invalid("empty id".to_string());
        }
        if self.parents.iter().any(|p| p.trim().is_empty()) {
            return invalid(format!("{}: empty parent id", self.id));
        }
        if self.parents.iter().any(|p| *p == self.id) {
            return invalid(format!("{}: item lists itself as a parent", self.id));
        }
        let pos = &self.batch_info;
        if pos.num_items > 0 && pos.item_index >= pos.num_items {
            return invalid(format!(
                "{}: batch_info item_index {} out of range for {} items",
                self.id, pos.item_index, pos.num_items
            ));
        }
        Ok(())
    }
}

/// Sizes are 64-bit integers that the service may encode as decimal strings.
fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid size {s:?}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> MetadataRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn reads_persisted_line_with_string_size() {
        let rec = parse(
            r#"{"id":"f1","name":"a.txt","parents":["d1"],"size":"1024",
                "md5Checksum":"abc","trashed":false,"permissions":[],
                "error":false,
                "batch_info":{"next_page_token":"t1","item_index":0,"num_items":2}}"#,
        );
        assert_eq!(rec.size, Some(1024));
        assert_eq!(rec.md5_checksum.as_deref(), Some("abc"));
        assert_eq!(rec.error, None);
        assert_eq!(rec.batch_info.next_page_token.as_deref(), Some("t1"));
    }

    #[test]
    fn folders_have_no_size() {
        let rec = parse(r#"{"id":"d1","mimeType":"application/vnd.google-apps.folder"}"#);
        assert_eq!(rec.size, None);
        assert_eq!(rec.mime_type.as_deref(), Some("application/vnd.google-apps.folder"));
    }

    #[test]
    fn garbage_size_is_rejected() {
        let err = serde_json::from_str::<MetadataRecord>(r#"{"id":"f","size":"12kb"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn written_error_uses_class_name_and_batch_info_key() {
        let item = RemoteItem {
            id: "f1".to_string(),
            name: Some("a".to_string()),
            parents: vec![],
            size: Some(1),
            md5_checksum: None,
            trashed: false,
            mime_type: None,
        };
        let rec = MetadataRecord::from_item(
            item,
            PagePosition::default(),
            Err(FailureClass::RateLimited),
        );
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["error"], "rate_limited");
        assert!(json.get("batch_info").is_some());
        assert!(json.get("mimeType").is_none());
        assert!(rec.is_failed());
        assert!(rec.permissions.is_empty());
    }

    #[test]
    fn validation_rejects_self_parent_and_bad_index() {
        let mut rec = parse(r#"{"id":"x","parents":["x"]}"#);
        let err = rec.validate(7).unwrap_err();
        assert!(err.to_string().contains("line 7"));

        rec.parents.clear();
        rec.batch_info = PagePosition {
            next_page_token: None,
            item_index: 3,
            num_items: 3,
        };
        assert!(rec.validate(1).is_err());

        rec.batch_info.item_index = 2;
        assert!(rec.validate(1).is_ok());
        assert!(parse(r#"{"id":" "}"#).validate(1).is_err());
    }
}
