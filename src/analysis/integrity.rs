//! Read-only anomaly detection over a fully ingested graph.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::graph::model::DriveGraph;
use crate::graph::node::{DriveNode, NodeIdx, PermissionEntry};

/// A node listed under more than one parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MultiParent {
    pub id: String,
    pub path: String,
    pub parent_ids: Vec<String>,
}

/// Several children of one folder sharing a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateEntry {
    pub parent_id: String,
    /// `None` when the children have no observed name.
    pub name: Option<String>,
    /// Path of the first offending child.
    pub path: String,
    pub ids: Vec<String>,
}

/// Items with identical content hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateContent {
    pub md5: String,
    /// Intrinsic size of the first member.
    pub size: u64,
    pub ids: Vec<String>,
    pub paths: Vec<String>,
}

/// Items indistinguishable by path, parents, size, hash and permissions,
/// owned by the configured account. All but one may be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DedupCandidate {
    pub path: String,
    pub parent_ids: Vec<String>,
    pub size: u64,
    pub md5: Option<String>,
    /// Sorted member ids.
    pub ids: Vec<String>,
}

/// An observed item without any parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Orphan {
    pub id: String,
    pub path: String,
    pub size: u64,
    pub permissions: Vec<PermissionEntry>,
}

/// An observed item the configured account does not own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignOwned {
    pub id: String,
    pub path: String,
    pub owners: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub nodes: usize,
    pub placeholders: usize,
    pub failed_records: usize,
    pub multi_parent: Vec<MultiParent>,
    pub duplicate_entries: Vec<DuplicateEntry>,
    pub duplicate_content: Vec<DuplicateContent>,
    pub dedup_candidates: Vec<DedupCandidate>,
    pub orphans: Vec<Orphan>,
    pub foreign_owned: Vec<ForeignOwned>,
}

impl IntegrityReport {
    pub fn anomaly_count(&self) -> usize {
        self.multi_parent.len()
            + self.duplicate_entries.len()
            + self.duplicate_content.len()
            + self.dedup_candidates.len()
            + self.orphans.len()
            + self.foreign_owned.len()
    }
}

/// Run every check. Ownership-gated checks are empty without an account.
pub fn analyze(graph: &DriveGraph, account_email: Option<&str>) -> IntegrityReport {
    let nodes = graph.all_nodes();
    IntegrityReport {
        nodes: nodes.len(),
        placeholders: nodes.iter().filter(|n| n.is_placeholder()).count(),
        failed_records: nodes.iter().filter(|n| n.error.is_some()).count(),
        multi_parent: multi_parent(graph),
        duplicate_entries: duplicate_entries(graph),
        duplicate_content: duplicate_content(graph),
        dedup_candidates: account_email.map_or_else(Vec::new, |email| dedup_candidates(graph, email)),
        orphans: orphans(graph),
        foreign_owned: account_email.map_or_else(Vec::new, |email| foreign_owned(graph, email)),
    }
}

pub fn multi_parent(graph: &DriveGraph) -> Vec<MultiParent> {
    graph
        .all_nodes()
        .iter()
        .filter(|n| n.parents().len() > 1)
        .map(|n| MultiParent {
            id: n.id.clone(),
            path: n.path.clone(),
            parent_ids: n.parent_ids().to_vec(),
        })
        .collect()
}

pub fn duplicate_entries(graph: &DriveGraph) -> Vec<DuplicateEntry> {
    let mut found = Vec::new();
    for (idx, parent) in graph.iter() {
        let mut by_name: BTreeMap<Option<&str>, Vec<NodeIdx>> = BTreeMap::new();
        let mut seen = BTreeSet::new();
        for child in parent.children() {
            if seen.insert(*child) {
                by_name
                    .entry(graph.node(*child).name.as_deref())
                    .or_default()
                    .push(*child);
            }
        }
        for (name, members) in by_name {
            if members.len() < 2 {
                continue;
            }
            let first = graph.node(members[0]);
            found.push(DuplicateEntry {
                parent_id: graph.node(idx).id.clone(),
                name: name.map(str::to_string),
                path: first.path.clone(),
                ids: members.iter().map(|m| graph.node(*m).id.clone()).collect(),
            });
        }
    }
    found
}

pub fn duplicate_content(graph: &DriveGraph) -> Vec<DuplicateContent> {
    let mut by_hash: BTreeMap<&str, Vec<&DriveNode>> = BTreeMap::new();
    for node in graph.all_nodes() {
        if let Some(md5) = node.md5.as_deref() {
            by_hash.entry(md5).or_default().push(node);
        }
    }

    let mut groups: Vec<DuplicateContent> = by_hash
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(md5, mut members)| {
            members.sort_by(|a, b| a.id.cmp(&b.id));
            DuplicateContent {
                md5: md5.to_string(),
                size: members[0].intrinsic_size,
                ids: members.iter().map(|n| n.id.clone()).collect(),
                paths: members.iter().map(|n| n.path.clone()).collect(),
            }
        })
        .collect();
    groups.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.md5.cmp(&b.md5)));
    groups
}

type DedupKey<'a> = (
    &'a str,
    Vec<&'a str>,
    u64,
    Option<&'a str>,
    &'a [PermissionEntry],
);

/// Groups of interchangeable files owned by `account_email`.
///
/// Placeholders and folders never qualify: deleting a folder takes its
/// subtree with it.
pub fn dedup_candidates(graph: &DriveGraph, account_email: &str) -> Vec<DedupCandidate> {
    let mut groups: BTreeMap<DedupKey<'_>, Vec<&DriveNode>> = BTreeMap::new();
    for node in graph.all_nodes() {
        if node.is_placeholder() || node.is_folder() {
            continue;
        }
        let mut parents: Vec<&str> = node.parent_ids().iter().map(String::as_str).collect();
        parents.sort_unstable();
        let key = (
            node.path.as_str(),
            parents,
            node.size,
            node.md5.as_deref(),
            node.permissions.as_slice(),
        );
        groups.entry(key).or_default().push(node);
    }

    groups
        .into_iter()
        .filter(|(key, members)| members.len() > 1 && key.4.iter().any(|p| p.is_owner(account_email)))
        .map(|((path, parents, size, md5, _), members)| {
            let mut ids: Vec<String> = members.iter().map(|n| n.id.clone()).collect();
            ids.sort();
            DedupCandidate {
                path: path.to_string(),
                parent_ids: parents.into_iter().map(str::to_string).collect(),
                size,
                md5: md5.map(str::to_string),
                ids,
            }
        })
        .collect()
}

/// Observed nodes without parents. Placeholders (such as the account root,
/// which is only ever referenced) are not orphans.
pub fn orphans(graph: &DriveGraph) -> Vec<Orphan> {
    graph
        .roots()
        .filter(|n| !n.is_placeholder())
        .map(|n| Orphan {
            id: n.id.clone(),
            path: n.path.clone(),
            size: n.size,
            permissions: n.permissions.clone(),
        })
        .collect()
}

/// Observed nodes with permissions but no `owner` entry for `account_email`.
///
/// Nodes whose permission fetch failed are skipped; their permissions are unknown.
pub fn foreign_owned(graph: &DriveGraph, account_email: &str) -> Vec<ForeignOwned> {
    graph
        .all_nodes()
        .iter()
        .filter(|n| !n.is_placeholder() && n.error.is_none() && !n.permissions.is_empty())
        .filter(|n| !n.owned_by(account_email))
        .map(|n| ForeignOwned {
            id: n.id.clone(),
            path: n.path.clone(),
            owners: n
                .permissions
                .iter()
                .filter(|p| p.role == crate::remote::types::ROLE_OWNER)
                .filter_map(|p| p.principal.clone())
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::record::MetadataRecord;
    use crate::remote::pager::PagePosition;
    use crate::remote::types::Permission;

    const ME: &str = "me@example.org";

    fn owner(email: &str) -> Permission {
        Permission {
            id: format!("perm-{email}"),
            kind: "user".to_string(),
            role: "owner".to_string(),
            email_address: Some(email.to_string()),
        }
    }

    fn rec(id: &str, name: &str, parents: &[&str], size: u64, md5: Option<&str>) -> MetadataRecord {
        MetadataRecord {
            id: id.to_string(),
            name: Some(name.to_string()),
            parents: parents.iter().map(|p| (*p).to_string()).collect(),
            size: Some(size),
            md5_checksum: md5.map(str::to_string),
            trashed: false,
            mime_type: None,
            permissions: vec![owner(ME)],
            error: None,
            batch_info: PagePosition::default(),
        }
    }

    fn graph(records: &[MetadataRecord]) -> DriveGraph {
        DriveGraph::from_records(records).unwrap()
    }

    #[test]
    fn duplicate_content_reports_only_shared_hashes() {
        let g = graph(&[
            rec("A", "a", &["R"], 5, Some("h1")),
            rec("B", "b", &["R"], 5, Some("h1")),
            rec("C", "c", &["R"], 5, Some("h2")),
            rec("D", "d", &["R"], 5, None),
        ]);
        let groups = duplicate_content(&g);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].ids, ["A", "B"]);
    }

    #[test]
    fn duplicate_entries_group_by_name_per_parent() {
        let mut unnamed = rec("N1", "x", &["R"], 1, None);
        unnamed.name = None;
        let mut unnamed2 = unnamed.clone();
        unnamed2.id = "N2".to_string();
        let g = graph(&[
            rec("A", "same", &["R"], 1, None),
            rec("B", "same", &["R"], 2, None),
            rec("C", "same", &["S"], 1, None),
            unnamed,
            unnamed2,
        ]);
        let dups = duplicate_entries(&g);
        assert_eq!(dups.len(), 2);
        let named = dups.iter().find(|d| d.name.as_deref() == Some("same")).unwrap();
        assert_eq!(named.ids, ["A", "B"]);
        assert_eq!(named.path, "<unknown>/same");
        assert!(dups.iter().any(|d| d.name.is_none() && d.ids.len() == 2));
    }

    #[test]
    fn multi_parent_lists_parent_ids() {
        let g = graph(&[rec("X", "x", &["P", "Q"], 1, None)]);
        let found = multi_parent(&g);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].parent_ids, ["P", "Q"]);
    }

    #[test]
    fn dedup_requires_owner_permission_for_account() {
        let records = [
            rec("R", "root", &[], 0, None),
            rec("F", "folder", &["R"], 0, None),
            rec("X1", "x.bin", &["F"], 50, Some("h")),
            rec("X2", "x.bin", &["F"], 50, Some("h")),
        ];
        let g = graph(&records);
        let groups = dedup_candidates(&g, ME);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].ids, ["X1", "X2"]);
        assert_eq!(groups[0].path, "root/folder/x.bin");

        assert!(dedup_candidates(&g, "someone@else.org").is_empty());
    }

    #[test]
    fn dedup_splits_on_differing_permissions() {
        let mut x2 = rec("X2", "x.bin", &["F"], 50, Some("h"));
        x2.permissions.push(Permission {
            id: "p2".to_string(),
            kind: "anyone".to_string(),
            role: "reader".to_string(),
            email_address: None,
        });
        let g = graph(&[rec("X1", "x.bin", &["F"], 50, Some("h")), x2]);
        assert!(dedup_candidates(&g, ME).is_empty());
    }

    #[test]
    fn orphans_exclude_placeholders() {
        let g = graph(&[
            rec("lost", "lost.txt", &[], 3, None),
            rec("kept", "kept.txt", &["root"], 3, None),
        ]);
        let found = orphans(&g);
        let ids: Vec<&str> = found.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, ["lost"]);
    }

    #[test]
    fn analyze_gates_ownership_checks_on_account() {
        let mut shared = rec("S", "s", &["R"], 1, None);
        shared.permissions = vec![owner("other@example.org")];
        let g = graph(&[shared]);
        assert!(analyze(&g, None).foreign_owned.is_empty());
        let report = analyze(&g, Some(ME));
        assert_eq!(report.foreign_owned.len(), 1);
        assert_eq!(report.foreign_owned[0].owners, ["other@example.org"]);
        assert_eq!(report.placeholders, 1);
    }
}
