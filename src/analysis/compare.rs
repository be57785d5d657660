//! Snapshot comparison: which files have fewer copies in a newer drive snapshot.

#![allow(missing_docs)]

use std::collections::HashMap;

use serde::Serialize;

use crate::graph::model::DriveGraph;

/// A (name, size, hash) key with more copies in the old snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingCopies {
    pub name: Option<String>,
    pub size: u64,
    pub md5: Option<String>,
    pub old_count: usize,
    pub new_count: usize,
    /// Path of one old copy, for orientation.
    pub example_path: String,
}

type Key<'a> = (Option<&'a str>, u64, Option<&'a str>);

fn count<'a>(graph: &'a DriveGraph) -> HashMap<Key<'a>, (usize, &'a str)> {
    let mut counts: HashMap<Key<'a>, (usize, &'a str)> = HashMap::new();
    for node in graph.all_nodes() {
        if node.is_placeholder() || node.is_folder() {
            continue;
        }
        let key = (node.name.as_deref(), node.intrinsic_size, node.md5.as_deref());
        counts.entry(key).or_insert((0, node.path.as_str())).0 += 1;
    }
    counts
}

/// Keys present more often in `old` than in `new`, largest first.
pub fn missing_in_new(old: &DriveGraph, new: &DriveGraph) -> Vec<MissingCopies> {
    let new_counts = count(new);
    let mut missing: Vec<MissingCopies> = count(old)
        .into_iter()
        .filter_map(|((name, size, md5), (old_count, example))| {
            let new_count = new_counts.get(&(name, size, md5)).map_or(0, |(n, _)| *n);
            (old_count > new_count).then(|| MissingCopies {
                name: name.map(str::to_string),
                size,
                md5: md5.map(str::to_string),
                old_count,
                new_count,
                example_path: example.to_string(),
            })
        })
        .collect();
    missing.sort_by(|a, b| {
        b.size
            .cmp(&a.size)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.md5.cmp(&b.md5))
    });
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::record::MetadataRecord;
    use crate::remote::pager::PagePosition;

    fn rec(id: &str, name: &str, size: u64, md5: &str) -> MetadataRecord {
        MetadataRecord {
            id: id.to_string(),
            name: Some(name.to_string()),
            parents: vec!["root".to_string()],
            size: Some(size),
            md5_checksum: Some(md5.to_string()),
            trashed: false,
            mime_type: None,
            permissions: vec![],
            error: None,
            batch_info: PagePosition::default(),
        }
    }

    #[test]
    fn reports_lost_copies_largest_first() {
        let old = DriveGraph::from_records(&[
            rec("1", "a.jpg", 10, "ha"),
            rec("2", "a.jpg", 10, "ha"),
            rec("3", "big.iso", 900, "hb"),
            rec("4", "same.txt", 1, "hc"),
        ])
        .unwrap();
        let new = DriveGraph::from_records(&[
            rec("x", "a.jpg", 10, "ha"),
            rec("y", "same.txt", 1, "hc"),
            rec("z", "extra.txt", 1, "hd"),
        ])
        .unwrap();

        let missing = missing_in_new(&old, &new);
        assert_eq!(missing.len(), 2);
        assert_eq!(missing[0].name.as_deref(), Some("big.iso"));
        assert_eq!((missing[0].old_count, missing[0].new_count), (1, 0));
        assert_eq!(missing[1].name.as_deref(), Some("a.jpg"));
        assert_eq!((missing[1].old_count, missing[1].new_count), (2, 1));
    }

    #[test]
    fn identical_snapshots_report_nothing() {
        let records = [rec("1", "a", 1, "h")];
        let old = DriveGraph::from_records(&records).unwrap();
        let new = DriveGraph::from_records(&records).unwrap();
        assert!(missing_in_new(&old, &new).is_empty());
    }
}
