//! In-memory model of a multi-parented drive hierarchy.
//!
//! Nodes live in an arena indexed by [`NodeIdx`]; an id map resolves remote ids.
//! Parent and child edges are index lists, so a node listed under two parents
//! appears in both child lists and contributes its size to both subtrees.
//!
//! [`DriveGraph::ingest`] keeps two derived quantities up to date
//! incrementally:
//!
//! * `size`: intrinsic size plus the size of every child. A change is pushed
//!   up through every parent path with an explicit stack, so an ancestor
//!   reachable along two paths sees the change twice.
//! * `path`: re-rendered for the node and all its descendants, in topological
//!   order, whenever a parent link or name changes.
//!
//! [`DriveGraph::check_invariants`] recomputes both from scratch and reports
//! any disagreement.

#![allow(missing_docs)]

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::errors::{DahError, Result};
use crate::download::record::MetadataRecord;
use crate::download::stream::RecordReader;
use crate::graph::node::{DriveNode, NodeIdx, PermissionEntry};

/// Counters from loading a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub records: usize,
    /// Records whose permission fetch had failed.
    pub failed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DriveGraph {
    nodes: Vec<DriveNode>,
    index: HashMap<String, NodeIdx>,
    roots: BTreeSet<NodeIdx>,
}

impl DriveGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph by ingesting every record of a saved stream, in order.
    pub fn load_stream(path: &Path) -> Result<(Self, LoadStats)> {
        let mut graph = Self::new();
        let mut stats = LoadStats::default();
        for entry in RecordReader::open(path)? {
            let (line, record) = entry?;
            graph.ingest(&record).map_err(|e| match e {
                DahError::InvalidRecord { details, .. } => DahError::InvalidRecord { line, details },
                other => other,
            })?;
            stats.records += 1;
            stats.failed += usize::from(record.is_failed());
        }
        Ok((graph, stats))
    }

    pub fn from_records<'a, I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a MetadataRecord>,
    {
        let mut graph = Self::new();
        for record in records {
            graph.ingest(record)?;
        }
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: NodeIdx) -> &DriveNode {
        &self.nodes[idx.0]
    }

    pub fn idx_of(&self, id: &str) -> Option<NodeIdx> {
        self.index.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<&DriveNode> {
        self.idx_of(id).map(|idx| self.node(idx))
    }

    /// Every node, in creation order.
    pub fn all_nodes(&self) -> &[DriveNode] {
        &self.nodes
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIdx, &DriveNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeIdx(i), n))
    }

    pub fn roots(&self) -> impl Iterator<Item = &DriveNode> {
        self.roots.iter().map(|idx| self.node(*idx))
    }

    pub fn children(&self, idx: NodeIdx) -> impl Iterator<Item = &DriveNode> {
        self.node(idx).children.iter().map(|c| self.node(*c))
    }

    pub fn parents(&self, idx: NodeIdx) -> impl Iterator<Item = &DriveNode> {
        self.node(idx).parents.iter().map(|p| self.node(*p))
    }

    /// Existing node for `id`, or a new root placeholder.
    pub fn get_or_create(&mut self, id: &str) -> NodeIdx {
        if let Some(idx) = self.idx_of(id) {
            return idx;
        }
        let idx = NodeIdx(self.nodes.len());
        self.nodes.push(DriveNode::placeholder(id));
        self.index.insert(id.to_string(), idx);
        self.roots.insert(idx);
        idx
    }

    /// Insert or update the node described by `record`.
    ///
    /// Idempotent: ingesting the same record twice leaves the graph unchanged.
    /// The record is checked before anything is mutated, so a rejected record
    /// leaves the graph as it was.
    pub fn ingest(&mut self, record: &MetadataRecord) -> Result<NodeIdx> {
        record.validate(0)?;
        if let Some(idx) = self.idx_of(&record.id) {
            for parent in &record.parents {
                if self.idx_of(parent).is_some_and(|p| self.is_ancestor_or_self(idx, p)) {
                    return Err(DahError::GraphCycle {
                        id: record.id.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }

        let idx = self.get_or_create(&record.id);

        let new_intrinsic = record.size.unwrap_or(0);
        let delta = i128::from(new_intrinsic) - i128::from(self.nodes[idx.0].intrinsic_size);
        if delta != 0 {
            let node = &mut self.nodes[idx.0];
            node.intrinsic_size = new_intrinsic;
            node.size = apply_delta(node.size, delta);
            self.propagate(idx, delta);
        }

        let relink = self.nodes[idx.0].parent_ids != record.parents;
        if relink {
            self.relink(idx, &record.parents);
        }

        let renamed = self.nodes[idx.0].name != record.name;
        let mut permissions: Vec<PermissionEntry> =
            record.permissions.iter().map(PermissionEntry::from).collect();
        permissions.sort();

        let node = &mut self.nodes[idx.0];
        node.name.clone_from(&record.name);
        node.md5.clone_from(&record.md5_checksum);
        node.mime_type.clone_from(&record.mime_type);
        node.trashed = record.trashed;
        node.error = record.error;
        node.permissions = permissions;
        node.observed = true;

        if relink || renamed {
            self.rederive_paths(idx);
        }
        Ok(idx)
    }

    /// Whether `ancestor` is `node` or lies on some parent path above it.
    fn is_ancestor_or_self(&self, ancestor: NodeIdx, node: NodeIdx) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if current == ancestor {
                return true;
            }
            if seen.insert(current) {
                stack.extend(self.nodes[current.0].parents.iter().copied());
            }
        }
        false
    }

    /// Add `delta` to every ancestor of `from`, once per path.
    fn propagate(&mut self, from: NodeIdx, delta: i128) {
        let mut stack: Vec<NodeIdx> = self.nodes[from.0].parents.clone();
        while let Some(current) = stack.pop() {
            let node = &mut self.nodes[current.0];
            node.size = apply_delta(node.size, delta);
            stack.extend(node.parents.iter().copied());
        }
    }

    /// Replace the parent edges of `idx` with `parent_ids`, moving its
    /// aggregate size from the old ancestor chains to the new ones.
    fn relink(&mut self, idx: NodeIdx, parent_ids: &[String]) {
        let aggregate = i128::from(self.nodes[idx.0].size);

        let old_parents = std::mem::take(&mut self.nodes[idx.0].parents);
        for parent in &old_parents {
            let children = &mut self.nodes[parent.0].children;
            if let Some(pos) = children.iter().position(|c| *c == idx) {
                children.remove(pos);
            }
            let node = &mut self.nodes[parent.0];
            node.size = apply_delta(node.size, -aggregate);
            self.propagate(*parent, -aggregate);
        }

        let new_parents: Vec<NodeIdx> = parent_ids.iter().map(|p| self.get_or_create(p)).collect();
        for parent in &new_parents {
            self.nodes[parent.0].children.push(idx);
            let node = &mut self.nodes[parent.0];
            node.size = apply_delta(node.size, aggregate);
            self.propagate(*parent, aggregate);
        }

        let node = &mut self.nodes[idx.0];
        node.parents = new_parents;
        node.parent_ids = parent_ids.to_vec();
        if node.parents.is_empty() {
            self.roots.insert(idx);
        } else {
            self.roots.remove(&idx);
        }
    }

    /// Re-render `path` for `start` and every descendant, parents first.
    fn rederive_paths(&mut self, start: NodeIdx) {
        let mut affected = HashSet::new();
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            if affected.insert(current) {
                stack.extend(self.nodes[current.0].children.iter().copied());
            }
        }

        let mut pending: HashMap<NodeIdx, usize> = affected
            .iter()
            .map(|idx| {
                let inside = self.nodes[idx.0]
                    .parents
                    .iter()
                    .filter(|p| affected.contains(*p))
                    .count();
                (*idx, inside)
            })
            .collect();
        let mut ready: VecDeque<NodeIdx> = pending
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(idx, _)| *idx)
            .collect();

        while let Some(current) = ready.pop_front() {
            let path = self.render_path(current);
            self.nodes[current.0].path = path;
            for child in self.nodes[current.0].children.clone() {
                if let Some(n) = pending.get_mut(&child) {
                    *n -= 1;
                    if *n == 0 {
                        ready.push_back(child);
                    }
                }
            }
        }
    }

    fn render_path(&self, idx: NodeIdx) -> String {
        let node = &self.nodes[idx.0];
        let name = node.display_name();
        match node.parents.as_slice() {
            [] => name.to_string(),
            [parent] => format!("{}/{name}", self.nodes[parent.0].path),
            parents => {
                let joined: Vec<&str> = parents
                    .iter()
                    .map(|p| self.nodes[p.0].path.as_str())
                    .collect();
                format!("{{{}}}/{name}", joined.join(","))
            }
        }
    }

    /// Every node ordered so that parents come before children.
    fn topological_order(&self) -> Vec<NodeIdx> {
        let mut pending: Vec<usize> = self.nodes.iter().map(|n| n.parents.len()).collect();
        let mut ready: VecDeque<NodeIdx> = self
            .iter()
            .filter(|(_, n)| n.parents.is_empty())
            .map(|(idx, _)| idx)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(current) = ready.pop_front() {
            order.push(current);
            for child in &self.nodes[current.0].children {
                pending[child.0] -= 1;
                if pending[child.0] == 0 {
                    ready.push_back(*child);
                }
            }
        }
        order
    }

    /// Recompute children, sizes, paths and roots from the parent lists alone.
    pub fn rebuild_derived(&mut self) {
        for node in &mut self.nodes {
            node.children.clear();
        }
        for i in 0..self.nodes.len() {
            for parent in self.nodes[i].parents.clone() {
                self.nodes[parent.0].children.push(NodeIdx(i));
            }
        }
        let roots = self
            .iter()
            .filter(|(_, n)| n.parents.is_empty())
            .map(|(idx, _)| idx)
            .collect();
        self.roots = roots;

        let order = self.topological_order();
        for idx in order.iter().rev() {
            let children_total: u64 = self.nodes[idx.0]
                .children
                .iter()
                .map(|c| self.nodes[c.0].size)
                .sum();
            let node = &mut self.nodes[idx.0];
            node.size = node.intrinsic_size + children_total;
        }
        for idx in order {
            let path = self.render_path(idx);
            self.nodes[idx.0].path = path;
        }
    }

    /// Compare the incrementally maintained state with a full rebuild.
    pub fn check_invariants(&self) -> std::result::Result<(), Vec<String>> {
        let mut problems = Vec::new();
        let mut rebuilt = self.clone();
        rebuilt.rebuild_derived();

        if rebuilt.topological_order().len() != self.nodes.len() {
            problems.push("parent links contain a cycle".to_string());
        }
        for (idx, node) in self.iter() {
            let expected = rebuilt.node(idx);
            if node.size != expected.size {
                problems.push(format!(
                    "{}: size {} but children imply {}",
                    node.id, node.size, expected.size
                ));
            }
            if node.path != expected.path {
                problems.push(format!(
                    "{}: path {:?} but ancestors imply {:?}",
                    node.id, node.path, expected.path
                ));
            }
            if node.is_root() != self.roots.contains(&idx) {
                problems.push(format!("{}: root set disagrees with parent list", node.id));
            }
            let mut children = node.children.clone();
            let mut expected_children = expected.children.clone();
            children.sort();
            expected_children.sort();
            if children != expected_children {
                problems.push(format!("{}: child list disagrees with parent lists", node.id));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    /// SHA-256 over every node in id order; equal graphs have equal fingerprints
    /// regardless of the order their records were ingested in.
    pub fn fingerprint(&self) -> String {
        #[derive(Serialize)]
        struct Canonical<'a> {
            id: &'a str,
            name: Option<&'a str>,
            intrinsic_size: u64,
            size: u64,
            md5: Option<&'a str>,
            trashed: bool,
            error: Option<&'a str>,
            observed: bool,
            parents: &'a [String],
            permissions: &'a [PermissionEntry],
            path: &'a str,
        }

        let mut sorted: Vec<&DriveNode> = self.nodes.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut hasher = Sha256::new();
        for node in sorted {
            let canonical = Canonical {
                id: &node.id,
                name: node.name.as_deref(),
                intrinsic_size: node.intrinsic_size,
                size: node.size,
                md5: node.md5.as_deref(),
                trashed: node.trashed,
                error: node.error.map(|c| c.as_str()),
                observed: node.observed,
                parents: &node.parent_ids,
                permissions: &node.permissions,
                path: &node.path,
            };
            // Serializing plain strings and integers cannot fail.
            if let Ok(bytes) = serde_json::to_vec(&canonical) {
                hasher.update(&bytes);
            }
            hasher.update(b"\n");
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

fn apply_delta(size: u64, delta: i128) -> u64 {
    u64::try_from(i128::from(size) + delta).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::pager::PagePosition;
    use crate::remote::types::Permission;

    fn rec(id: &str, parents: &[&str], size: Option<u64>) -> MetadataRecord {
        MetadataRecord {
            id: id.to_string(),
            name: Some(id.to_string()),
            parents: parents.iter().map(|p| (*p).to_string()).collect(),
            size,
            md5_checksum: None,
            trashed: false,
            mime_type: None,
            permissions: vec![],
            error: None,
            batch_info: PagePosition::default(),
        }
    }

    fn size_of(graph: &DriveGraph, id: &str) -> u64 {
        graph.get(id).unwrap().size
    }

    #[test]
    fn placeholder_parent_is_filled_in_place() {
        let mut g = DriveGraph::new();
        g.ingest(&rec("f", &["d"], Some(10))).unwrap();
        assert_eq!(g.len(), 2);
        assert!(g.get("d").unwrap().is_placeholder());
        assert_eq!(g.get("f").unwrap().path, "<unknown>/f");

        g.ingest(&rec("d", &["root"], None)).unwrap();
        assert_eq!(g.len(), 3);
        assert_eq!(g.get("f").unwrap().path, "<unknown>/d/f");
        assert_eq!(size_of(&g, "root"), 10);
        let roots: Vec<&str> = g.roots().map(|n| n.id.as_str()).collect();
        assert_eq!(roots, ["root"]);
        g.check_invariants().unwrap();
    }

    #[test]
    fn multi_parent_receives_full_delta_on_each_parent() {
        let mut g = DriveGraph::new();
        g.ingest(&rec("p1", &[], None)).unwrap();
        g.ingest(&rec("p2", &[], None)).unwrap();
        g.ingest(&rec("x", &["p1", "p2"], Some(0))).unwrap();
        g.ingest(&rec("x", &["p1", "p2"], Some(100))).unwrap();
        assert_eq!(size_of(&g, "p1"), 100);
        assert_eq!(size_of(&g, "p2"), 100);
        assert_eq!(g.get("x").unwrap().path, "{p1,p2}/x");
        g.check_invariants().unwrap();
    }

    #[test]
    fn diamond_counts_descendant_once_per_path() {
        let mut g = DriveGraph::new();
        g.ingest(&rec("top", &[], None)).unwrap();
        g.ingest(&rec("a", &["top"], None)).unwrap();
        g.ingest(&rec("b", &["top"], None)).unwrap();
        g.ingest(&rec("leaf", &["a", "b"], Some(7))).unwrap();
        assert_eq!(size_of(&g, "top"), 14);
        g.check_invariants().unwrap();
    }

    #[test]
    fn reparenting_moves_aggregate_and_paths() {
        let mut g = DriveGraph::new();
        g.ingest(&rec("a", &[], None)).unwrap();
        g.ingest(&rec("b", &[], None)).unwrap();
        g.ingest(&rec("dir", &["a"], None)).unwrap();
        g.ingest(&rec("file", &["dir"], Some(5))).unwrap();
        assert_eq!(size_of(&g, "a"), 5);

        g.ingest(&rec("dir", &["b"], None)).unwrap();
        assert_eq!(size_of(&g, "a"), 0);
        assert_eq!(size_of(&g, "b"), 5);
        assert_eq!(g.get("file").unwrap().path, "b/dir/file");
        g.check_invariants().unwrap();
    }

    #[test]
    fn ingest_is_idempotent() {
        let mut g = DriveGraph::new();
        let records = [rec("d", &["r"], None), rec("f", &["d"], Some(3))];
        for r in &records {
            g.ingest(r).unwrap();
        }
        let before = g.fingerprint();
        for r in &records {
            g.ingest(r).unwrap();
        }
        assert_eq!(g.fingerprint(), before);
    }

    #[test]
    fn cycle_is_rejected_without_mutation() {
        let mut g = DriveGraph::new();
        g.ingest(&rec("a", &[], None)).unwrap();
        g.ingest(&rec("b", &["a"], None)).unwrap();
        let before = g.fingerprint();
        let err = g.ingest(&rec("a", &["b"], Some(9))).unwrap_err();
        assert!(matches!(err, DahError::GraphCycle { .. }));
        assert_eq!(g.fingerprint(), before);
    }

    #[test]
    fn duplicated_parent_id_over_counts() {
        let mut g = DriveGraph::new();
        g.ingest(&rec("x", &["p", "p"], Some(4))).unwrap();
        assert_eq!(size_of(&g, "p"), 8);
        g.check_invariants().unwrap();
    }

    #[test]
    fn permissions_are_sorted_triples() {
        let mut g = DriveGraph::new();
        let mut r = rec("f", &[], Some(1));
        r.permissions = vec![
            Permission {
                id: "2".to_string(),
                kind: "user".to_string(),
                role: "writer".to_string(),
                email_address: Some("b@x.org".to_string()),
            },
            Permission {
                id: "1".to_string(),
                kind: "anyone".to_string(),
                role: "reader".to_string(),
                email_address: None,
            },
        ];
        g.ingest(&r).unwrap();
        let kinds: Vec<&str> = g
            .get("f")
            .unwrap()
            .permissions
            .iter()
            .map(|p| p.kind.as_str())
            .collect();
        assert_eq!(kinds, ["anyone", "user"]);
    }
}
