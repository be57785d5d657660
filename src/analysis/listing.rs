//! Operator listings: sizes and checksums under a path prefix.

use crate::graph::model::DriveGraph;
use crate::graph::node::DriveNode;

/// Whether `path` is `prefix` itself or lies below it.
fn under(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    prefix.is_empty()
        || path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn matching<'a>(graph: &'a DriveGraph, prefix: &'a str) -> impl Iterator<Item = &'a DriveNode> {
    graph
        .all_nodes()
        .iter()
        .filter(move |n| !n.is_placeholder() && under(&n.path, prefix))
}

/// `(aggregate size, path)` for every node under `prefix`, largest first.
pub fn sizes(graph: &DriveGraph, prefix: &str) -> Vec<(u64, String)> {
    let mut rows: Vec<(u64, String)> = matching(graph, prefix)
        .map(|n| (n.size, n.path.clone()))
        .collect();
    rows.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    rows
}

/// `(md5, name)` for every hashed, named file under `prefix`, in path order.
pub fn checksums(graph: &DriveGraph, prefix: &str) -> Vec<(String, String)> {
    let mut rows: Vec<(&str, String, String)> = matching(graph, prefix)
        .filter_map(|n| Some((n.path.as_str(), n.md5.clone()?, n.name.clone()?)))
        .collect();
    rows.sort();
    rows.into_iter().map(|(_, md5, name)| (md5, name)).collect()
}

/// `<size>  <path>` or `<md5>  <name>` lines.
pub fn format_rows<A: std::fmt::Display, B: std::fmt::Display>(rows: &[(A, B)]) -> String {
    rows.iter().map(|(a, b)| format!("{a}  {b}\n")).collect()
}
