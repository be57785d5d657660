//! Metadata graph: arena of drive nodes with incrementally maintained sizes and paths.

pub mod model;
pub mod node;

pub use model::{DriveGraph, LoadStats};
pub use node::{DriveNode, NodeIdx, PermissionEntry, UNKNOWN_NAME};
