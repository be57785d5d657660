//! Activity logging: append-only JSONL file fed by a dedicated thread.

pub mod activity;
pub mod jsonl;
