//! Activity logger thread.
//!
//! One dedicated thread owns the [`JsonlWriter`]. Download, resume and
//! remediation code send [`LogEntry`] values through a bounded crossbeam channel
//! via a cloneable [`ActivityLoggerHandle`]; `send` never blocks, and entries
//! that do not fit are counted and reported as a single warning line later.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{DahError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry};

const CHANNEL_CAPACITY: usize = 4096;

enum Message {
    Entry(Box<LogEntry>),
    Flush,
    Shutdown,
}

/// Cloneable, non-blocking sender into the logger thread.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<Message>,
    dropped: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// A handle whose entries go nowhere.
    pub fn disabled() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn send(&self, entry: LogEntry) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(Message::Entry(Box::new(entry))) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Ask the logger thread to flush its buffer.
    pub fn flush(&self) {
        let _ = self.tx.try_send(Message::Flush);
    }

    /// Entries lost to a full channel and not yet reported.
    pub fn dropped_entries(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn shutdown(&self) {
        let _ = self.tx.send(Message::Shutdown);
    }
}

/// Owner of the logger thread. Dropping it without `shutdown` detaches the thread.
pub struct ActivityLogger {
    handle: ActivityLoggerHandle,
    join: Option<thread::JoinHandle<()>>,
}

impl ActivityLogger {
    /// Spawn the logger thread writing to `config`.
    pub fn spawn(config: JsonlConfig) -> Result<Self> {
        Self::spawn_with_capacity(config, CHANNEL_CAPACITY)
    }

    pub fn spawn_with_capacity(config: JsonlConfig, capacity: usize) -> Result<Self> {
        let (tx, rx) = bounded(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let thread_dropped = Arc::clone(&dropped);

        let join = thread::Builder::new()
            .name("dah-logger".to_string())
            .spawn(move || run_logger(&rx, JsonlWriter::open(config), &thread_dropped))
            .map_err(|e| DahError::Runtime {
                details: format!("failed to spawn logger thread: {e}"),
            })?;

        Ok(Self {
            handle: ActivityLoggerHandle { tx, dropped },
            join: Some(join),
        })
    }

    pub fn handle(&self) -> ActivityLoggerHandle {
        self.handle.clone()
    }

    /// Drain pending entries, fsync, and join the thread.
    pub fn shutdown(mut self) {
        self.handle.shutdown();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn run_logger(rx: &Receiver<Message>, mut writer: JsonlWriter, dropped: &AtomicU64) {
    while let Ok(message) = rx.recv() {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            writer.write_entry(
                &LogEntry::warning(EventType::Error)
                    .component("logger")
                    .count(lost)
                    .details("activity entries dropped: channel full"),
            );
        }

        match message {
            Message::Entry(entry) => writer.write_entry(&entry),
            Message::Flush => writer.flush(),
            Message::Shutdown => break,
        }
    }
    writer.fsync();
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn entries_reach_the_file_in_order_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let logger = ActivityLogger::spawn(JsonlConfig::new(&path)).unwrap();
        let handle = logger.handle();

        for i in 0..20_u64 {
            handle.send(LogEntry::info(EventType::ItemDeleted).count(i));
        }
        logger.shutdown();

        let counts: Vec<u64> = fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["count"].as_u64().unwrap())
            .collect();
        assert_eq!(counts, (0..20).collect::<Vec<_>>());
        assert_eq!(handle.dropped_entries(), 0);
    }

    #[test]
    fn disabled_handle_accepts_and_discards() {
        let handle = ActivityLoggerHandle::disabled();
        handle.send(LogEntry::info(EventType::RunStart));
        handle.flush();
        assert_eq!(handle.dropped_entries(), 0);
    }

    #[test]
    fn clones_share_one_thread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.jsonl");
        let logger = ActivityLogger::spawn(JsonlConfig::new(&path)).unwrap();
        let a = logger.handle();
        let b = a.clone();
        let worker = thread::spawn(move || b.send(LogEntry::info(EventType::RunStart)));
        worker.join().unwrap();
        a.send(LogEntry::info(EventType::RunComplete));
        logger.shutdown();
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 2);
    }
}
