//! Append-only JSONL activity log.
//!
//! Every line is one self-contained JSON object describing something the tool
//! did to, or learned about, the remote drive: a run starting, a record whose
//! permission fetch failed, a resume plan, an anomaly, a permission changed or
//! an item deleted. Lines are rendered in memory and written with a single
//! `write_all` so a concurrent `tail -f` never sees half a line.
//!
//! When the primary file cannot be written the writer degrades: fallback path,
//! then stderr with a `[DAH-JSONL]` prefix, then silent discard. A logging
//! failure never aborts a download or remediation run.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::errors::{DahError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStart,
    RunComplete,
    RunInterrupted,
    RecordFailed,
    RecordRefetched,
    ResumePlanned,
    AnomalyFound,
    PermissionUpdated,
    PermissionCreated,
    PermissionRemoved,
    ItemDeleted,
    RemediationFailed,
    GroupAborted,
    Error,
}

/// One activity log line. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp with millisecond precision.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Name of the command or component that produced the entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Rendered graph path of the item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// `DAH-NNNN` code, or a remote failure class.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// New entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            event,
            severity,
            component: None,
            item_id: None,
            name: None,
            path: None,
            size: None,
            page_token: None,
            item_index: None,
            count: None,
            duration_ms: None,
            dry_run: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    pub fn info(event: EventType) -> Self {
        Self::new(event, Severity::Info)
    }

    pub fn warning(event: EventType) -> Self {
        Self::new(event, Severity::Warning)
    }

    #[must_use]
    pub fn component(mut self, component: &str) -> Self {
        self.component = Some(component.to_string());
        self
    }

    #[must_use]
    pub fn item(mut self, id: &str, name: Option<&str>) -> Self {
        self.item_id = Some(id.to_string());
        self.name = name.map(str::to_string);
        self
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn position(mut self, page_token: Option<&str>, item_index: usize) -> Self {
        self.page_token = page_token.map(str::to_string);
        self.item_index = Some(item_index);
        self
    }

    #[must_use]
    pub fn count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    #[must_use]
    pub fn duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = Some(dry_run);
        self
    }

    #[must_use]
    pub fn ok(mut self, ok: bool) -> Self {
        self.ok = Some(ok);
        self
    }

    #[must_use]
    pub fn error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.ok = Some(false);
        self.error_code = Some(code.into());
        self.error_message = Some(message.into());
        self
    }

    #[must_use]
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Where lines are currently going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Primary,
    Fallback,
    Stderr,
    Discard,
}

impl SinkState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
            Self::Stderr => "stderr",
            Self::Discard => "discard",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the current file would grow past this many bytes.
    pub max_size_bytes: u64,
    /// Rotated generations kept as `<path>.1` … `<path>.N`.
    pub max_rotated_files: u32,
    /// Minimum interval between forced `fsync` calls.
    pub fsync_interval: Duration,
}

impl JsonlConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fallback_path: None,
            max_size_bytes: 32 * 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval: Duration::from_secs(5),
        }
    }
}

/// Append-only JSONL writer with size-based rotation and a degradation chain.
pub struct JsonlWriter {
    config: JsonlConfig,
    file: Option<BufWriter<File>>,
    state: SinkState,
    bytes_written: u64,
    lines_written: u64,
    last_fsync: Instant,
}

impl JsonlWriter {
    /// Open the primary path, degrading immediately if it is unusable.
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            file: None,
            state: SinkState::Discard,
            bytes_written: 0,
            lines_written: 0,
            last_fsync: Instant::now(),
        };
        match open_append(&writer.config.path) {
            Ok((file, size)) => writer.attach(file, size, SinkState::Primary),
            Err(_) => writer.fall_back(),
        }
        writer
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(json) => self.write_line(&format!("{json}\n")),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[DAH-JSONL] serialize error: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
    }

    pub fn fsync(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
            let _ = file.get_ref().sync_data();
        }
        self.last_fsync = Instant::now();
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    /// Return to the primary path if it has become writable again.
    pub fn try_recover(&mut self) {
        if self.state == SinkState::Primary {
            return;
        }
        if let Ok((file, size)) = open_append(&self.config.path) {
            self.attach(file, size, SinkState::Primary);
            let _ = writeln!(
                io::stderr(),
                "[DAH-JSONL] recovered to primary path: {}",
                self.config.path.display()
            );
        }
    }

    fn attach(&mut self, file: File, size: u64, state: SinkState) {
        self.file = Some(BufWriter::with_capacity(32 * 1024, file));
        self.bytes_written = size;
        self.state = state;
    }

    fn fall_back(&mut self) {
        self.file = None;
        let opened = self
            .config
            .fallback_path
            .as_deref()
            .and_then(|fallback| open_append(fallback).ok().map(|f| (fallback.to_path_buf(), f)));
        match opened {
            Some((fallback, (file, size))) => {
                let _ = writeln!(
                    io::stderr(),
                    "[DAH-JSONL] primary log unavailable, using fallback: {}",
                    fallback.display()
                );
                self.attach(file, size, SinkState::Fallback);
            }
            None => {
                let _ = writeln!(
                    io::stderr(),
                    "[DAH-JSONL] no writable log file, writing activity to stderr"
                );
                self.state = SinkState::Stderr;
            }
        }
    }

    fn degrade(&mut self) {
        match self.state {
            SinkState::Primary => self.fall_back(),
            SinkState::Fallback => {
                self.file = None;
                self.state = SinkState::Stderr;
                let _ = writeln!(io::stderr(), "[DAH-JSONL] fallback log failed, using stderr");
            }
            SinkState::Stderr | SinkState::Discard => {
                self.file = None;
                self.state = SinkState::Discard;
            }
        }
    }

    fn current_path(&self) -> Option<&Path> {
        match self.state {
            SinkState::Primary => Some(&self.config.path),
            SinkState::Fallback => self.config.fallback_path.as_deref(),
            SinkState::Stderr | SinkState::Discard => None,
        }
    }

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if self.file.is_some() && self.bytes_written + len > self.config.max_size_bytes {
            self.rotate();
        }

        loop {
            match self.state {
                SinkState::Primary | SinkState::Fallback => {
                    let written = self
                        .file
                        .as_mut()
                        .is_some_and(|file| file.write_all(line.as_bytes()).is_ok());
                    if written {
                        self.bytes_written += len;
                        self.lines_written += 1;
                        if self.last_fsync.elapsed() >= self.config.fsync_interval {
                            self.fsync();
                        }
                        return;
                    }
                    self.degrade();
                }
                SinkState::Stderr => {
                    if write!(io::stderr(), "[DAH-JSONL] {line}").is_err() {
                        self.degrade();
                        continue;
                    }
                    self.lines_written += 1;
                    return;
                }
                SinkState::Discard => return,
            }
        }
    }

    fn rotate(&mut self) {
        self.flush();
        self.file = None;
        let Some(base) = self.current_path().map(Path::to_path_buf) else {
            return;
        };

        let keep = self.config.max_rotated_files;
        let _ = fs::remove_file(rotated_name(&base, keep));
        for generation in (1..keep).rev() {
            let _ = fs::rename(rotated_name(&base, generation), rotated_name(&base, generation + 1));
        }
        if keep > 0 {
            let _ = fs::rename(&base, rotated_name(&base, 1));
        } else {
            let _ = fs::remove_file(&base);
        }

        let state = self.state;
        match open_append(&base) {
            Ok((file, _)) => self.attach(file, 0, state),
            Err(_) => self.degrade(),
        }
    }
}

/// Open `path` for appending, creating parent directories. Returns the file and its size.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| DahError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| DahError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// `activity.jsonl` → `activity.jsonl.2`.
fn rotated_name(base: &Path, generation: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}
