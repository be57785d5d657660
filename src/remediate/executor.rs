//! Shared machinery for remediation runs: dry-run, pacing, batch limits,
//! stop checks, per-mutation logging and the run report.
//!
//! A failed mutation is recorded and skipped; the run moves on to the next
//! candidate. Nothing is retried.

#![allow(missing_docs)]

use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::config::Config;
use crate::logger::activity::ActivityLoggerHandle;
use crate::logger::jsonl::{EventType, LogEntry};
use crate::remote::error::{FailureClass, RemoteError};
use crate::remote::service::{DriveService, RemoteResult};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemediationConfig {
    /// Log what would be changed without calling the service.
    pub dry_run: bool,
    /// Pause between consecutive mutating calls.
    pub delay: Duration,
    /// Stop after this many applied mutations.
    pub max_batch: Option<usize>,
    pub permission_page_size: u32,
}

impl RemediationConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dry_run: config.remediation.dry_run,
            delay: config.remediation.delay(),
            max_batch: config.remediation.max_batch,
            permission_page_size: config.download.permission_page_size,
        }
    }
}

/// One failed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemediationError {
    pub item_id: String,
    pub action: String,
    pub class: FailureClass,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemediationReport {
    pub operation: String,
    pub dry_run: bool,
    /// Mutations performed (or, in a dry run, that would have been).
    pub applied: usize,
    /// Candidates left alone because they did not qualify.
    pub skipped: usize,
    pub failed: usize,
    /// Dedup groups abandoned because their members changed remotely.
    pub aborted_groups: usize,
    pub interrupted: bool,
    pub batch_limit_reached: bool,
    pub errors: Vec<RemediationError>,
    pub duration_ms: u64,
}

/// Runs mutations against a service on behalf of one remediation operation.
pub struct Executor<'a, S> {
    service: &'a S,
    config: RemediationConfig,
    logger: ActivityLoggerHandle,
    stop: Option<&'a dyn Fn() -> bool>,
    report: RemediationReport,
    last_call: Option<Instant>,
    started: Instant,
}

impl<'a, S: DriveService> Executor<'a, S> {
    pub fn new(
        operation: &str,
        service: &'a S,
        config: RemediationConfig,
        logger: ActivityLoggerHandle,
        stop: Option<&'a dyn Fn() -> bool>,
    ) -> Self {
        logger.send(
            LogEntry::info(EventType::RunStart)
                .component(operation)
                .dry_run(config.dry_run),
        );
        Self {
            service,
            report: RemediationReport {
                operation: operation.to_string(),
                dry_run: config.dry_run,
                ..RemediationReport::default()
            },
            config,
            logger,
            stop,
            last_call: None,
            started: Instant::now(),
        }
    }

    pub fn service(&self) -> &'a S {
        self.service
    }

    pub fn config(&self) -> &RemediationConfig {
        &self.config
    }

    pub fn logger(&self) -> &ActivityLoggerHandle {
        &self.logger
    }

    /// Whether the run must end now: a stop was requested or the batch limit is spent.
    pub fn should_halt(&mut self) -> bool {
        if self.stop.is_some_and(|stop| stop()) {
            self.report.interrupted = true;
            return true;
        }
        if self
            .config
            .max_batch
            .is_some_and(|limit| self.report.applied >= limit)
        {
            self.report.batch_limit_reached = true;
            return true;
        }
        false
    }

    pub fn skip(&mut self) {
        self.report.skipped += 1;
    }

    pub fn abort_group(&mut self, path: &str, details: String) {
        self.report.aborted_groups += 1;
        self.logger.send(
            LogEntry::warning(EventType::GroupAborted)
                .component(&self.report.operation)
                .path(path)
                .details(details),
        );
    }

    /// Perform one mutation, paced and logged. Returns `None` in a dry run or on failure.
    pub fn apply<T>(
        &mut self,
        entry: LogEntry,
        item_id: &str,
        action: &str,
        call: impl FnOnce(&S) -> RemoteResult<T>,
    ) -> Option<T> {
        let entry = entry
            .component(&self.report.operation)
            .dry_run(self.config.dry_run)
            .details(action.to_string());

        if self.config.dry_run {
            self.report.applied += 1;
            self.logger.send(entry.ok(true));
            return None;
        }

        self.pace();
        let outcome = call(self.service);
        self.last_call = Some(Instant::now());
        match outcome {
            Ok(value) => {
                self.report.applied += 1;
                self.logger.send(entry.ok(true));
                Some(value)
            }
            Err(e) => {
                self.record_failure(item_id, action, &e);
                None
            }
        }
    }

    /// Count and log a failed call that was not a mutation (a confirming read).
    pub fn record_failure(&mut self, item_id: &str, action: &str, error: &RemoteError) {
        self.report.failed += 1;
        self.report.errors.push(RemediationError {
            item_id: item_id.to_string(),
            action: action.to_string(),
            class: error.class,
            message: error.message.clone(),
        });
        self.logger.send(
            LogEntry::warning(EventType::RemediationFailed)
                .component(&self.report.operation)
                .item(item_id, None)
                .details(action.to_string())
                .error(error.class.as_str(), error.message.clone()),
        );
    }

    fn pace(&self) {
        if let Some(last) = self.last_call {
            let remaining = self.config.delay.saturating_sub(last.elapsed());
            if !remaining.is_zero() {
                thread::sleep(remaining);
            }
        }
    }

    pub fn finish(mut self) -> RemediationReport {
        self.report.duration_ms =
            u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.logger.send(
            LogEntry::info(EventType::RunComplete)
                .component(&self.report.operation)
                .count(self.report.applied as u64)
                .dry_run(self.config.dry_run)
                .ok(self.report.failed == 0)
                .duration(self.started.elapsed()),
        );
        self.report
    }
}
