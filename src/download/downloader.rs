//! Fresh metadata download: listing pages joined with per-item permission fetches.

#![allow(missing_docs)]

use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::config::Config;
use crate::core::errors::{DahError, Result};
use crate::download::record::MetadataRecord;
use crate::download::stream::RecordWriter;
use crate::logger::activity::ActivityLoggerHandle;
use crate::logger::jsonl::{EventType, LogEntry};
use crate::remote::pager::{PagePosition, fetch_all_permissions, list_items};
use crate::remote::service::DriveService;
use crate::remote::types::{ListRequest, RemoteItem};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloaderConfig {
    pub page_size: u32,
    pub permission_page_size: u32,
    /// Service-side filter passed with every listing request.
    pub query: Option<String>,
    /// Pause before each per-item permission fetch.
    pub delay: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            page_size: crate::core::config::MAX_PAGE_SIZE,
            permission_page_size: crate::core::config::MAX_PERMISSION_PAGE_SIZE,
            query: None,
            delay: Duration::ZERO,
        }
    }
}

impl DownloaderConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: config.download.page_size,
            permission_page_size: config.download.permission_page_size,
            query: None,
            delay: Duration::ZERO,
        }
    }
}

/// Outcome of one listing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    pub records: usize,
    pub failed: usize,
    /// Items skipped at the start of the first page.
    pub skipped: usize,
    /// Stopped at a record boundary on request; the stream is resumable.
    pub interrupted: bool,
    pub duration_ms: u64,
}

pub struct MetadataDownloader<S> {
    service: S,
    config: DownloaderConfig,
    logger: ActivityLoggerHandle,
}

impl<S: DriveService> MetadataDownloader<S> {
    pub fn new(service: S, config: DownloaderConfig, logger: ActivityLoggerHandle) -> Self {
        Self {
            service,
            config,
            logger,
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Lazily list full records starting at `page_token`.
    ///
    /// The first `skip` items of the first page are passed over without
    /// fetching their permissions. A listing failure ends the sequence with
    /// one `Err`, even while skipping.
    pub fn list(
        &self,
        page_token: Option<String>,
        skip: usize,
    ) -> impl Iterator<Item = Result<MetadataRecord>> + '_ {
        let mut request = ListRequest::new(self.config.page_size).with_page_token(page_token);
        request.query.clone_from(&self.config.query);
        let mut remaining = skip;
        list_items(&self.service, request)
            .filter(move |entry| {
                let skipped = remaining > 0 && entry.is_ok();
                remaining -= usize::from(skipped);
                !skipped
            })
            .map(move |entry| match entry {
                Ok((item, position)) => Ok(self.get(item, position)),
                Err(e) => Err(DahError::remote("list_items", e)),
            })
    }

    /// Fetch the permissions of one listed item.
    ///
    /// Never fails: a failed fetch yields a record with `error` set and no
    /// permissions.
    pub fn get(&self, item: RemoteItem, position: PagePosition) -> MetadataRecord {
        if !self.config.delay.is_zero() {
            thread::sleep(self.config.delay);
        }
        match fetch_all_permissions(&self.service, &item.id, self.config.permission_page_size) {
            Ok(perms) => MetadataRecord::from_item(item, position, Ok(perms)),
            Err(e) => {
                self.logger.send(
                    LogEntry::warning(EventType::RecordFailed)
                        .component("download")
                        .item(&item.id, item.name.as_deref())
                        .position(position.next_page_token.as_deref(), position.item_index)
                        .error(e.class.as_str(), e.message.clone()),
                );
                MetadataRecord::from_item(item, position, Err(e.class))
            }
        }
    }

    /// Re-read a previously saved record, keeping its position.
    ///
    /// The item's attributes are fetched again before its permissions, so a
    /// rename, move or trash since the download shows up in the result. If the
    /// item itself cannot be read, the saved record is kept with `error` set.
    pub fn refetch(&self, record: &MetadataRecord) -> MetadataRecord {
        let item = match self.service.get_item(&record.id) {
            Ok(item) => item,
            Err(e) => {
                self.logger.send(
                    LogEntry::warning(EventType::RecordFailed)
                        .component("resume")
                        .item(&record.id, record.name.as_deref())
                        .error(e.class.as_str(), e.message.clone()),
                );
                return MetadataRecord {
                    error: Some(e.class),
                    ..record.clone()
                };
            }
        };
        let fresh = self.get(item, record.batch_info.clone());
        if !fresh.is_failed() {
            self.logger.send(
                LogEntry::info(EventType::RecordRefetched)
                    .component("resume")
                    .item(&fresh.id, fresh.name.as_deref())
                    .ok(true),
            );
        }
        fresh
    }

    /// Write records from `page_token` onward into `writer`.
    ///
    /// `stop` is polled between records. The writer is flushed before
    /// returning, also when the listing fails, so the output can be resumed.
    pub fn run<W>(
        &self,
        writer: &mut RecordWriter<W>,
        page_token: Option<String>,
        skip: usize,
        stop: Option<&dyn Fn() -> bool>,
    ) -> Result<DownloadReport>
    where
        W: std::io::Write,
    {
        let started = Instant::now();
        let mut report = DownloadReport {
            skipped: skip,
            ..DownloadReport::default()
        };

        let mut outcome = Ok(());
        let mut records = self.list(page_token, skip);
        loop {
            if stop.is_some_and(|should_stop| should_stop()) {
                report.interrupted = true;
                break;
            }
            let Some(entry) = records.next() else {
                break;
            };
            match entry.and_then(|record| writer.write(&record).map(|()| record)) {
                Ok(record) => {
                    report.records += 1;
                    report.failed += usize::from(record.is_failed());
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        writer.flush()?;
        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        outcome.map(|()| report)
    }
}
