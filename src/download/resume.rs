//! Resuming an interrupted download.
//!
//! A saved stream is replayed into a new output stream. Records whose
//! permission fetch failed are re-fetched in place; everything else is copied
//! untouched. While replaying, [`ResumeTracker`] follows the `batch_info`
//! positions to work out which page was the last one fully written, and the
//! listing then continues right after the last saved record.
//!
//! The continuation point is derived purely from the saved positions:
//!
//! * last record was the last item of its page: continue with that page's
//!   continuation token, skipping nothing (no token means the listing was
//!   already complete);
//! * last record was mid-page: re-request the page it belongs to, using the
//!   token of the last completed page, and skip `item_index + 1` items;
//! * mid-page on the very first page: there is no token that re-requests that
//!   page, so the resume is refused rather than silently starting over.
//!
//! Known limitation: an empty page that still carries a continuation token
//! leaves no record behind, so its token is never seen. Records of the page
//! after it are attributed to the token before it, and a mid-page resume there
//! re-requests the empty page instead of the right one.

use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::core::errors::{DahError, Result};
use crate::core::paths::same_file;
use crate::download::downloader::{DownloadReport, MetadataDownloader};
use crate::download::record::MetadataRecord;
use crate::download::stream::{RecordReader, RecordWriter};
use crate::logger::activity::ActivityLoggerHandle;
use crate::logger::jsonl::{EventType, LogEntry};
use crate::remote::pager::PagePosition;
use crate::remote::service::DriveService;

/// Where the listing continues after replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum ResumePlan {
    /// The saved stream already covers the whole listing.
    Complete,
    /// Request the page behind `page_token` and drop its first `skip` items.
    Continue { page_token: String, skip: usize },
}

/// Follows saved positions and derives the [`ResumePlan`].
#[derive(Debug, Default)]
pub struct ResumeTracker {
    /// Token that fetched the page of the current record, once known.
    page_token: Option<String>,
    last: Option<PagePosition>,
    records: usize,
}

impl ResumeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the position of the next saved record, in stream order.
    pub fn observe(&mut self, position: &PagePosition) {
        if let Some(previous) = &self.last
            && previous.next_page_token != position.next_page_token
        {
            // The previous page is complete; its token fetched this one.
            self.page_token.clone_from(&previous.next_page_token);
        }
        self.last = Some(position.clone());
        self.records += 1;
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn finish(self) -> Result<ResumePlan> {
        let Some(last) = self.last else {
            return Err(DahError::ResumeInconsistent {
                details: "saved stream is empty; start a fresh download instead".to_string(),
            });
        };

        if last.is_last_in_page() {
            return Ok(match last.next_page_token {
                None => ResumePlan::Complete,
                Some(page_token) => ResumePlan::Continue {
                    page_token,
                    skip: 0,
                },
            });
        }

        match self.page_token {
            Some(page_token) => Ok(ResumePlan::Continue {
                page_token,
                skip: last.item_index + 1,
            }),
            None => Err(DahError::ResumeInconsistent {
                details: format!(
                    "stream stops at item {} of {} on the first page and no completed \
                     page token is known; start a fresh download instead",
                    last.item_index + 1,
                    last.num_items
                ),
            }),
        }
    }
}

/// Compute the plan for a saved stream without touching the remote side.
pub fn plan_for(path: &Path) -> Result<ResumePlan> {
    let mut tracker = ResumeTracker::new();
    for entry in RecordReader::open(path)? {
        let (_, record) = entry?;
        tracker.observe(&record.batch_info);
    }
    tracker.finish()
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumeReport {
    pub plan: ResumePlan,
    /// Saved records copied into the output.
    pub replayed: usize,
    /// Failed records whose re-fetch succeeded.
    pub refetched: usize,
    /// Failed records that failed again (or were not retried after a stop).
    pub still_failed: usize,
    /// The continued listing, when one ran.
    pub continued: Option<DownloadReport>,
    pub interrupted: bool,
}

/// Replays a saved stream and continues the listing.
pub struct Resumer<'a, S> {
    downloader: &'a MetadataDownloader<S>,
    logger: ActivityLoggerHandle,
    /// Pause before each re-fetch.
    sleep: Duration,
}

impl<'a, S: DriveService> Resumer<'a, S> {
    pub fn new(
        downloader: &'a MetadataDownloader<S>,
        logger: ActivityLoggerHandle,
        sleep: Duration,
    ) -> Self {
        Self {
            downloader,
            logger,
            sleep,
        }
    }

    /// Resume `input` into `output`, which must be a different file.
    ///
    /// The plan is computed before anything is written, so an inconsistent
    /// stream is refused without side effects.
    pub fn run(
        &self,
        input: &Path,
        output: &Path,
        stop: Option<&dyn Fn() -> bool>,
    ) -> Result<ResumeReport> {
        if same_file(input, output) {
            return Err(DahError::InvalidConfig {
                details: format!(
                    "resume output must differ from its input: {}",
                    output.display()
                ),
            });
        }

        let plan = plan_for(input)?;
        self.logger.send(
            LogEntry::info(EventType::ResumePlanned)
                .component("resume")
                .details(match &plan {
                    ResumePlan::Complete => "listing complete; refetching failed records only"
                        .to_string(),
                    ResumePlan::Continue { page_token, skip } => {
                        format!("continue at page_token={page_token} skip={skip}")
                    }
                }),
        );

        let mut writer = RecordWriter::create(output)?;
        let mut report = ResumeReport {
            plan: plan.clone(),
            replayed: 0,
            refetched: 0,
            still_failed: 0,
            continued: None,
            interrupted: false,
        };

        for entry in RecordReader::open(input)? {
            let (_, saved) = entry?;
            let record = if !saved.is_failed() {
                saved
            } else if report.interrupted || stop.is_some_and(|should_stop| should_stop()) {
                report.interrupted = true;
                saved
            } else {
                let fresh = self.refetch(&saved);
                report.refetched += usize::from(!fresh.is_failed());
                fresh
            };
            report.still_failed += usize::from(record.is_failed());
            writer.write(&record)?;
            report.replayed += 1;
        }
        writer.sync()?;

        if let ResumePlan::Continue { page_token, skip } = plan
            && !report.interrupted
        {
            let continued = self
                .downloader
                .run(&mut writer, Some(page_token), skip, stop);
            writer.sync()?;
            let continued = continued?;
            report.interrupted = continued.interrupted;
            report.continued = Some(continued);
        }

        Ok(report)
    }

    fn refetch(&self, saved: &MetadataRecord) -> MetadataRecord {
        if !self.sleep.is_zero() {
            thread::sleep(self.sleep);
        }
        self.downloader.refetch(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(token: Option<&str>, index: usize, count: usize) -> PagePosition {
        PagePosition {
            next_page_token: token.map(str::to_string),
            item_index: index,
            num_items: count,
        }
    }

    fn plan(positions: &[PagePosition]) -> Result<ResumePlan> {
        let mut tracker = ResumeTracker::new();
        for p in positions {
            tracker.observe(p);
        }
        tracker.finish()
    }

    #[test]
    fn empty_intermediate_page_anchors_on_the_token_before_it() {
        // T1 fetched an empty page whose token T2 fetched the page with T3.
        let plan = plan(&[
            pos(Some("T1"), 0, 2),
            pos(Some("T1"), 1, 2),
            pos(Some("T3"), 0, 2),
        ])
        .unwrap();
        assert_eq!(
            plan,
            ResumePlan::Continue {
                page_token: "T1".to_string(),
                skip: 1
            }
        );
    }

    #[test]
    fn stop_on_page_boundary_continues_with_next_token() {
        let plan = plan(&[
            pos(Some("T1"), 0, 2),
            pos(Some("T1"), 1, 2),
            pos(Some("T2"), 0, 2),
            pos(Some("T2"), 1, 2),
        ])
        .unwrap();
        assert_eq!(
            plan,
            ResumePlan::Continue {
                page_token: "T2".to_string(),
                skip: 0
            }
        );
    }

    #[test]
    fn stop_mid_page_refetches_that_page_and_skips() {
        let plan = plan(&[
            pos(Some("T1"), 0, 3),
            pos(Some("T1"), 1, 3),
            pos(Some("T1"), 2, 3),
            pos(Some("T2"), 0, 3),
        ])
        .unwrap();
        assert_eq!(
            plan,
            ResumePlan::Continue {
                page_token: "T1".to_string(),
                skip: 1
            }
        );
    }

    #[test]
    fn mid_page_on_the_last_page_uses_previous_token() {
        let plan = plan(&[pos(Some("T1"), 0, 1), pos(None, 0, 3), pos(None, 1, 3)]).unwrap();
        assert_eq!(
            plan,
            ResumePlan::Continue {
                page_token: "T1".to_string(),
                skip: 2
            }
        );
    }

    #[test]
    fn finished_listing_is_complete() {
        let plan = plan(&[pos(Some("T1"), 0, 1), pos(None, 0, 2), pos(None, 1, 2)]).unwrap();
        assert_eq!(plan, ResumePlan::Complete);
    }

    #[test]
    fn mid_first_page_is_fatal() {
        let err = plan(&[pos(Some("T1"), 0, 3), pos(Some("T1"), 1, 3)]).unwrap_err();
        assert!(matches!(err, DahError::ResumeInconsistent { .. }));
        assert!(err.to_string().contains("first page"));
    }

    #[test]
    fn empty_stream_is_fatal() {
        assert!(matches!(
            plan(&[]),
            Err(DahError::ResumeInconsistent { .. })
        ));
    }

    #[test]
    fn plan_serializes_tagged() {
        let json = serde_json::to_value(ResumePlan::Continue {
            page_token: "T".to_string(),
            skip: 3,
        })
        .unwrap();
        assert_eq!(json["plan"], "continue");
        assert_eq!(json["skip"], 3);
    }
}
