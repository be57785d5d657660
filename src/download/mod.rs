//! Bulk metadata download: record schema, stream I/O, fresh and resumed runs.

pub mod downloader;
pub mod record;
pub mod resume;
pub mod stream;

pub use downloader::{DownloadReport, DownloaderConfig, MetadataDownloader};
pub use record::MetadataRecord;
pub use resume::{ResumePlan, ResumeReport, ResumeTracker, Resumer};
