//! Fleet-wide file-share crawler with resumable indexing
//!
//! Crawls many servers concurrently, walks every share to a bounded depth
//! and records each file through a single writer into SQLite. Share scan
//! state is persisted so a later run skips shares already attempted.

pub mod client;
pub mod config;
pub mod crawler;
pub mod db;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod task;
pub mod tracker;
pub mod walker;

pub use client::{Credentials, MountGuard, Session, SessionGuard, ShareClient, ShareHandle};
pub use config::{parse_list, CrawlConfig};
pub use crawler::Crawler;
pub use db::{IndexStore, SqliteStore};
pub use discovery::{
    collect_targets, DirectoryLookup, DirectoryQuery, Discovery, HostsFile, LdapDirectory,
};
pub use error::{CrawlError, CrawlErrorKind, ErrorScope};
pub use filter::ExclusionFilter;
pub use metrics::{CrawlMetrics, MetricsSnapshot};
pub use models::{CrawlSummary, DirEntry, FileRecord, ShareState};
pub use progress::{ProgressReporter, ReportFormat, StatsTicker};
pub use tracker::ShareTracker;
pub use walker::{Walk, WalkEvent};
