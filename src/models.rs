//! Core data models for the share crawler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Scan state persisted per (server, share) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareState {
    /// Walk has begun
    Started,
    /// Walk completed
    Finished,
    /// Mount or walk failed
    Failed,
}

impl ShareState {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ShareState::Started => "started",
            ShareState::Finished => "finished",
            ShareState::Failed => "failed",
        }
    }
}

impl fmt::Display for ShareState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShareState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(ShareState::Started),
            "finished" => Ok(ShareState::Finished),
            "failed" => Ok(ShareState::Failed),
            other => Err(StoreError::UnknownState(other.to_string())),
        }
    }
}

/// Terminal outcome of a share walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareOutcome {
    Finished,
    Failed,
}

impl From<ShareOutcome> for ShareState {
    fn from(outcome: ShareOutcome) -> Self {
        match outcome {
            ShareOutcome::Finished => ShareState::Finished,
            ShareOutcome::Failed => ShareState::Failed,
        }
    }
}

/// One entry of a directory listing returned by a protocol client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name without folder
    pub name: String,
    /// Whether the entry is a folder
    pub is_dir: bool,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: DateTime<Utc>,
    /// Mode/permission bits
    pub mode: u32,
}

impl DirEntry {
    /// A file entry with the given size
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            size,
            modified: DateTime::<Utc>::default(),
            mode: 0o644,
        }
    }

    /// A folder entry
    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            size: 0,
            modified: DateTime::<Utc>::default(),
            mode: 0o755,
        }
    }

    /// Set the modification time
    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = modified;
        self
    }

    /// Set the mode bits
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }
}

/// A file found by a walk, not yet tagged with its server and share
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundFile {
    pub name: String,
    /// Containing folder relative to the share root ("" is the root)
    pub folder: String,
    /// Lower-cased extension without the leading dot
    pub extension: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub mode: u32,
}

/// A file observed on a share, as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Server the share lives on
    pub server: String,
    /// Share name
    pub share: String,
    /// File name without folder
    pub name: String,
    /// Containing folder relative to the share root
    pub folder: String,
    /// File extension (lowercase, without dot)
    pub extension: String,
    /// File size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: DateTime<Utc>,
    /// Mode/permission bits
    pub mode: u32,
}

impl FileRecord {
    /// Tag a walked file with its server and share
    pub fn tagged(server: &str, share: &str, file: FoundFile) -> Self {
        Self {
            server: server.to_string(),
            share: share.to_string(),
            name: file.name,
            folder: file.folder,
            extension: file.extension,
            size: file.size,
            modified: file.modified,
            mode: file.mode,
        }
    }
}

/// Result of a crawl run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlSummary {
    /// Servers whose task ran to the end of their share list
    pub servers_finished: u64,
    /// Servers whose task stopped early (connect, listing, shutdown)
    pub servers_stopped: u64,
    /// Shares walked to completion
    pub shares_finished: u64,
    /// Shares marked failed
    pub shares_failed: u64,
    /// Shares skipped by exclusion or because they were already attempted
    pub shares_skipped: u64,
    /// Records written by the result writer
    pub records_persisted: u64,
    /// Records the store rejected
    pub records_dropped: u64,
    /// Total run duration in milliseconds
    pub duration_ms: u64,
    /// Whether shutdown was requested during the run
    pub interrupted: bool,
}

impl CrawlSummary {
    /// Create a new empty summary
    pub fn new() -> Self {
        Self::default()
    }

    /// Total servers handled
    pub fn servers_total(&self) -> u64 {
        self.servers_finished + self.servers_stopped
    }
}
