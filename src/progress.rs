//! Progress reporting for crawl runs
//!
//! Counters are reported either as `info` log lines or as JSON lines on
//! stderr for an external caller. [`StatsTicker`] drives periodic reports
//! from a background thread while the crawl runs.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::info;
use serde::Serialize;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::CrawlConfig;
use crate::metrics::{CrawlMetrics, MetricsSnapshot};
use crate::models::CrawlSummary;

/// Where reports go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// `info` log lines
    #[default]
    Log,
    /// JSON lines on stderr
    Json,
}

/// Start message sent when the crawl begins
#[derive(Debug, Clone, Serialize)]
pub struct StartMessage {
    /// Message type identifier
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    /// Sequence number
    pub seq: u64,
    /// Timestamp in milliseconds since reporter creation
    pub ts: u64,
    /// Number of targets to crawl
    pub targets: usize,
    pub workers: usize,
    pub max_depth: usize,
}

impl StartMessage {
    pub fn new(seq: u64, ts: u64, targets: usize, workers: usize, max_depth: usize) -> Self {
        Self {
            msg_type: "start",
            seq,
            ts,
            targets,
            workers,
            max_depth,
        }
    }
}

/// Periodic counter snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ProgressMessage {
    /// Message type identifier ("p" for progress)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    /// Servers done
    #[serde(rename = "sv")]
    pub servers: u64,
    /// Shares started
    #[serde(rename = "sh")]
    pub shares: u64,
    /// Folders visited
    #[serde(rename = "d")]
    pub folders: u64,
    /// Files found
    #[serde(rename = "f")]
    pub files: u64,
}

impl ProgressMessage {
    pub fn new(seq: u64, ts: u64, snapshot: &MetricsSnapshot) -> Self {
        Self {
            msg_type: "p",
            seq,
            ts,
            servers: snapshot.servers,
            shares: snapshot.shares,
            folders: snapshot.folders,
            files: snapshot.files,
        }
    }
}

/// Done message sent when the crawl completes
#[derive(Debug, Clone, Serialize)]
pub struct DoneMessage {
    /// Message type identifier ("done" for completion)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    /// Servers finished
    #[serde(rename = "sf")]
    pub servers_finished: u64,
    /// Servers stopped
    #[serde(rename = "ss")]
    pub servers_stopped: u64,
    /// Shares finished
    #[serde(rename = "hf")]
    pub shares_finished: u64,
    /// Shares failed
    #[serde(rename = "hx")]
    pub shares_failed: u64,
    /// Records persisted
    #[serde(rename = "rp")]
    pub records_persisted: u64,
    /// Records dropped
    #[serde(rename = "rd")]
    pub records_dropped: u64,
    pub interrupted: bool,
    /// Total crawl duration in milliseconds
    pub ms: u64,
}

impl DoneMessage {
    pub fn new(seq: u64, ts: u64, summary: &CrawlSummary) -> Self {
        Self {
            msg_type: "done",
            seq,
            ts,
            servers_finished: summary.servers_finished,
            servers_stopped: summary.servers_stopped,
            shares_finished: summary.shares_finished,
            shares_failed: summary.shares_failed,
            records_persisted: summary.records_persisted,
            records_dropped: summary.records_dropped,
            interrupted: summary.interrupted,
            ms: summary.duration_ms,
        }
    }
}

/// Emits start, progress and done reports in one format
pub struct ProgressReporter {
    format: ReportFormat,
    /// Sequence number for messages
    seq: AtomicU64,
    start_time: Instant,
}

impl ProgressReporter {
    pub fn new(format: ReportFormat) -> Self {
        Self {
            format,
            seq: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn format(&self) -> ReportFormat {
        self.format
    }

    /// Get the next sequence number (monotonically increasing)
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Get the current timestamp in milliseconds since reporter creation
    pub fn current_timestamp(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Output a serializable message to stderr as JSON
    pub fn output_to_stderr<T: Serialize>(&self, msg: &T) {
        if let Ok(json) = serde_json::to_string(msg) {
            let mut stderr = io::stderr().lock();
            writeln!(stderr, "{}", json).ok();
            stderr.flush().ok();
        }
    }

    pub fn report_start(&self, config: &CrawlConfig, targets: usize) {
        let msg = StartMessage::new(
            self.next_seq(),
            self.current_timestamp(),
            targets,
            config.workers,
            config.max_depth,
        );

        match self.format {
            ReportFormat::Json => self.output_to_stderr(&msg),
            ReportFormat::Log => info!(
                "starting crawl of {} servers ({} workers, max depth {})",
                msg.targets, msg.workers, msg.max_depth
            ),
        }
    }

    pub fn report_progress(&self, snapshot: &MetricsSnapshot) {
        let msg = ProgressMessage::new(self.next_seq(), self.current_timestamp(), snapshot);

        match self.format {
            ReportFormat::Json => self.output_to_stderr(&msg),
            ReportFormat::Log => info!(
                "statistics: servers={} shares={} folders={} files={}",
                msg.servers, msg.shares, msg.folders, msg.files
            ),
        }
    }

    pub fn report_done(&self, summary: &CrawlSummary) {
        let msg = DoneMessage::new(self.next_seq(), self.current_timestamp(), summary);

        match self.format {
            ReportFormat::Json => self.output_to_stderr(&msg),
            ReportFormat::Log => info!(
                "crawl done in {}ms: {} servers finished, {} stopped, {} shares finished, {} failed, {} records",
                msg.ms,
                msg.servers_finished,
                msg.servers_stopped,
                msg.shares_finished,
                msg.shares_failed,
                msg.records_persisted
            ),
        }
    }
}

/// Background thread reporting counters at a fixed interval
pub struct StatsTicker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl StatsTicker {
    pub fn spawn(
        reporter: Arc<ProgressReporter>,
        metrics: Arc<CrawlMetrics>,
        interval: Duration,
    ) -> io::Result<Self> {
        let (stop, stopped) = bounded::<()>(0);

        let handle = thread::Builder::new()
            .name("stats-ticker".into())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => reporter.report_progress(&metrics.snapshot()),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Self { stop, handle })
    }

    /// Stop ticking and wait for the thread
    pub fn stop(self) {
        drop(self.stop);
        self.handle.join().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_message_serialization() {
        let msg = StartMessage::new(1, 100, 3, 8, 3);
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["_t"], "start");
        assert_eq!(parsed["seq"], 1);
        assert_eq!(parsed["ts"], 100);
        assert_eq!(parsed["targets"], 3);
        assert_eq!(parsed["workers"], 8);
        assert_eq!(parsed["max_depth"], 3);
    }

    #[test]
    fn test_progress_message_serialization() {
        let snapshot = MetricsSnapshot {
            servers: 2,
            shares: 5,
            folders: 40,
            files: 1000,
        };
        let msg = ProgressMessage::new(2, 200, &snapshot);
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["_t"], "p");
        assert_eq!(parsed["seq"], 2);
        assert_eq!(parsed["sv"], 2);
        assert_eq!(parsed["sh"], 5);
        assert_eq!(parsed["d"], 40);
        assert_eq!(parsed["f"], 1000);
    }

    #[test]
    fn test_done_message_serialization() {
        let summary = CrawlSummary {
            servers_finished: 2,
            servers_stopped: 1,
            shares_finished: 4,
            shares_failed: 1,
            records_persisted: 900,
            duration_ms: 4500,
            ..CrawlSummary::default()
        };
        let msg = DoneMessage::new(10, 5000, &summary);
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["_t"], "done");
        assert_eq!(parsed["sf"], 2);
        assert_eq!(parsed["ss"], 1);
        assert_eq!(parsed["hf"], 4);
        assert_eq!(parsed["hx"], 1);
        assert_eq!(parsed["rp"], 900);
        assert_eq!(parsed["rd"], 0);
        assert_eq!(parsed["interrupted"], false);
        assert_eq!(parsed["ms"], 4500);
    }

    #[test]
    fn test_reporter_sequence_numbers() {
        let reporter = ProgressReporter::new(ReportFormat::Log);
        assert_eq!(reporter.format(), ReportFormat::Log);
        assert_eq!(reporter.next_seq(), 0);

        reporter.report_progress(&MetricsSnapshot::default());
        reporter.report_done(&CrawlSummary::default());
        assert_eq!(reporter.next_seq(), 3);
    }

    #[test]
    fn test_ticker_reports_until_stopped() {
        let reporter = Arc::new(ProgressReporter::new(ReportFormat::Log));
        let metrics = Arc::new(CrawlMetrics::new());

        let ticker = StatsTicker::spawn(
            Arc::clone(&reporter),
            metrics,
            Duration::from_millis(5),
        )
        .unwrap();
        thread::sleep(Duration::from_millis(60));
        ticker.stop();

        let ticks = reporter.next_seq();
        assert!(ticks > 0);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(reporter.next_seq(), ticks + 1);
    }
}
