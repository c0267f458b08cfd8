//! Crawl counters shared by every worker

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters updated by crawling workers and read by reporters
///
/// Created once per process and passed to the crawler explicitly.
#[derive(Debug, Default)]
pub struct CrawlMetrics {
    servers: AtomicU64,
    shares: AtomicU64,
    folders: AtomicU64,
    files: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub servers: u64,
    pub shares: u64,
    pub folders: u64,
    pub files: u64,
}

impl CrawlMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_server(&self) {
        self.servers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_share(&self) {
        self.shares.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_folder(&self) {
        self.folders.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_file(&self) {
        self.files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            servers: self.servers.load(Ordering::Relaxed),
            shares: self.shares.load(Ordering::Relaxed),
            folders: self.folders.load(Ordering::Relaxed),
            files: self.files.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counters_start_at_zero() {
        assert_eq!(CrawlMetrics::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = Arc::new(CrawlMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.add_file();
                        metrics.add_folder();
                    }
                    metrics.add_share();
                    metrics.add_server();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.files, 8000);
        assert_eq!(snapshot.folders, 8000);
        assert_eq!(snapshot.shares, 8);
        assert_eq!(snapshot.servers, 8);
    }
}
