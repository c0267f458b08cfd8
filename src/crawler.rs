//! Crawl orchestrator
//!
//! Dispatches one [`ServerTask`] per target into a thread pool sized to the
//! configured worker count, so at most that many servers are connected at
//! once. All tasks feed one [`ResultWriter`]; once every task has finished
//! the writer channel is closed and drained before `run` returns.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::client::ShareClient;
use crate::config::CrawlConfig;
use crate::db::IndexStore;
use crate::error::{ConfigError, CrawlError, CrawlErrorKind};
use crate::filter::ExclusionFilter;
use crate::metrics::CrawlMetrics;
use crate::models::CrawlSummary;
use crate::pipeline::ResultWriter;
use crate::task::{ServerOutcome, ServerTask, TaskContext};
use crate::tracker::ShareTracker;

/// Crawls a list of servers with a bounded worker pool
pub struct Crawler<C: ShareClient> {
    config: CrawlConfig,
    filter: ExclusionFilter,
    client: Arc<C>,
    store: Arc<dyn IndexStore>,
    metrics: Arc<CrawlMetrics>,
    shutdown: Arc<AtomicBool>,
}

impl<C: ShareClient> Crawler<C> {
    /// Create a crawler; fails if the config does not validate
    pub fn new(
        config: CrawlConfig,
        client: Arc<C>,
        store: Arc<dyn IndexStore>,
    ) -> Result<Self, CrawlError> {
        config.validate()?;
        let filter = config.exclusion_filter();
        Ok(Self {
            config,
            filter,
            client,
            store,
            metrics: Arc::new(CrawlMetrics::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Stop when an existing flag is set
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn metrics(&self) -> &Arc<CrawlMetrics> {
        &self.metrics
    }

    /// Once set, queued servers are never connected and running ones stop
    /// between shares and walk steps
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Crawl every target and block until all are done
    ///
    /// Only run-level failures are returned as errors: the pool or writer
    /// could not be started, or the writer could not be joined.
    pub fn run(&self, targets: &[String]) -> Result<CrawlSummary, CrawlError> {
        let start = Instant::now();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .thread_name(|i| format!("crawl-worker-{}", i))
            .build()
            .map_err(|e| ConfigError::Pool(e.to_string()))?;

        let writer = ResultWriter::spawn(Arc::clone(&self.store), self.config.queue_size)?;
        let tracker = ShareTracker::new(Arc::clone(&self.store));
        let ctx = TaskContext {
            tracker: &tracker,
            filter: &self.filter,
            metrics: &self.metrics,
            credentials: &self.config.credentials,
            shutdown: &self.shutdown,
            max_depth: self.config.max_depth,
            connect_timeout: self.config.connect_timeout(),
        };
        let summary = Mutex::new(CrawlSummary::new());

        info!(
            "crawling {} servers with {} workers",
            targets.len(),
            self.config.workers
        );

        pool.scope(|scope| {
            for target in targets {
                if self.shutdown.load(Ordering::SeqCst) {
                    debug!("shutdown requested, not dispatching {}", target);
                    continue;
                }

                let task = ServerTask::new(&*self.client, &ctx, writer.sender());
                let summary = &summary;
                let metrics = &self.metrics;
                scope.spawn(move |_| {
                    info!("server {}: starting enumeration", target);
                    let result = task.run(target);
                    drop(task);

                    let mut summary = summary.lock().unwrap_or_else(PoisonError::into_inner);
                    if record_server(&mut summary, target, result) {
                        metrics.add_server();
                    }
                });
            }
        });

        let written = writer.finish()?;
        info!("finished all enumerations");

        let mut summary = summary.into_inner().unwrap_or_else(PoisonError::into_inner);
        summary.records_persisted = written.persisted;
        summary.records_dropped = written.dropped;
        summary.duration_ms = start.elapsed().as_millis() as u64;
        summary.interrupted |= self.shutdown.load(Ordering::SeqCst);
        Ok(summary)
    }
}

/// Fold one task result into the summary; false if the server was never
/// contacted
fn record_server(
    summary: &mut CrawlSummary,
    server: &str,
    result: Result<ServerOutcome, CrawlError>,
) -> bool {
    match result {
        Ok(outcome) => {
            summary.shares_finished += outcome.shares_finished;
            summary.shares_failed += outcome.shares_failed;
            summary.shares_skipped += outcome.shares_skipped;
            if outcome.interrupted {
                warn!("server {}: stopped enumeration: shutdown requested", server);
                summary.servers_stopped += 1;
                summary.interrupted = true;
            } else {
                info!("server {}: finished enumeration", server);
                summary.servers_finished += 1;
            }
        }
        Err(e) if e.kind == CrawlErrorKind::Interrupted => {
            debug!("server {}: not started, shutdown requested", server);
            summary.interrupted = true;
            return false;
        }
        Err(e) => {
            warn!(
                "server {}: stopped enumeration ({:?} failure): {}",
                server,
                e.scope(),
                e
            );
            summary.servers_stopped += 1;
        }
    }
    true
}
