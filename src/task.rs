//! Per-server crawl task
//!
//! One task owns one server from connect to disconnect:
//!
//! 1. connect with the configured timeout (failure ends the task)
//! 2. list shares (failure ends the task)
//! 3. for each share in listed order: skip if excluded or already
//!    attempted, record `started`, mount, walk into the writer channel,
//!    unmount, record `finished` or `failed`
//! 4. disconnect
//!
//! Share-level failures never end the task. Session and mount release is
//! bound to guards, so it runs on every exit path.

use log::{debug, error, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::client::{Credentials, MountGuard, Session, SessionGuard, ShareClient};
use crate::error::{CrawlError, StoreError};
use crate::filter::ExclusionFilter;
use crate::metrics::CrawlMetrics;
use crate::models::{FileRecord, ShareOutcome};
use crate::pipeline::RecordSender;
use crate::tracker::ShareTracker;
use crate::walker::{Walk, WalkEvent};

/// Run-wide state every server task reads
pub struct TaskContext<'a> {
    pub tracker: &'a ShareTracker,
    pub filter: &'a ExclusionFilter,
    pub metrics: &'a CrawlMetrics,
    pub credentials: &'a Credentials,
    pub shutdown: &'a AtomicBool,
    pub max_depth: usize,
    pub connect_timeout: Duration,
}

/// What happened to one share
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareStatus {
    /// Excluded, already attempted, or claimed by another run
    Skipped,
    Finished,
    Failed,
    /// Shutdown was requested mid-walk; the share is recorded as failed
    Interrupted,
}

/// Share counts for one server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerOutcome {
    pub shares_finished: u64,
    pub shares_failed: u64,
    pub shares_skipped: u64,
    /// The share loop stopped early because shutdown was requested
    pub interrupted: bool,
}

impl ServerOutcome {
    fn count(&mut self, status: ShareStatus) {
        match status {
            ShareStatus::Skipped => self.shares_skipped += 1,
            ShareStatus::Finished => self.shares_finished += 1,
            ShareStatus::Failed => self.shares_failed += 1,
            ShareStatus::Interrupted => {
                self.shares_failed += 1;
                self.interrupted = true;
            }
        }
    }
}

/// Crawls every share of one server
pub struct ServerTask<'a, C: ShareClient> {
    client: &'a C,
    ctx: &'a TaskContext<'a>,
    sender: RecordSender,
}

impl<'a, C: ShareClient> ServerTask<'a, C> {
    pub fn new(client: &'a C, ctx: &'a TaskContext<'a>, sender: RecordSender) -> Self {
        Self {
            client,
            ctx,
            sender,
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.ctx.shutdown.load(Ordering::SeqCst)
    }

    /// Crawl one server
    ///
    /// Returns an error only for failures that end the server task:
    /// connect, share listing, or shutdown before connecting.
    pub fn run(&self, server: &str) -> Result<ServerOutcome, CrawlError> {
        if self.shutdown_requested() {
            return Err(CrawlError::interrupted().on_server(server));
        }

        let session = self
            .client
            .connect(server, self.ctx.credentials, self.ctx.connect_timeout)
            .map_err(|e| CrawlError::from(e).on_server(server))?;
        let mut session = SessionGuard::new(session);
        debug!("server {}: connected as {}", server, self.ctx.credentials.user);

        let shares = session
            .list_shares()
            .map_err(|e| CrawlError::from(e).on_server(server))?;
        debug!("server {}: {} shares listed", server, shares.len());

        let mut outcome = ServerOutcome::default();
        for share in &shares {
            if self.shutdown_requested() {
                outcome.interrupted = true;
                break;
            }

            let status = self.crawl_share(&mut session, server, share);
            outcome.count(status);
            if status == ShareStatus::Interrupted {
                break;
            }
        }

        Ok(outcome)
    }

    /// Run the per-share state machine
    pub fn crawl_share(&self, session: &mut C::Session, server: &str, share: &str) -> ShareStatus {
        if self.ctx.filter.should_skip_share(share) {
            debug!("server {}: skipping excluded share {}", server, share);
            return ShareStatus::Skipped;
        }

        match self.ctx.tracker.is_scanned(server, share) {
            Ok(true) => {
                info!("server {}: skipping share {}, already indexed", server, share);
                return ShareStatus::Skipped;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("server {}: could not check share {}: {}", server, share, e);
                return ShareStatus::Failed;
            }
        }

        match self.ctx.tracker.record_started(server, share) {
            Ok(()) => {}
            Err(StoreError::DuplicateShare { .. }) => {
                info!("server {}: share {} claimed by another run", server, share);
                return ShareStatus::Skipped;
            }
            Err(e) => {
                error!("server {}: error saving share {}: {}", server, share, e);
                self.record(server, share, ShareOutcome::Failed);
                return ShareStatus::Failed;
            }
        }

        self.ctx.metrics.add_share();
        debug!("server {}: indexing share {}", server, share);

        let status = match self.walk_share(session, server, share) {
            Ok(true) => ShareStatus::Finished,
            Ok(false) => {
                warn!("server {}: walk of {} interrupted", server, share);
                ShareStatus::Interrupted
            }
            Err(e) => {
                debug!(
                    "server {}: could not index share {} ({:?} failure): {}",
                    server,
                    share,
                    e.scope(),
                    e
                );
                ShareStatus::Failed
            }
        };

        let outcome = match status {
            ShareStatus::Finished => ShareOutcome::Finished,
            _ => ShareOutcome::Failed,
        };
        self.record(server, share, outcome);
        status
    }

    /// Mount, walk and unmount one share; `Ok(false)` when interrupted
    fn walk_share(
        &self,
        session: &mut C::Session,
        server: &str,
        share: &str,
    ) -> Result<bool, CrawlError> {
        let located = |e: CrawlError| e.on_server(server).on_share(share);

        let mount = session
            .mount(share)
            .map_err(|e| located(CrawlError::from(e)))?;
        let mount = MountGuard::new(mount);

        let mut walk = Walk::new(&*mount, self.ctx.filter, self.ctx.metrics, self.ctx.max_depth)
            .with_shutdown(self.ctx.shutdown)
            .start("")
            .map_err(|e| located(CrawlError::from(e)))?;

        for event in walk.by_ref() {
            match event {
                WalkEvent::Folder(path) => debug!("{}/{}: folder {}", server, share, path),
                WalkEvent::File(file) => {
                    trace!("{}/{}: file {}/{}", server, share, file.folder, file.name);
                    self.sender
                        .send(FileRecord::tagged(server, share, file))
                        .map_err(|e| located(CrawlError::from(e)))?;
                }
            }
        }

        Ok(!walk.interrupted())
    }

    fn record(&self, server: &str, share: &str, outcome: ShareOutcome) {
        if let Err(e) = self.ctx.tracker.record_outcome(server, share, outcome) {
            error!(
                "server {}: could not record share {} as {:?}: {}",
                server, share, outcome, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::MemoryShareClient;
    use crate::db::{IndexStore, SqliteStore};
    use crate::error::CrawlErrorKind;
    use crate::models::ShareState;
    use crate::pipeline::ResultWriter;
    use std::sync::Arc;

    struct Fixture {
        store: Arc<SqliteStore>,
        tracker: ShareTracker,
        filter: ExclusionFilter,
        metrics: CrawlMetrics,
        credentials: Credentials,
        shutdown: AtomicBool,
    }

    impl Fixture {
        fn new(filter: ExclusionFilter) -> Self {
            let store = Arc::new(SqliteStore::open_memory().unwrap());
            Self {
                tracker: ShareTracker::new(store.clone()),
                store,
                filter,
                metrics: CrawlMetrics::new(),
                credentials: Credentials::new("crawler", "secret"),
                shutdown: AtomicBool::new(false),
            }
        }

        fn ctx(&self) -> TaskContext<'_> {
            TaskContext {
                tracker: &self.tracker,
                filter: &self.filter,
                metrics: &self.metrics,
                credentials: &self.credentials,
                shutdown: &self.shutdown,
                max_depth: 3,
                connect_timeout: Duration::from_secs(1),
            }
        }

        fn run(&self, client: &MemoryShareClient, server: &str) -> Result<ServerOutcome, CrawlError> {
            let writer = ResultWriter::spawn(self.store.clone(), 0).unwrap();
            let ctx = self.ctx();
            let result = ServerTask::new(client, &ctx, writer.sender()).run(server);
            writer.finish().unwrap();
            result
        }
    }

    #[test]
    fn test_share_states_and_records() {
        let client = MemoryShareClient::new()
            .with_file("S1", "public", "/docs/a.txt", 10)
            .with_file("S1", "public", "/bin/b.exe", 20)
            .with_share("S1", "admin");
        let fixture = Fixture::new(ExclusionFilter::new(["admin"], ["exe"]));

        let outcome = fixture.run(&client, "S1").unwrap();
        assert_eq!(outcome.shares_finished, 1);
        assert_eq!(outcome.shares_skipped, 1);
        assert!(!outcome.interrupted);

        assert_eq!(
            fixture.store.share_state("S1", "public").unwrap(),
            Some(ShareState::Finished)
        );
        assert!(!fixture.store.share_exists("S1", "admin").unwrap());
        assert_eq!(client.mount_count("S1", "admin"), 0);

        let files = fixture.store.files_for_share("S1", "public").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "a.txt");
        assert_eq!(files[0].folder, "/docs");
        assert_eq!(fixture.metrics.snapshot().shares, 1);
    }

    #[test]
    fn test_mount_failure_marks_share_failed() {
        let client = MemoryShareClient::new()
            .with_share("S1", "locked")
            .failing_mount("S1", "locked")
            .with_file("S1", "open", "/a.txt", 1);
        let fixture = Fixture::new(ExclusionFilter::default());

        let outcome = fixture.run(&client, "S1").unwrap();
        assert_eq!(outcome.shares_failed, 1);
        assert_eq!(outcome.shares_finished, 1);
        assert_eq!(
            fixture.store.share_state("S1", "locked").unwrap(),
            Some(ShareState::Failed)
        );
        assert_eq!(
            fixture.store.share_state("S1", "open").unwrap(),
            Some(ShareState::Finished)
        );
    }

    #[test]
    fn test_unreadable_share_root_marks_failed_and_unmounts() {
        let client = MemoryShareClient::new()
            .with_share("S1", "broken")
            .failing_folder("S1", "broken", "");
        let fixture = Fixture::new(ExclusionFilter::default());

        fixture.run(&client, "S1").unwrap();
        assert_eq!(
            fixture.store.share_state("S1", "broken").unwrap(),
            Some(ShareState::Failed)
        );
        assert_eq!(client.mount_count("S1", "broken"), 1);
        assert_eq!(client.open_mounts(), 0);
        assert_eq!(client.open_sessions(), 0);
    }

    #[test]
    fn test_connect_and_list_failures_end_task() {
        let client = MemoryShareClient::new()
            .failing_connect("B")
            .with_share("D", "data")
            .failing_list("D");
        let fixture = Fixture::new(ExclusionFilter::default());

        let err = fixture.run(&client, "B").unwrap_err();
        assert_eq!(err.kind, CrawlErrorKind::Connect);
        assert_eq!(err.server.as_deref(), Some("B"));

        let err = fixture.run(&client, "D").unwrap_err();
        assert_eq!(err.kind, CrawlErrorKind::ListShares);
        assert_eq!(client.open_sessions(), 0);
    }

    #[test]
    fn test_already_attempted_share_not_walked() {
        let client = MemoryShareClient::new().with_file("S1", "public", "/a.txt", 1);
        let fixture = Fixture::new(ExclusionFilter::default());
        fixture.store.insert_share_started("S1", "public").unwrap();
        fixture
            .store
            .update_share_state("S1", "public", ShareState::Failed)
            .unwrap();

        let outcome = fixture.run(&client, "S1").unwrap();
        assert_eq!(outcome.shares_skipped, 1);
        assert_eq!(client.mount_count("S1", "public"), 0);
        assert_eq!(
            fixture.store.share_state("S1", "public").unwrap(),
            Some(ShareState::Failed)
        );
        assert_eq!(fixture.store.file_count().unwrap(), 0);
    }

    /// A store where another run claims every share between the check and
    /// the insert
    #[derive(Default)]
    struct ClaimedElsewhere {
        updates: std::sync::Mutex<Vec<(String, ShareState)>>,
    }

    impl IndexStore for ClaimedElsewhere {
        fn insert_file(&self, _: &FileRecord) -> Result<(), StoreError> {
            Ok(())
        }

        fn insert_share_started(&self, server: &str, share: &str) -> Result<(), StoreError> {
            Err(StoreError::DuplicateShare {
                server: server.to_string(),
                share: share.to_string(),
            })
        }

        fn update_share_state(
            &self,
            _: &str,
            share: &str,
            state: ShareState,
        ) -> Result<(), StoreError> {
            self.updates.lock().unwrap().push((share.to_string(), state));
            Ok(())
        }

        fn share_exists(&self, _: &str, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    #[test]
    fn test_share_claimed_by_another_run_is_skipped() {
        let client = MemoryShareClient::new().with_file("S1", "public", "/a.txt", 1);
        let store = Arc::new(ClaimedElsewhere::default());
        let fixture = Fixture::new(ExclusionFilter::default());
        let tracker = ShareTracker::new(store.clone());
        let ctx = TaskContext {
            tracker: &tracker,
            ..fixture.ctx()
        };

        let writer = ResultWriter::spawn(store.clone(), 0).unwrap();
        let outcome = ServerTask::new(&client, &ctx, writer.sender())
            .run("S1")
            .unwrap();
        writer.finish().unwrap();

        assert_eq!(outcome.shares_skipped, 1);
        assert_eq!(outcome.shares_failed, 0);
        assert_eq!(client.mount_count("S1", "public"), 0);
        assert!(store.updates.lock().unwrap().is_empty());
        assert_eq!(fixture.metrics.snapshot().shares, 0);
    }

    #[test]
    fn test_shutdown_before_connect() {
        let client = MemoryShareClient::new().with_share("S1", "public");
        let fixture = Fixture::new(ExclusionFilter::default());
        fixture.shutdown.store(true, Ordering::SeqCst);

        let err = fixture.run(&client, "S1").unwrap_err();
        assert_eq!(err.kind, CrawlErrorKind::Interrupted);
        assert_eq!(client.connect_count(), 0);
    }
}
