//! Per-share scan state, the basis of resumable runs
//!
//! A share with any persisted row has been attempted and is skipped on
//! later runs, whatever its state. Failed shares are therefore not retried
//! automatically; `SqliteStore::reset_failed_shares` clears them.

use log::trace;
use std::sync::Arc;

use crate::db::IndexStore;
use crate::error::StoreError;
use crate::models::{ShareOutcome, ShareState};

/// Reads and records share scan state through the store
#[derive(Clone)]
pub struct ShareTracker {
    store: Arc<dyn IndexStore>,
}

impl ShareTracker {
    pub fn new(store: Arc<dyn IndexStore>) -> Self {
        Self { store }
    }

    /// Whether the share was attempted by any earlier run
    pub fn is_scanned(&self, server: &str, share: &str) -> Result<bool, StoreError> {
        self.store.share_exists(server, share)
    }

    /// Record that a walk of the share is starting
    ///
    /// Two runs racing on the same pair are settled by the store's primary
    /// key: the loser gets [`StoreError::DuplicateShare`].
    pub fn record_started(&self, server: &str, share: &str) -> Result<(), StoreError> {
        trace!("recording {}/{} as started", server, share);
        self.store.insert_share_started(server, share)
    }

    /// Record the terminal state of a share walk
    pub fn record_outcome(
        &self,
        server: &str,
        share: &str,
        outcome: ShareOutcome,
    ) -> Result<(), StoreError> {
        let state = ShareState::from(outcome);
        trace!("recording {}/{} as {}", server, share, state);
        self.store.update_share_state(server, share, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;

    fn tracker() -> (ShareTracker, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        (ShareTracker::new(store.clone()), store)
    }

    #[test]
    fn test_started_share_counts_as_scanned() {
        let (tracker, _) = tracker();
        assert!(!tracker.is_scanned("S1", "public").unwrap());
        tracker.record_started("S1", "public").unwrap();
        assert!(tracker.is_scanned("S1", "public").unwrap());
        assert!(!tracker.is_scanned("S1", "other").unwrap());
    }

    #[test]
    fn test_failed_share_is_still_scanned() {
        let (tracker, store) = tracker();
        tracker.record_started("S1", "public").unwrap();
        tracker
            .record_outcome("S1", "public", ShareOutcome::Failed)
            .unwrap();

        assert!(tracker.is_scanned("S1", "public").unwrap());
        assert_eq!(
            store.share_state("S1", "public").unwrap(),
            Some(ShareState::Failed)
        );
    }

    #[test]
    fn test_outcome_is_idempotent() {
        let (tracker, store) = tracker();
        tracker.record_started("S1", "public").unwrap();
        for _ in 0..2 {
            tracker
                .record_outcome("S1", "public", ShareOutcome::Finished)
                .unwrap();
        }
        assert_eq!(
            store.share_state("S1", "public").unwrap(),
            Some(ShareState::Finished)
        );
    }

    #[test]
    fn test_duplicate_start_surfaces_error() {
        let (tracker, _) = tracker();
        tracker.record_started("S1", "public").unwrap();
        assert!(matches!(
            tracker.record_started("S1", "public"),
            Err(StoreError::DuplicateShare { .. })
        ));
    }
}
