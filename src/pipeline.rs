//! Single-writer persistence of file records
//!
//! Crawl tasks send [`FileRecord`]s into a bounded channel; one dedicated
//! thread drains it and inserts each record through the store. This is the
//! only execution context that writes file records.
//!
//! ```text
//!  task 1 ──┐
//!  task 2 ──┼──► bounded channel ──► db-writer thread ──► IndexStore
//!  task N ──┘    (send blocks when full)
//! ```
//!
//! A failed insert is logged and the record dropped; the writer keeps
//! going. With `queue_size == 0` every send waits for the writer to take
//! the record.

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::db::IndexStore;
use crate::error::StoreError;
use crate::models::FileRecord;

/// Counters kept by the writer thread
#[derive(Debug, Default)]
pub struct WriterStats {
    persisted: AtomicU64,
    dropped: AtomicU64,
}

impl WriterStats {
    /// Records inserted so far
    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::Relaxed)
    }

    /// Records the store rejected so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Final writer counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterSummary {
    pub persisted: u64,
    pub dropped: u64,
}

/// Producer side of the writer channel
#[derive(Clone)]
pub struct RecordSender {
    sender: Sender<FileRecord>,
}

impl RecordSender {
    /// Hand a record to the writer, blocking while the channel is full
    pub fn send(&self, record: FileRecord) -> Result<(), StoreError> {
        self.sender
            .send(record)
            .map_err(|_| StoreError::ChannelClosed)
    }
}

/// The writer thread and the sender it was spawned with
pub struct ResultWriter {
    handle: JoinHandle<()>,
    sender: Sender<FileRecord>,
    stats: Arc<WriterStats>,
}

impl ResultWriter {
    /// Spawn the writer thread
    pub fn spawn(store: Arc<dyn IndexStore>, queue_size: usize) -> Result<Self, StoreError> {
        let (sender, receiver) = bounded(queue_size);
        let stats = Arc::new(WriterStats::default());
        let thread_stats = Arc::clone(&stats);

        let handle = thread::Builder::new()
            .name("db-writer".into())
            .spawn(move || writer_loop(store, receiver, thread_stats))
            .map_err(|e| StoreError::Writer(format!("failed to spawn writer thread: {}", e)))?;

        Ok(Self {
            handle,
            sender,
            stats,
        })
    }

    /// A new producer handle
    pub fn sender(&self) -> RecordSender {
        RecordSender {
            sender: self.sender.clone(),
        }
    }

    /// Close the channel, drain it and join the writer thread
    ///
    /// Every [`RecordSender`] must be dropped first, or this waits for them.
    pub fn finish(self) -> Result<WriterSummary, StoreError> {
        let Self {
            handle,
            sender,
            stats,
        } = self;
        drop(sender);

        handle
            .join()
            .map_err(|_| StoreError::Writer("writer thread panicked".into()))?;

        Ok(WriterSummary {
            persisted: stats.persisted(),
            dropped: stats.dropped(),
        })
    }
}

fn writer_loop(store: Arc<dyn IndexStore>, receiver: Receiver<FileRecord>, stats: Arc<WriterStats>) {
    for record in receiver.iter() {
        match store.insert_file(&record) {
            Ok(()) => {
                stats.persisted.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                error!(
                    "unable to save {}/{}{}/{}: {}",
                    record.server, record.share, record.folder, record.name, e
                );
            }
        }
    }
    debug!("writer drained, {} records persisted", stats.persisted());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::models::ShareState;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    fn record(server: &str, name: &str) -> FileRecord {
        FileRecord {
            server: server.to_string(),
            share: "data".to_string(),
            name: name.to_string(),
            folder: String::new(),
            extension: crate::filter::extension_of(name),
            size: 1,
            modified: DateTime::<Utc>::default(),
            mode: 0o644,
        }
    }

    /// Rejects records named "poison", remembers the rest in order
    #[derive(Default)]
    struct PickyStore {
        names: Mutex<Vec<String>>,
    }

    impl IndexStore for PickyStore {
        fn insert_file(&self, record: &FileRecord) -> Result<(), StoreError> {
            if record.name == "poison" {
                return Err(StoreError::Writer("rejected".into()));
            }
            self.names.lock().unwrap().push(record.name.clone());
            Ok(())
        }

        fn insert_share_started(&self, _: &str, _: &str) -> Result<(), StoreError> {
            Ok(())
        }

        fn update_share_state(&self, _: &str, _: &str, _: ShareState) -> Result<(), StoreError> {
            Ok(())
        }

        fn share_exists(&self, _: &str, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    #[test]
    fn test_persist_error_does_not_stop_writer() {
        let store = Arc::new(PickyStore::default());
        let writer = ResultWriter::spawn(store.clone(), 0).unwrap();
        let sender = writer.sender();

        sender.send(record("S1", "a")).unwrap();
        sender.send(record("S1", "poison")).unwrap();
        sender.send(record("S1", "b")).unwrap();
        drop(sender);

        let summary = writer.finish().unwrap();
        assert_eq!(summary, WriterSummary { persisted: 2, dropped: 1 });
        assert_eq!(*store.names.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_many_producers_no_loss() {
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        let writer = ResultWriter::spawn(store.clone(), 4).unwrap();

        thread::scope(|scope| {
            for producer in 0..6 {
                let sender = writer.sender();
                scope.spawn(move || {
                    for i in 0..50 {
                        sender
                            .send(record(&format!("S{producer}"), &format!("f{i}.txt")))
                            .unwrap();
                    }
                });
            }
        });

        let summary = writer.finish().unwrap();
        assert_eq!(summary.persisted, 300);
        assert_eq!(store.file_count().unwrap(), 300);
    }

    #[test]
    fn test_per_producer_order_preserved() {
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        let writer = ResultWriter::spawn(store.clone(), 0).unwrap();

        thread::scope(|scope| {
            for producer in 0..3 {
                let sender = writer.sender();
                scope.spawn(move || {
                    for i in 0..20 {
                        sender
                            .send(record(&format!("S{producer}"), &format!("{i:02}")))
                            .unwrap();
                    }
                });
            }
        });
        writer.finish().unwrap();

        for producer in 0..3 {
            let names: Vec<_> = store
                .files_for_share(&format!("S{producer}"), "data")
                .unwrap()
                .into_iter()
                .map(|r| r.name)
                .collect();
            let expected: Vec<_> = (0..20).map(|i| format!("{i:02}")).collect();
            assert_eq!(names, expected);
        }
    }

    #[test]
    fn test_send_after_writer_gone() {
        let (sender, receiver) = bounded::<FileRecord>(1);
        drop(receiver);
        let sender = RecordSender { sender };
        assert!(matches!(
            sender.send(record("S1", "a")),
            Err(StoreError::ChannelClosed)
        ));
    }
}
