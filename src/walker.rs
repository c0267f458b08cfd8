//! Depth-limited recursive walk of a mounted share
//!
//! [`Walk`] is a lazy, depth-first iterator over one share. It reads a
//! folder only when the walk descends into it, so files stream out while
//! the rest of the tree is still unread. Depth is the number of `/`
//! separators in a share-relative folder path (the root `""` is depth 0).
//!
//! Failures below the start folder are confined to their subtree: a
//! folder that cannot be read, or lies deeper than the limit, is logged and
//! skipped while its siblings are still walked.

use log::{debug, trace};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::client::{folder_depth, join_folder, ShareHandle};
use crate::error::WalkError;
use crate::filter::{extension_of, ExclusionFilter};
use crate::metrics::CrawlMetrics;
use crate::models::{DirEntry, FoundFile};

/// Item produced by a walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEvent {
    /// A folder was entered
    Folder(String),
    /// A file passed the exclusion filter
    File(FoundFile),
}

struct Frame {
    folder: String,
    entries: std::vec::IntoIter<DirEntry>,
}

/// Depth-first walk over a mounted share
///
/// Built with [`Walk::new`], optionally given a shutdown flag, then started
/// at a folder with [`Walk::start`]. A walk cannot be restarted; start a
/// new one instead.
pub struct Walk<'a, H: ShareHandle> {
    share: &'a H,
    filter: &'a ExclusionFilter,
    metrics: &'a CrawlMetrics,
    max_depth: usize,
    shutdown: Option<&'a AtomicBool>,
    stack: Vec<Frame>,
    interrupted: bool,
}

impl<'a, H: ShareHandle> Walk<'a, H> {
    pub fn new(
        share: &'a H,
        filter: &'a ExclusionFilter,
        metrics: &'a CrawlMetrics,
        max_depth: usize,
    ) -> Self {
        Self {
            share,
            filter,
            metrics,
            max_depth,
            shutdown: None,
            stack: Vec::new(),
            interrupted: false,
        }
    }

    /// Stop yielding once `flag` is set
    pub fn with_shutdown(mut self, flag: &'a AtomicBool) -> Self {
        self.shutdown = Some(flag);
        self
    }

    /// Open the start folder
    ///
    /// Failing to read the start folder fails the walk as a whole.
    pub fn start(mut self, folder: &str) -> Result<Self, WalkError> {
        let frame = self.open(folder)?;
        self.stack.push(frame);
        Ok(self)
    }

    /// Whether the walk stopped because shutdown was requested
    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    fn open(&self, folder: &str) -> Result<Frame, WalkError> {
        if folder_depth(folder) > self.max_depth {
            return Err(WalkError::DepthLimit {
                folder: folder.to_string(),
                max_depth: self.max_depth,
            });
        }

        let entries = self.share.read_dir(folder)?;
        Ok(Frame {
            folder: folder.to_string(),
            entries: entries.into_iter(),
        })
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

impl<H: ShareHandle> Iterator for Walk<'_, H> {
    type Item = WalkEvent;

    fn next(&mut self) -> Option<WalkEvent> {
        loop {
            if !self.stack.is_empty() && self.shutdown_requested() {
                self.interrupted = true;
                self.stack.clear();
            }

            let frame = self.stack.last_mut()?;
            let Some(entry) = frame.entries.next() else {
                self.stack.pop();
                continue;
            };

            if entry.is_dir {
                self.metrics.add_folder();
                let path = join_folder(&frame.folder, &entry.name);

                match self.open(&path) {
                    Ok(child) => {
                        self.stack.push(child);
                        return Some(WalkEvent::Folder(path));
                    }
                    Err(e) => {
                        debug!("could not read folder {}: {}", path, e);
                        continue;
                    }
                }
            }

            let extension = extension_of(&entry.name);
            if self.filter.should_skip_file(&extension) {
                trace!("excluded {}/{}", frame.folder, entry.name);
                continue;
            }

            self.metrics.add_file();
            return Some(WalkEvent::File(FoundFile {
                name: entry.name,
                folder: frame.folder.clone(),
                extension,
                size: entry.size,
                modified: entry.modified,
                mode: entry.mode,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::{MemoryMount, MemoryShareClient};
    use crate::client::{Credentials, Session, ShareClient};
    use proptest::prelude::*;
    use std::time::Duration;

    fn mount(client: &MemoryShareClient, server: &str, share: &str) -> MemoryMount {
        client
            .connect(server, &Credentials::default(), Duration::from_secs(1))
            .unwrap()
            .mount(share)
            .unwrap()
    }

    fn files(events: impl Iterator<Item = WalkEvent>) -> Vec<FoundFile> {
        events
            .filter_map(|e| match e {
                WalkEvent::File(f) => Some(f),
                WalkEvent::Folder(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_depth_first_order() {
        let client = MemoryShareClient::new()
            .with_file("S", "s", "/a/1.txt", 1)
            .with_file("S", "s", "/a/b/2.txt", 2)
            .with_file("S", "s", "/c/3.txt", 3);
        let share = mount(&client, "S", "s");
        let filter = ExclusionFilter::default();
        let metrics = CrawlMetrics::new();

        let events: Vec<_> = Walk::new(&share, &filter, &metrics, 3)
            .start("")
            .unwrap()
            .collect();

        let names: Vec<String> = events
            .iter()
            .map(|e| match e {
                WalkEvent::Folder(p) => p.clone(),
                WalkEvent::File(f) => format!("{}/{}", f.folder, f.name),
            })
            .collect();
        assert_eq!(
            names,
            vec!["/a", "/a/1.txt", "/a/b", "/a/b/2.txt", "/c", "/c/3.txt"]
        );

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.folders, 3);
        assert_eq!(snapshot.files, 3);
    }

    #[test]
    fn test_depth_limit_stops_descent() {
        let client = MemoryShareClient::new()
            .with_file("S", "s", "/top.txt", 1)
            .with_file("S", "s", "/d1/one.txt", 1)
            .with_file("S", "s", "/d1/d2/two.txt", 1)
            .with_file("S", "s", "/d1/d2/d3/three.txt", 1);
        let share = mount(&client, "S", "s");
        let filter = ExclusionFilter::default();
        let metrics = CrawlMetrics::new();

        let found = files(Walk::new(&share, &filter, &metrics, 2).start("").unwrap());
        let names: Vec<_> = found.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["top.txt", "one.txt", "two.txt"]);

        // the too-deep folder is still counted as visited
        assert_eq!(metrics.snapshot().folders, 3);
    }

    #[test]
    fn test_depth_zero_walks_root_only() {
        let client = MemoryShareClient::new()
            .with_file("S", "s", "/root.txt", 1)
            .with_file("S", "s", "/sub/nested.txt", 1);
        let share = mount(&client, "S", "s");
        let filter = ExclusionFilter::default();
        let metrics = CrawlMetrics::new();

        let found = files(Walk::new(&share, &filter, &metrics, 0).start("").unwrap());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "root.txt");
    }

    #[test]
    fn test_extension_filter_and_normalization() {
        let client = MemoryShareClient::new()
            .with_file("S", "s", "/a.EXE", 1)
            .with_file("S", "s", "/a.txt", 2)
            .with_file("S", "s", "/archive.TAR.GZ", 3)
            .with_file("S", "s", "/README", 4);
        let share = mount(&client, "S", "s");
        let filter = ExclusionFilter::new(Vec::<String>::new(), ["exe", "dll"]);
        let metrics = CrawlMetrics::new();

        let found = files(Walk::new(&share, &filter, &metrics, 3).start("").unwrap());
        let exts: Vec<_> = found
            .iter()
            .map(|f| (f.name.as_str(), f.extension.as_str()))
            .collect();
        assert_eq!(
            exts,
            vec![("a.txt", "txt"), ("archive.TAR.GZ", "gz"), ("README", "")]
        );
        assert_eq!(metrics.snapshot().files, 3);
    }

    #[test]
    fn test_unreadable_subfolder_skipped() {
        let client = MemoryShareClient::new()
            .with_file("S", "s", "/bad/hidden.txt", 1)
            .with_file("S", "s", "/good/visible.txt", 1)
            .failing_folder("S", "s", "/bad");
        let share = mount(&client, "S", "s");
        let filter = ExclusionFilter::default();
        let metrics = CrawlMetrics::new();

        let found = files(Walk::new(&share, &filter, &metrics, 3).start("").unwrap());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "visible.txt");
    }

    #[test]
    fn test_unreadable_start_fails() {
        let client = MemoryShareClient::new()
            .with_share("S", "s")
            .failing_folder("S", "s", "");
        let share = mount(&client, "S", "s");
        let filter = ExclusionFilter::default();
        let metrics = CrawlMetrics::new();

        assert!(matches!(
            Walk::new(&share, &filter, &metrics, 3).start(""),
            Err(WalkError::Protocol(_))
        ));
    }

    #[test]
    fn test_shutdown_interrupts() {
        let client = MemoryShareClient::new()
            .with_file("S", "s", "/a.txt", 1)
            .with_file("S", "s", "/b.txt", 1);
        let share = mount(&client, "S", "s");
        let filter = ExclusionFilter::default();
        let metrics = CrawlMetrics::new();
        let shutdown = AtomicBool::new(false);

        let mut walk = Walk::new(&share, &filter, &metrics, 3)
            .with_shutdown(&shutdown)
            .start("")
            .unwrap();
        assert!(walk.next().is_some());
        shutdown.store(true, Ordering::SeqCst);
        assert!(walk.next().is_none());
        assert!(walk.interrupted());
    }

    proptest! {
        #[test]
        fn prop_no_file_deeper_than_limit(
            depths in proptest::collection::vec(0usize..6, 1..12),
            max_depth in 0usize..5,
        ) {
            let mut client = MemoryShareClient::new().with_share("S", "s");
            for (i, depth) in depths.iter().enumerate() {
                let folder: String = (0..*depth).map(|d| format!("/d{d}")).collect();
                client = client.with_file("S", "s", &format!("{folder}/f{i}.txt"), 1);
            }
            let share = mount(&client, "S", "s");
            let filter = ExclusionFilter::default();
            let metrics = CrawlMetrics::new();

            let found = files(Walk::new(&share, &filter, &metrics, max_depth).start("").unwrap());
            for file in &found {
                prop_assert!(folder_depth(&file.folder) <= max_depth);
            }
            let expected = depths.iter().filter(|d| **d <= max_depth).count();
            prop_assert_eq!(found.len(), expected);
        }
    }
}
