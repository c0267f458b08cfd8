//! Filesystem-backed protocol client
//!
//! Serves servers whose shares are already exposed under a local mount
//! root, laid out as `<root>/<server>/<share>/...`. Connecting probes the
//! server directory on a helper thread so an unresponsive mount cannot
//! hold the caller past the connect timeout.
//!
//! Symbolic links are never followed and never listed.

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, RecvTimeoutError};
use log::{debug, trace};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::thread;
use std::time::Duration;
use walkdir::WalkDir;

use super::{Credentials, Session, ShareClient, ShareHandle};
use crate::error::ProtocolError;
use crate::models::DirEntry;

/// Protocol client over a local mount root
#[derive(Debug, Clone)]
pub struct LocalShareClient {
    root: PathBuf,
}

impl LocalShareClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// A name usable as a single path component
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn probe_dir(path: PathBuf, timeout: Duration) -> Result<(), String> {
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name("connect-probe".into())
        .spawn(move || {
            let result = fs::metadata(&path).map(|m| m.is_dir());
            let _ = tx.send(result);
        })
        .map_err(|e| e.to_string())?;

    match rx.recv_timeout(timeout) {
        Ok(Ok(true)) => Ok(()),
        Ok(Ok(false)) => Err("not a directory".to_string()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(RecvTimeoutError::Timeout) => Err("timeout".to_string()),
        Err(RecvTimeoutError::Disconnected) => Err("probe thread died".to_string()),
    }
}

/// Immediate children of `dir`, sorted by name
fn list_children(dir: &Path) -> Result<Vec<walkdir::DirEntry>, String> {
    let mut children = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        match entry {
            Ok(entry) => children.push(entry),
            Err(e) if e.depth() == 0 => return Err(e.to_string()),
            Err(e) => trace!("skipping unreadable entry in {:?}: {}", dir, e),
        }
    }
    Ok(children)
}

#[cfg(unix)]
fn mode_bits(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn mode_bits(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

impl ShareClient for LocalShareClient {
    type Session = LocalSession;

    fn connect(
        &self,
        address: &str,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<LocalSession, ProtocolError> {
        if !is_plain_name(address) {
            return Err(ProtocolError::Connect {
                address: address.to_string(),
                reason: "invalid server name".to_string(),
            });
        }

        let base = self.root.join(address);
        debug!("probing {:?} as {}", base, credentials.user);

        probe_dir(base.clone(), timeout).map_err(|reason| {
            if reason == "timeout" {
                ProtocolError::Timeout {
                    address: address.to_string(),
                    secs: timeout.as_secs(),
                }
            } else {
                ProtocolError::Connect {
                    address: address.to_string(),
                    reason,
                }
            }
        })?;

        Ok(LocalSession { base })
    }
}

/// Session to a server directory
#[derive(Debug)]
pub struct LocalSession {
    base: PathBuf,
}

impl Session for LocalSession {
    type Share = LocalShare;

    fn list_shares(&mut self) -> Result<Vec<String>, ProtocolError> {
        let children = list_children(&self.base).map_err(ProtocolError::ListShares)?;
        Ok(children
            .into_iter()
            .filter(|e| e.file_type().is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect())
    }

    fn mount(&mut self, share: &str) -> Result<LocalShare, ProtocolError> {
        let root = self.base.join(share);
        if !is_plain_name(share) || !root.is_dir() {
            return Err(ProtocolError::Mount {
                share: share.to_string(),
                reason: "bad network name".to_string(),
            });
        }
        Ok(LocalShare { root })
    }

    fn disconnect(&mut self) {
        trace!("disconnecting {:?}", self.base);
    }
}

/// Share directory under a server directory
#[derive(Debug)]
pub struct LocalShare {
    root: PathBuf,
}

impl LocalShare {
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let mut dir = self.root.clone();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if !is_plain_name(part) {
                return None;
            }
            dir.push(part);
        }
        Some(dir)
    }
}

impl ShareHandle for LocalShare {
    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, ProtocolError> {
        let dir = self.resolve(path).ok_or_else(|| ProtocolError::ReadDir {
            path: path.to_string(),
            reason: "invalid path".to_string(),
        })?;

        let children = list_children(&dir).map_err(|reason| ProtocolError::ReadDir {
            path: path.to_string(),
            reason,
        })?;

        let mut entries = Vec::with_capacity(children.len());
        for child in children {
            let Some(name) = child.file_name().to_str() else {
                trace!("skipping non UTF-8 name in {:?}", dir);
                continue;
            };
            if child.path_is_symlink() {
                trace!("skipping symlink {:?}", child.path());
                continue;
            }
            let metadata = match child.metadata() {
                Ok(m) => m,
                Err(e) => {
                    trace!("skipping {:?}: {}", child.path(), e);
                    continue;
                }
            };
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_default();

            let entry = if metadata.is_dir() {
                DirEntry::dir(name)
            } else {
                DirEntry::file(name, metadata.len())
            };
            entries.push(entry.with_modified(modified).with_mode(mode_bits(&metadata)));
        }
        Ok(entries)
    }

    fn unmount(&mut self) {
        trace!("unmounting {:?}", self.root);
    }
}
