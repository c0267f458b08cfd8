//! In-memory fleet of share servers
//!
//! Builds servers, shares, folders and files programmatically and lets a
//! caller inject failures at every protocol step. Session and mount
//! activity is recorded so callers can check release and concurrency.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use super::{join_folder, Credentials, Session, ShareClient, ShareHandle};
use crate::error::ProtocolError;
use crate::models::DirEntry;

#[derive(Debug, Clone)]
struct MemoryShare {
    folders: BTreeMap<String, Vec<DirEntry>>,
    fail_mount: bool,
    failing_folders: HashSet<String>,
}

impl MemoryShare {
    fn new() -> Self {
        let mut folders = BTreeMap::new();
        folders.insert(String::new(), Vec::new());
        Self {
            folders,
            fail_mount: false,
            failing_folders: HashSet::new(),
        }
    }

    /// Create every folder along `path`, returning its canonical form
    fn ensure_folder(&mut self, path: &str) -> String {
        let mut parent = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            let child = join_folder(&parent, part);
            let siblings = self.folders.entry(parent.clone()).or_default();
            if !siblings.iter().any(|e| e.is_dir && e.name == part) {
                siblings.push(DirEntry::dir(part));
            }
            self.folders.entry(child.clone()).or_default();
            parent = child;
        }
        parent
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryServer {
    shares: Vec<(String, Arc<MemoryShare>)>,
    fail_connect: bool,
    fail_list: bool,
}

#[derive(Debug, Default)]
struct Activity {
    connects: usize,
    active_sessions: usize,
    peak_sessions: usize,
    mounts: HashMap<(String, String), usize>,
    active_mounts: usize,
}

/// Protocol client backed by an in-memory fleet
#[derive(Debug, Clone, Default)]
pub struct MemoryShareClient {
    servers: HashMap<String, Arc<MemoryServer>>,
    read_delay: Duration,
    activity: Arc<Mutex<Activity>>,
}

impl MemoryShareClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn server_mut(&mut self, server: &str) -> &mut MemoryServer {
        Arc::make_mut(self.servers.entry(server.to_string()).or_default())
    }

    fn share_mut(&mut self, server: &str, share: &str) -> &mut MemoryShare {
        let server = self.server_mut(server);
        let idx = match server.shares.iter().position(|(name, _)| name == share) {
            Some(idx) => idx,
            None => {
                server
                    .shares
                    .push((share.to_string(), Arc::new(MemoryShare::new())));
                server.shares.len() - 1
            }
        };
        Arc::make_mut(&mut server.shares[idx].1)
    }

    /// Add an empty share; shares are listed in insertion order
    pub fn with_share(mut self, server: &str, share: &str) -> Self {
        self.share_mut(server, share);
        self
    }

    /// Add a folder (and its parents) such as `/docs/reports`
    pub fn with_dir(mut self, server: &str, share: &str, path: &str) -> Self {
        self.share_mut(server, share).ensure_folder(path);
        self
    }

    /// Add a file such as `/docs/a.txt` with the given size
    pub fn with_file(self, server: &str, share: &str, path: &str, size: u64) -> Self {
        let (folder, name) = path.rsplit_once('/').unwrap_or(("", path));
        self.with_entry(server, share, folder, DirEntry::file(name, size))
    }

    /// Add a raw listing entry to `folder`
    pub fn with_entry(mut self, server: &str, share: &str, folder: &str, entry: DirEntry) -> Self {
        let data = self.share_mut(server, share);
        let folder = data.ensure_folder(folder);
        if entry.is_dir {
            data.ensure_folder(&join_folder(&folder, &entry.name));
        } else {
            data.folders.entry(folder).or_default().push(entry);
        }
        self
    }

    pub fn failing_connect(mut self, server: &str) -> Self {
        self.server_mut(server).fail_connect = true;
        self
    }

    pub fn failing_list(mut self, server: &str) -> Self {
        self.server_mut(server).fail_list = true;
        self
    }

    pub fn failing_mount(mut self, server: &str, share: &str) -> Self {
        self.share_mut(server, share).fail_mount = true;
        self
    }

    /// Make reads of one folder fail
    pub fn failing_folder(mut self, server: &str, share: &str, folder: &str) -> Self {
        let data = self.share_mut(server, share);
        let folder = data.ensure_folder(folder);
        data.failing_folders.insert(folder);
        self
    }

    /// Delay every folder read, to hold sessions open
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    fn activity(&self) -> MutexGuard<'_, Activity> {
        lock(&self.activity)
    }

    /// Times a share was mounted
    pub fn mount_count(&self, server: &str, share: &str) -> usize {
        self.activity()
            .mounts
            .get(&(server.to_string(), share.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Successful connects across all servers
    pub fn connect_count(&self) -> usize {
        self.activity().connects
    }

    /// Sessions connected but not yet disconnected
    pub fn open_sessions(&self) -> usize {
        self.activity().active_sessions
    }

    /// Highest number of sessions open at the same time
    pub fn peak_sessions(&self) -> usize {
        self.activity().peak_sessions
    }

    /// Shares mounted but not yet unmounted
    pub fn open_mounts(&self) -> usize {
        self.activity().active_mounts
    }
}

fn lock(activity: &Mutex<Activity>) -> MutexGuard<'_, Activity> {
    activity.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ShareClient for MemoryShareClient {
    type Session = MemorySession;

    fn connect(
        &self,
        address: &str,
        _credentials: &Credentials,
        _timeout: Duration,
    ) -> Result<MemorySession, ProtocolError> {
        let server = self
            .servers
            .get(address)
            .ok_or_else(|| ProtocolError::Connect {
                address: address.to_string(),
                reason: "no route to host".to_string(),
            })?;

        if server.fail_connect {
            return Err(ProtocolError::Connect {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        {
            let mut activity = self.activity();
            activity.connects += 1;
            activity.active_sessions += 1;
            activity.peak_sessions = activity.peak_sessions.max(activity.active_sessions);
        }

        Ok(MemorySession {
            address: address.to_string(),
            server: Arc::clone(server),
            read_delay: self.read_delay,
            activity: Arc::clone(&self.activity),
            connected: true,
        })
    }
}

/// Session to an in-memory server
#[derive(Debug)]
pub struct MemorySession {
    address: String,
    server: Arc<MemoryServer>,
    read_delay: Duration,
    activity: Arc<Mutex<Activity>>,
    connected: bool,
}

impl Session for MemorySession {
    type Share = MemoryMount;

    fn list_shares(&mut self) -> Result<Vec<String>, ProtocolError> {
        if self.server.fail_list {
            return Err(ProtocolError::ListShares("access denied".to_string()));
        }
        Ok(self.server.shares.iter().map(|(name, _)| name.clone()).collect())
    }

    fn mount(&mut self, share: &str) -> Result<MemoryMount, ProtocolError> {
        let data = self
            .server
            .shares
            .iter()
            .find(|(name, _)| name == share)
            .map(|(_, data)| Arc::clone(data))
            .ok_or_else(|| ProtocolError::Mount {
                share: share.to_string(),
                reason: "bad network name".to_string(),
            })?;

        if data.fail_mount {
            return Err(ProtocolError::Mount {
                share: share.to_string(),
                reason: "access denied".to_string(),
            });
        }

        {
            let mut activity = lock(&self.activity);
            *activity
                .mounts
                .entry((self.address.clone(), share.to_string()))
                .or_default() += 1;
            activity.active_mounts += 1;
        }

        Ok(MemoryMount {
            data,
            read_delay: self.read_delay,
            activity: Arc::clone(&self.activity),
            mounted: true,
        })
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            lock(&self.activity).active_sessions -= 1;
        }
    }
}

/// Mounted in-memory share
#[derive(Debug)]
pub struct MemoryMount {
    data: Arc<MemoryShare>,
    read_delay: Duration,
    activity: Arc<Mutex<Activity>>,
    mounted: bool,
}

impl ShareHandle for MemoryMount {
    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, ProtocolError> {
        if !self.read_delay.is_zero() {
            thread::sleep(self.read_delay);
        }

        if self.data.failing_folders.contains(path) {
            return Err(ProtocolError::ReadDir {
                path: path.to_string(),
                reason: "access denied".to_string(),
            });
        }

        self.data
            .folders
            .get(path)
            .cloned()
            .ok_or_else(|| ProtocolError::ReadDir {
                path: path.to_string(),
                reason: "not found".to_string(),
            })
    }

    fn unmount(&mut self) {
        if self.mounted {
            self.mounted = false;
            lock(&self.activity).active_mounts -= 1;
        }
    }
}
