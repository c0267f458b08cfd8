//! Protocol client capability set
//!
//! The crawler talks to file-share servers only through these traits:
//! connect a session, list share names, mount a share, read folders,
//! unmount and disconnect. Release is tied to [`SessionGuard`] and
//! [`MountGuard`] so it happens on every exit path.
//!
//! Two backends ship with the crate:
//! - [`local::LocalShareClient`] serves `<root>/<server>/<share>` trees from
//!   a local mount root
//! - `memory::MemoryShareClient` serves an in-memory fleet with failure
//!   injection (tests and the `test-support` feature only)

pub mod local;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use crate::error::ProtocolError;
use crate::models::DirEntry;

/// Username/password pair supplied at connect time
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub user: String,
    #[serde(default, skip_serializing)]
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Opens sessions to servers
pub trait ShareClient: Send + Sync {
    type Session: Session;

    /// Open an authenticated session, bounded by `timeout`
    fn connect(
        &self,
        address: &str,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Self::Session, ProtocolError>;
}

/// An authenticated session to one server
pub trait Session {
    type Share: ShareHandle;

    /// Share names in server order
    fn list_shares(&mut self) -> Result<Vec<String>, ProtocolError>;

    fn mount(&mut self, share: &str) -> Result<Self::Share, ProtocolError>;

    /// Log off and close the connection
    fn disconnect(&mut self);
}

/// A mounted share
pub trait ShareHandle {
    /// List one folder; `path` is relative to the share root, "" is the root
    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, ProtocolError>;

    fn unmount(&mut self);
}

/// Disconnects the wrapped session when dropped
pub struct SessionGuard<S: Session> {
    session: S,
}

impl<S: Session> SessionGuard<S> {
    pub fn new(session: S) -> Self {
        Self { session }
    }
}

impl<S: Session> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: Session> DerefMut for SessionGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

impl<S: Session> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        self.session.disconnect();
    }
}

/// Unmounts the wrapped share when dropped
pub struct MountGuard<H: ShareHandle> {
    share: H,
}

impl<H: ShareHandle> MountGuard<H> {
    pub fn new(share: H) -> Self {
        Self { share }
    }
}

impl<H: ShareHandle> Deref for MountGuard<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.share
    }
}

impl<H: ShareHandle> Drop for MountGuard<H> {
    fn drop(&mut self) {
        self.share.unmount();
    }
}

/// Share-relative folder path joined with an entry name
pub fn join_folder(folder: &str, name: &str) -> String {
    format!("{folder}/{name}")
}

/// Depth of a share-relative folder: its number of separators
pub fn folder_depth(folder: &str) -> usize {
    folder.matches('/').count()
}
