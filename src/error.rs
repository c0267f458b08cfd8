//! Error types for the share crawler
//!
//! Each collaborator seam has its own error type (protocol client, store,
//! configuration, discovery). Crawl-level failures are reported as a
//! [`CrawlError`] that carries the server/share it happened on and a kind
//! that maps onto the scope the failure is confined to.

use std::path::PathBuf;
use thiserror::Error;

use crate::models::ShareState;

/// Errors raised by a protocol client implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Session could not be established
    #[error("unable to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    /// Session setup exceeded the connect timeout
    #[error("connection to {address} timed out after {secs}s")]
    Timeout { address: String, secs: u64 },

    /// Share names could not be listed
    #[error("unable to list shares: {0}")]
    ListShares(String),

    /// Share could not be mounted
    #[error("could not mount {share}: {reason}")]
    Mount { share: String, reason: String },

    /// Folder could not be opened or read
    #[error("could not open folder {path}: {reason}")]
    ReadDir { path: String, reason: String },
}

/// Errors raised by a persistent store implementation
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A share row already exists for the pair
    #[error("share {server}/{share} is already recorded")]
    DuplicateShare { server: String, share: String },

    /// A stored share state could not be parsed
    #[error("unknown share state '{0}'")]
    UnknownState(String),

    /// Share state update hit no row
    #[error("no share row for {server}/{share} to set {state}")]
    MissingShare {
        server: String,
        share: String,
        state: ShareState,
    },

    /// The connection mutex was poisoned by a panicking writer
    #[error("store lock poisoned")]
    Poisoned,

    /// The result writer is gone
    #[error("result writer channel closed")]
    ChannelClosed,

    /// The result writer thread could not be started or joined
    #[error("result writer failed: {0}")]
    Writer(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Worker pool must have at least one slot
    #[error("invalid worker count {0}: must be at least 1")]
    InvalidWorkerCount(usize),

    /// Config file could not be read
    #[error("unable to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON for the options struct
    #[error("unable to parse config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Worker pool could not be built
    #[error("unable to build worker pool: {0}")]
    Pool(String),

    /// A bind DN was given without a directory server
    #[error("an LDAP bind DN needs an LDAP server")]
    MissingLdapServer,
}

/// Errors raised while assembling the target list
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Bind DN carries no DC component to derive the search base from
    #[error("invalid DN '{0}', could not extract base DN")]
    InvalidDn(String),

    /// Hosts file could not be read
    #[error("unable to read hosts file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory-service lookup failed
    #[error("directory lookup failed: {0}")]
    Lookup(String),

    /// LDAP connect, bind or search failed
    #[error("LDAP error: {0}")]
    Ldap(#[from] ldap3::LdapError),
}

/// Errors that end a walk before its sequence is exhausted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalkError {
    /// Folder lies deeper than the configured maximum
    #[error("max depth {max_depth} reached at {folder}")]
    DepthLimit { folder: String, max_depth: usize },

    /// Folder listing failed
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// How far a failure reaches before the crawl can carry on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// The whole run aborts
    Run,
    /// One server's task ends, other servers continue
    Server,
    /// One share is marked failed, sibling shares continue
    Share,
    /// One folder subtree is skipped, sibling folders continue
    Subtree,
    /// One record is dropped, the writer continues
    Record,
}

/// Error kinds that can occur while crawling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlErrorKind {
    /// Store could not be opened or queried
    Store,
    /// Configuration is unusable
    Config,
    /// Session could not be established
    Connect,
    /// Share listing failed
    ListShares,
    /// Share could not be mounted
    Mount,
    /// Share walk failed
    Walk,
    /// Folder deeper than the configured maximum
    DepthLimit,
    /// A record could not be handed to or written by the writer
    Persist,
    /// Target list could not be assembled
    Discovery,
    /// Shutdown was requested
    Interrupted,
}

impl CrawlErrorKind {
    /// Scope the failure is confined to
    pub fn scope(&self) -> ErrorScope {
        match self {
            CrawlErrorKind::Config | CrawlErrorKind::Discovery => ErrorScope::Run,
            CrawlErrorKind::Store => ErrorScope::Run,
            CrawlErrorKind::Connect | CrawlErrorKind::ListShares => ErrorScope::Server,
            CrawlErrorKind::Interrupted => ErrorScope::Server,
            CrawlErrorKind::Mount | CrawlErrorKind::Walk => ErrorScope::Share,
            CrawlErrorKind::DepthLimit => ErrorScope::Subtree,
            CrawlErrorKind::Persist => ErrorScope::Record,
        }
    }
}

/// Represents an error that occurred during a crawl
#[derive(Debug, Error)]
#[error("{kind:?}: {message}{}", location(.server, .share))]
pub struct CrawlError {
    /// The kind of error
    pub kind: CrawlErrorKind,
    /// Server the error happened on
    pub server: Option<String>,
    /// Share the error happened on
    pub share: Option<String>,
    /// Human-readable error message
    pub message: String,
}

fn location(server: &Option<String>, share: &Option<String>) -> String {
    match (server, share) {
        (Some(server), Some(share)) => format!(" (share: {server}/{share})"),
        (Some(server), None) => format!(" (server: {server})"),
        _ => String::new(),
    }
}

impl CrawlError {
    /// Create a new crawl error
    pub fn new(kind: CrawlErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            server: None,
            share: None,
            message: message.into(),
        }
    }

    /// Create an interruption error
    pub fn interrupted() -> Self {
        Self::new(CrawlErrorKind::Interrupted, "shutdown requested")
    }

    /// Attach the server the error happened on
    pub fn on_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Attach the share the error happened on
    pub fn on_share(mut self, share: impl Into<String>) -> Self {
        self.share = Some(share.into());
        self
    }

    /// Scope the failure is confined to
    pub fn scope(&self) -> ErrorScope {
        self.kind.scope()
    }
}

impl From<ProtocolError> for CrawlError {
    fn from(err: ProtocolError) -> Self {
        let kind = match err {
            ProtocolError::Connect { .. } | ProtocolError::Timeout { .. } => {
                CrawlErrorKind::Connect
            }
            ProtocolError::ListShares(_) => CrawlErrorKind::ListShares,
            ProtocolError::Mount { .. } => CrawlErrorKind::Mount,
            ProtocolError::ReadDir { .. } => CrawlErrorKind::Walk,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<WalkError> for CrawlError {
    fn from(err: WalkError) -> Self {
        match err {
            WalkError::DepthLimit { .. } => Self::new(CrawlErrorKind::DepthLimit, err.to_string()),
            WalkError::Protocol(inner) => Self::new(CrawlErrorKind::Walk, inner.to_string()),
        }
    }
}

impl From<StoreError> for CrawlError {
    fn from(err: StoreError) -> Self {
        let kind = match err {
            StoreError::ChannelClosed | StoreError::Writer(_) => CrawlErrorKind::Persist,
            _ => CrawlErrorKind::Store,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<ConfigError> for CrawlError {
    fn from(err: ConfigError) -> Self {
        Self::new(CrawlErrorKind::Config, err.to_string())
    }
}

impl From<DiscoveryError> for CrawlError {
    fn from(err: DiscoveryError) -> Self {
        Self::new(CrawlErrorKind::Discovery, err.to_string())
    }
}
