//! Configuration for the share crawler

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::Credentials;
use crate::discovery::{DirectoryQuery, DEFAULT_FILTER};
use crate::error::{ConfigError, DiscoveryError};
use crate::filter::ExclusionFilter;

/// Default max depth for recursive walking
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Default number of servers crawled concurrently
pub const DEFAULT_WORKERS: usize = 8;

/// Default connect timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default database file
pub const DEFAULT_DB_PATH: &str = "sqlite.db";

/// Default statistics interval in milliseconds
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 5000;

/// Configuration for a crawl run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Servers to crawl, in dispatch order
    pub servers: Vec<String>,

    /// File with one additional server per line
    pub hosts_file: Option<PathBuf>,

    /// Directory server URL (`ldap://` or `ldaps://`)
    pub ldap_server: Option<String>,

    /// Bind DN for the directory search; the search base is derived from it
    pub ldap_dn: Option<String>,

    /// Directory search filter
    pub ldap_filter: String,

    /// Credentials supplied at connect time
    pub credentials: Credentials,

    /// Maximum folder depth below a share root
    pub max_depth: usize,

    /// Servers crawled concurrently
    pub workers: usize,

    /// Session setup timeout in seconds
    pub connect_timeout_secs: u64,

    /// Share names to skip entirely
    pub exclude_shares: Vec<String>,

    /// File extensions to skip, with or without leading dot
    pub exclude_extensions: Vec<String>,

    /// Database path for share state and file records
    pub db_path: PathBuf,

    /// Writer channel capacity
    /// 0 makes every send wait for the writer
    pub queue_size: usize,

    /// Emit JSON progress lines on stderr instead of log statistics
    pub show_progress: bool,

    /// Statistics interval in milliseconds
    pub progress_interval_ms: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            hosts_file: None,
            ldap_server: None,
            ldap_dn: None,
            ldap_filter: DEFAULT_FILTER.to_string(),
            credentials: Credentials::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            workers: DEFAULT_WORKERS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            exclude_shares: Vec::new(),
            exclude_extensions: Vec::new(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            queue_size: 0,
            show_progress: false,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
        }
    }
}

impl CrawlConfig {
    /// Create a config builder
    pub fn builder() -> CrawlConfigBuilder {
        CrawlConfigBuilder::new()
    }

    /// Load a JSON config file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject settings the crawl cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidWorkerCount(self.workers));
        }
        if self.ldap_dn.is_some() && self.ldap_server.is_none() {
            return Err(ConfigError::MissingLdapServer);
        }
        Ok(())
    }

    /// Directory search for this run, if a bind DN is set
    ///
    /// The bind uses the crawl credentials' password.
    pub fn directory_query(&self) -> Result<Option<DirectoryQuery>, DiscoveryError> {
        let (Some(server), Some(dn)) = (&self.ldap_server, &self.ldap_dn) else {
            return Ok(None);
        };
        let query = DirectoryQuery::new(server.as_str(), dn.as_str(), &self.credentials.password)?
            .with_filter(&self.ldap_filter);
        Ok(Some(query))
    }

    /// Exclusion sets for this run
    pub fn exclusion_filter(&self) -> ExclusionFilter {
        ExclusionFilter::new(self.exclude_shares.iter().cloned(), &self.exclude_extensions)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

/// Split a comma-separated list, trimming items and dropping empty ones
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Builder for CrawlConfig
#[derive(Debug, Default)]
pub struct CrawlConfigBuilder {
    config: CrawlConfig,
}

impl CrawlConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config, e.g. one loaded from a file
    pub fn from_config(config: CrawlConfig) -> Self {
        Self { config }
    }

    /// Set the servers
    pub fn servers(mut self, servers: Vec<String>) -> Self {
        self.config.servers = servers;
        self
    }

    /// Add a server
    pub fn add_server(mut self, server: impl Into<String>) -> Self {
        self.config.servers.push(server.into());
        self
    }

    /// Set the hosts file
    pub fn hosts_file(mut self, path: PathBuf) -> Self {
        self.config.hosts_file = Some(path);
        self
    }

    /// Set the directory server URL
    pub fn ldap_server(mut self, url: impl Into<String>) -> Self {
        self.config.ldap_server = Some(url.into());
        self
    }

    /// Set the directory bind DN
    pub fn ldap_dn(mut self, bind_dn: impl Into<String>) -> Self {
        self.config.ldap_dn = Some(bind_dn.into());
        self
    }

    /// Set the directory search filter
    pub fn ldap_filter(mut self, filter: impl Into<String>) -> Self {
        self.config.ldap_filter = filter.into();
        self
    }

    /// Set the credentials
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Credentials::new(user, password);
        self
    }

    /// Set the maximum folder depth
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = depth;
        self
    }

    /// Set the number of concurrent servers
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Set the connect timeout in seconds
    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = secs;
        self
    }

    /// Set the share names to skip
    pub fn exclude_shares(mut self, shares: Vec<String>) -> Self {
        self.config.exclude_shares = shares;
        self
    }

    /// Set the extensions to skip
    pub fn exclude_extensions(mut self, extensions: Vec<String>) -> Self {
        self.config.exclude_extensions = extensions;
        self
    }

    /// Set the database path
    pub fn db_path(mut self, path: PathBuf) -> Self {
        self.config.db_path = path;
        self
    }

    /// Set the writer channel capacity
    pub fn queue_size(mut self, size: usize) -> Self {
        self.config.queue_size = size;
        self
    }

    /// Enable or disable JSON progress output
    pub fn show_progress(mut self, enabled: bool) -> Self {
        self.config.show_progress = enabled;
        self
    }

    /// Set the statistics interval
    pub fn progress_interval_ms(mut self, interval: u64) -> Self {
        self.config.progress_interval_ms = interval;
        self
    }

    /// Build the config
    pub fn build(self) -> CrawlConfig {
        self.config
    }
}
