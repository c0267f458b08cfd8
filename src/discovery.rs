//! Target discovery and target-list assembly
//!
//! Targets come from a static list plus any number of [`Discovery`]
//! sources, queried once before the crawl starts. [`LdapDirectory`] runs
//! the directory search; wrap it in a [`DirectoryLookup`] to use it as a
//! source.

use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{LdapConn, LdapConnSettings, Scope, SearchEntry};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::DiscoveryError;

/// Default search filter selecting server machines
pub const DEFAULT_FILTER: &str = "(OperatingSystem=*server*)";

/// Attribute holding a machine's host name
const HOST_ATTRIBUTE: &str = "dNSHostName";

/// Entries per search page
const PAGE_SIZE: i32 = 50;

/// Search base derived from a bind DN: everything from its first `DC`
///
/// `CN=svc,OU=Users,DC=corp,DC=local` yields `DC=corp,DC=local`.
pub fn base_dn_from(bind_dn: &str) -> Result<String, DiscoveryError> {
    match bind_dn.split_once("DC") {
        Some((_, rest)) => Ok(format!("DC{}", rest)),
        None => Err(DiscoveryError::InvalidDn(bind_dn.to_string())),
    }
}

/// Parameters of one directory search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryQuery {
    pub url: String,
    pub bind_dn: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    pub base_dn: String,
    pub filter: String,
}

impl DirectoryQuery {
    /// Build a query with the base DN derived from `bind_dn`
    pub fn new(
        url: impl Into<String>,
        bind_dn: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, DiscoveryError> {
        let bind_dn = bind_dn.into();
        let base_dn = base_dn_from(&bind_dn)?;
        Ok(Self {
            url: url.into(),
            bind_dn,
            password: password.into(),
            base_dn,
            filter: DEFAULT_FILTER.to_string(),
        })
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }
}

/// A source of server names
pub trait Discovery {
    fn discover(&self) -> Result<Vec<String>, DiscoveryError>;
}

/// Directory-service client returning the host-name attribute of every
/// entry matching a query; entries without one yield an empty string
pub trait DirectoryService {
    fn search(&self, query: &DirectoryQuery) -> Result<Vec<String>, DiscoveryError>;
}

/// Discovery through a directory service
pub struct DirectoryLookup<D: DirectoryService> {
    service: D,
    query: DirectoryQuery,
}

impl<D: DirectoryService> DirectoryLookup<D> {
    pub fn new(service: D, query: DirectoryQuery) -> Self {
        Self { service, query }
    }
}

impl<D: DirectoryService> Discovery for DirectoryLookup<D> {
    fn discover(&self) -> Result<Vec<String>, DiscoveryError> {
        info!(
            "querying directory {} as {} (base {}, filter {})",
            self.query.url, self.query.bind_dn, self.query.base_dn, self.query.filter
        );

        let hosts: Vec<String> = self
            .service
            .search(&self.query)?
            .into_iter()
            .filter(|h| !h.is_empty())
            .collect();

        info!("retrieved {} servers from directory", hosts.len());
        Ok(hosts)
    }
}

/// LDAP client with a simple bind and a paged subtree search
///
/// TLS certificates are not verified.
#[derive(Debug, Clone)]
pub struct LdapDirectory {
    timeout: Duration,
}

impl LdapDirectory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl DirectoryService for LdapDirectory {
    fn search(&self, query: &DirectoryQuery) -> Result<Vec<String>, DiscoveryError> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.timeout)
            .set_no_tls_verify(true);
        let mut ldap = LdapConn::with_settings(settings, &query.url)?;
        ldap.simple_bind(&query.bind_dn, &query.password)?.success()?;

        let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(PAGE_SIZE)),
        ];
        let mut search = ldap.streaming_search_with(
            adapters,
            &query.base_dn,
            Scope::Subtree,
            &query.filter,
            vec![HOST_ATTRIBUTE],
        )?;

        let mut hosts = Vec::new();
        while let Some(entry) = search.next()? {
            let entry = SearchEntry::construct(entry);
            let host = entry
                .attrs
                .get(HOST_ATTRIBUTE)
                .and_then(|values| values.first())
                .cloned()
                .unwrap_or_default();
            hosts.push(host);
        }
        search.result().success()?;

        ldap.unbind()?;
        Ok(hosts)
    }
}

/// One server per line; blank lines and `#` comments are ignored
#[derive(Debug, Clone)]
pub struct HostsFile {
    path: PathBuf,
}

impl HostsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Discovery for HostsFile {
    fn discover(&self) -> Result<Vec<String>, DiscoveryError> {
        let contents = fs::read_to_string(&self.path).map_err(|source| DiscoveryError::Read {
            path: self.path.clone(),
            source,
        })?;

        let hosts: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();

        debug!("read {} hosts from {:?}", hosts.len(), self.path);
        Ok(hosts)
    }
}

/// Static servers followed by discovered ones, trimmed and deduplicated
/// keeping the first occurrence
pub fn collect_targets(
    servers: &[String],
    sources: &[&dyn Discovery],
) -> Result<Vec<String>, DiscoveryError> {
    let mut candidates: Vec<String> = servers.to_vec();
    for source in sources {
        candidates.extend(source.discover()?);
    }

    let mut seen = HashSet::new();
    let targets: Vec<String> = candidates
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_string()))
        .map(str::to_string)
        .collect();

    Ok(targets)
}
