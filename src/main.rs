//! Share Crawler CLI
//!
//! Crawls file shares across a fleet of servers and indexes every file
//! into SQLite.

use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{error, info, warn};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use share_crawler::client::local::LocalShareClient;
use share_crawler::config::CrawlConfigBuilder;
use share_crawler::{
    collect_targets, parse_list, CrawlConfig, CrawlError, CrawlErrorKind, CrawlSummary, Crawler,
    DirectoryLookup, Discovery, HostsFile, LdapDirectory, ProgressReporter, ReportFormat,
    SqliteStore, StatsTicker,
};

const ABOUT: &str = r#"
Share Crawler - fleet-wide file share indexer

Examples:
  share_crawler crawl -r /mnt/fleet -s fs01,fs02           crawl two servers
  share_crawler crawl -r /mnt/fleet --hosts-file hosts.txt  crawl servers from a file
  share_crawler crawl -r /mnt/fleet -u svc --ldap-server ldaps://dc01 \
      --ldap-dn 'CN=svc,OU=Users,DC=corp,DC=local'         crawl servers found in LDAP
  share_crawler crawl -r /mnt/fleet -s fs01 --exclude-shares 'ADMIN$,C$'
  share_crawler crawl -r /mnt/fleet -s fs01 --exclude-extensions exe,dll
  share_crawler reset-failed -d sqlite.db                   retry failed shares next run
"#;

/// Fleet-wide file share crawler
#[derive(Parser)]
#[command(name = "share_crawler")]
#[command(author, version, about = ABOUT, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl servers and index their shares
    Crawl(CrawlArgs),

    /// Delete failed share rows so the next crawl attempts them again
    ResetFailed {
        /// SQLite database file
        #[arg(short = 'd', long, default_value = "sqlite.db")]
        db: PathBuf,
    },
}

#[derive(Args)]
struct CrawlArgs {
    /// Servers to crawl, separated by a comma
    #[arg(short = 's', long)]
    server: Option<String>,

    /// File with one server per line
    #[arg(long)]
    hosts_file: Option<PathBuf>,

    /// LDAP server URL to fetch the server list from
    #[arg(long)]
    ldap_server: Option<String>,

    /// LDAP bind DN; the search base is derived from it
    #[arg(long)]
    ldap_dn: Option<String>,

    /// LDAP filter selecting servers [default: (OperatingSystem=*server*)]
    #[arg(long)]
    ldap_filter: Option<String>,

    /// Local mount root holding <server>/<share> directories
    #[arg(short = 'r', long)]
    root: PathBuf,

    /// Username
    #[arg(short = 'u', long)]
    user: Option<String>,

    /// Password (prompted for when a user is given without one)
    #[arg(short = 'p', long)]
    pass: Option<String>,

    /// SQLite database file [default: sqlite.db]
    #[arg(short = 'd', long)]
    db: Option<PathBuf>,

    /// Maximum folder depth below a share root [default: 3]
    #[arg(long)]
    max_depth: Option<usize>,

    /// Servers crawled concurrently [default: 8]
    #[arg(short = 'w', long)]
    workers: Option<usize>,

    /// Connect timeout in seconds [default: 5]
    #[arg(short = 't', long)]
    timeout: Option<u64>,

    /// Share names to exclude, separated by a comma
    #[arg(long)]
    exclude_shares: Option<String>,

    /// File extensions to exclude, separated by a comma
    #[arg(long)]
    exclude_extensions: Option<String>,

    /// Writer queue capacity [default: 0]
    #[arg(long)]
    queue_size: Option<usize>,

    /// Emit JSON progress lines on stderr
    #[arg(long)]
    progress: bool,

    /// Print the crawl summary as JSON
    #[arg(long)]
    json: bool,

    /// JSON config file; flags override its values
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
}

impl CrawlArgs {
    /// Config file (or defaults) with command-line overrides applied
    fn to_config(&self) -> Result<CrawlConfig, CrawlError> {
        let base = match &self.config {
            Some(path) => CrawlConfig::load(path)?,
            None => CrawlConfig::default(),
        };
        let user = self.user.clone().unwrap_or_else(|| base.credentials.user.clone());
        let pass = self.pass.clone().unwrap_or_else(|| base.credentials.password.clone());
        let mut builder = CrawlConfigBuilder::from_config(base).credentials(user, pass);

        if let Some(server) = &self.server {
            builder = builder.servers(parse_list(server));
        }
        if let Some(path) = &self.hosts_file {
            builder = builder.hosts_file(path.clone());
        }
        if let Some(url) = &self.ldap_server {
            builder = builder.ldap_server(url.clone());
        }
        if let Some(dn) = &self.ldap_dn {
            builder = builder.ldap_dn(dn.clone());
        }
        if let Some(filter) = &self.ldap_filter {
            builder = builder.ldap_filter(filter.clone());
        }
        if let Some(db) = &self.db {
            builder = builder.db_path(db.clone());
        }
        if let Some(depth) = self.max_depth {
            builder = builder.max_depth(depth);
        }
        if let Some(workers) = self.workers {
            builder = builder.workers(workers);
        }
        if let Some(secs) = self.timeout {
            builder = builder.connect_timeout_secs(secs);
        }
        if let Some(shares) = &self.exclude_shares {
            builder = builder.exclude_shares(parse_list(shares));
        }
        if let Some(exts) = &self.exclude_extensions {
            builder = builder.exclude_extensions(parse_list(exts));
        }
        if let Some(size) = self.queue_size {
            builder = builder.queue_size(size);
        }
        if self.progress {
            builder = builder.show_progress(true);
        }

        Ok(builder.build())
    }
}

fn prompt_password() -> io::Result<String> {
    print!("Enter password: ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
}

fn crawl(args: &CrawlArgs) -> Result<CrawlSummary, CrawlError> {
    let mut config = args.to_config()?;
    config.validate()?;

    if !config.credentials.user.is_empty() && config.credentials.password.is_empty() {
        config.credentials.password = prompt_password()
            .map_err(|e| CrawlError::new(CrawlErrorKind::Config, e.to_string()))?;
    }

    let hosts = config.hosts_file.clone().map(HostsFile::new);
    let directory = config
        .directory_query()?
        .map(|query| DirectoryLookup::new(LdapDirectory::new(config.connect_timeout()), query));

    let mut sources: Vec<&dyn Discovery> = Vec::new();
    if let Some(hosts) = &hosts {
        sources.push(hosts);
    }
    if let Some(directory) = &directory {
        sources.push(directory);
    }
    let targets = collect_targets(&config.servers, &sources)?;
    if targets.is_empty() {
        return Err(CrawlError::new(
            CrawlErrorKind::Config,
            "no servers to crawl, use --server, --hosts-file or --ldap-dn",
        ));
    }

    info!("Database: {:?}", config.db_path);
    info!("Mount root: {:?}", args.root);
    info!("Max depth: {}", config.max_depth);
    info!("Excluded shares: {:?}", config.exclude_shares);
    info!("Excluded extensions: {:?}", config.exclude_extensions);

    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let client = Arc::new(LocalShareClient::new(&args.root));
    let crawler = Crawler::new(config.clone(), client, store.clone())?;

    let shutdown_flag = crawler.shutdown_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, shutting down...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| {
        CrawlError::new(
            CrawlErrorKind::Config,
            format!("failed to set signal handler: {}", e),
        )
    })?;

    let format = if config.show_progress {
        ReportFormat::Json
    } else {
        ReportFormat::Log
    };
    let reporter = Arc::new(ProgressReporter::new(format));
    reporter.report_start(&config, targets.len());

    let ticker = match StatsTicker::spawn(
        Arc::clone(&reporter),
        Arc::clone(crawler.metrics()),
        config.progress_interval(),
    ) {
        Ok(ticker) => Some(ticker),
        Err(e) => {
            warn!("statistics disabled: {}", e);
            None
        }
    };

    let result = crawler.run(&targets);
    if let Some(ticker) = ticker {
        ticker.stop();
    }
    let summary = result?;

    reporter.report_progress(&crawler.metrics().snapshot());
    reporter.report_done(&summary);

    match store.share_state_counts() {
        Ok(counts) => info!("share states in store: {:?}", counts),
        Err(e) => warn!("unable to read share states: {}", e),
    }

    Ok(summary)
}

fn reset_failed(db: &Path) -> Result<u64, CrawlError> {
    let store = SqliteStore::open(db)?;
    Ok(store.reset_failed_shares()?)
}

fn print_summary(summary: &CrawlSummary, json: bool) {
    if json {
        match serde_json::to_string_pretty(summary) {
            Ok(out) => println!("{}", out),
            Err(e) => error!("unable to serialize summary: {}", e),
        }
        return;
    }

    println!("Crawl completed:");
    println!("  Servers finished: {}", summary.servers_finished);
    println!("  Servers stopped: {}", summary.servers_stopped);
    println!("  Shares finished: {}", summary.shares_finished);
    println!("  Shares failed: {}", summary.shares_failed);
    println!("  Shares skipped: {}", summary.shares_skipped);
    println!("  Records persisted: {}", summary.records_persisted);
    println!("  Records dropped: {}", summary.records_dropped);
    println!("  Duration: {}ms", summary.duration_ms);
    if summary.interrupted {
        println!("  (interrupted)");
    }
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let code = match cli.command {
        Commands::Crawl(args) => match crawl(&args) {
            Ok(summary) => {
                print_summary(&summary, args.json);
                if summary.interrupted {
                    130
                } else {
                    0
                }
            }
            Err(e) => {
                error!("{}", e);
                1
            }
        },
        Commands::ResetFailed { db } => match reset_failed(&db) {
            Ok(cleared) => {
                println!("Cleared {} failed shares", cleared);
                0
            }
            Err(e) => {
                error!("{}", e);
                1
            }
        },
    };

    process::exit(code);
}
