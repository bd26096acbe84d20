use clap::{ArgAction, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use swcache::config::Config;
use swcache::proxy::{OfflineProxy, RouteTable};
use swcache::{logging, CacheStorage, HttpNetwork, Request, SqliteStorage};

#[derive(Parser, Debug)]
#[command(name = "swcache")]
#[command(about = "Offline-first HTTP cache proxy")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./swcache.yaml or $XDG_CONFIG_HOME/swcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache database path
  #[arg(long)]
  db: Option<PathBuf>,

  /// Origin of the proxied site
  #[arg(long)]
  origin: Option<Url>,

  /// Override the store version tag
  #[arg(long)]
  version_tag: Option<String>,

  /// Increase log verbosity (-v, -vv, -vvv)
  #[arg(short, long, action = ArgAction::Count)]
  verbose: u8,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Open the current store and populate it from the route table
  Install,
  /// Delete stale stores, installing first if the current store is missing
  Activate,
  /// Re-fetch every listed URL into the current store
  Populate,
  /// Serve one request through the proxy and write the body out
  Fetch {
    /// Absolute URL, or a path resolved against the origin
    url: String,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// List store names
  Stores,
  /// List entries of the current store
  Entries,
  /// Show which policy each URL falls under
  Classify {
    #[arg(required = true)]
    urls: Vec<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let mut config = Config::load(args.config.as_deref())?;

  // Command line overrides
  if let Some(db) = args.db {
    config.storage.path = Some(db);
  }
  if let Some(origin) = args.origin {
    config.proxy.origin = origin;
  }
  if let Some(tag) = args.version_tag {
    config.proxy.version_tag = tag;
  }
  config.validate()?;

  let _guard = logging::init(args.verbose, config.log_file.as_deref())?;
  match &config.source {
    Some(path) => tracing::debug!("loaded config from {}", path.display()),
    None => tracing::debug!("no config file found, using built-in defaults"),
  }

  run(args.command, &config).await
}

type Proxy = OfflineProxy<SqliteStorage, HttpNetwork>;

fn open(config: &Config) -> Result<(Arc<SqliteStorage>, Proxy)> {
  let storage = Arc::new(SqliteStorage::open(&config.storage_path()?)?);
  let network = Arc::new(HttpNetwork::new(&config.proxy.origin, &config.network)?);
  let proxy = OfflineProxy::new(&config.proxy, Arc::clone(&storage), network)?;
  Ok((storage, proxy))
}

async fn run(command: Command, config: &Config) -> Result<()> {
  match command {
    Command::Install => {
      let (_, proxy) = open(config)?;
      let report = proxy.on_install().await?;
      for url in &report.cached {
        println!("cached\t{}", url);
      }
      for (url, reason) in &report.failed {
        println!("failed\t{}\t{}", url, reason);
      }
    }
    Command::Activate => {
      let (storage, proxy) = open(config)?;
      proxy.ensure_active().await?;
      for name in storage.keys()? {
        println!("{}", name);
      }
    }
    Command::Populate => {
      let (_, proxy) = open(config)?;
      let report = proxy.populate().await;
      println!(
        "{} cached, {} failed",
        report.cached.len(),
        report.failed.len()
      );
      for (url, reason) in &report.failed {
        println!("failed\t{}\t{}", url, reason);
      }
    }
    Command::Fetch { url, output } => {
      let url = resolve(&config.proxy.origin, &url)?;
      let (_, proxy) = open(config)?;
      proxy.ensure_active().await?;

      // Let the background store write land before the process exits.
      let result = proxy.on_fetch(Request::get(url)).await;
      proxy.flush().await;
      let result = result?;

      eprintln!(
        "{} ({:?})",
        result.response.status.as_u16(),
        result.source
      );

      match output {
        Some(path) => std::fs::write(&path, &result.response.body)
          .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
        None => std::io::stdout().write_all(&result.response.body)?,
      }
    }
    Command::Stores => {
      let (storage, proxy) = open(config)?;
      for name in storage.keys()? {
        let marker = if name == proxy.version_tag() { "*" } else { " " };
        println!("{} {}", marker, name);
      }
    }
    Command::Entries => {
      let (storage, proxy) = open(config)?;
      for entry in storage.entries(proxy.version_tag())? {
        println!(
          "{}\t{}\t{}\t{}\t{}",
          entry.status,
          entry.size,
          entry.cached_at.format("%Y-%m-%d %H:%M:%S"),
          entry.method,
          entry.url
        );
      }
    }
    Command::Classify { urls } => {
      let routes = RouteTable::new(&config.proxy)?;
      for raw in &urls {
        let url = resolve(&config.proxy.origin, raw)?;
        println!("{}\t{}", routes.classify(&url), url);
      }
    }
  }

  Ok(())
}

fn resolve(origin: &Url, raw: &str) -> Result<Url> {
  origin
    .join(raw)
    .map_err(|e| eyre!("Invalid URL '{}': {}", raw, e))
}
