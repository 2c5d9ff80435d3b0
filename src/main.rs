mod cache;
mod config;
mod event;
mod net;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::cache::{CacheStorage, MemoryStorage, SqliteStorage};
use crate::config::{Config, Variant};
use crate::event::EventDispatcher;
use crate::net::{HttpNetwork, Request, RequestMode};
use crate::worker::{FetchOutcome, Worker};

#[derive(Parser, Debug)]
#[command(name = "swcache")]
#[command(about = "An offline caching worker for web applications")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/swcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Routing variant to run, overriding the config file
  #[arg(long, value_enum)]
  variant: Option<Variant>,

  /// Keep caches in memory instead of the SQLite database
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the asset manifest (and activate unless skip_waiting is off)
  Install,
  /// Delete caches of other versions
  Activate,
  /// Send requests through the worker
  Fetch {
    /// URLs to fetch, absolute or relative to the origin
    #[arg(required = true)]
    urls: Vec<String>,

    /// Request method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Fetch as a top-level navigation
    #[arg(long, conflicts_with = "mode")]
    navigate: bool,

    /// Request mode (defaults to same-origin for origin URLs, no-cors otherwise)
    #[arg(long, value_enum)]
    mode: Option<RequestMode>,
  },
  /// List caches and whether they belong to the current version
  Caches,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override variant if specified on command line
  let config = if let Some(variant) = args.variant {
    Config { variant, ..config }
  } else {
    config
  };

  let _guard = init_logging(&config)?;

  if args.ephemeral {
    run(args.command, &config, MemoryStorage::new()).await
  } else {
    let storage = SqliteStorage::open(config.database.as_deref())?;
    run(args.command, &config, storage).await
  }
}

/// Log to stderr, or to a daily rolling file when `log_dir` is set.
fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  match &config.log_dir {
    Some(dir) => {
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      let appender = tracing_appender::rolling::daily(dir, "swcache.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      Ok(None)
    }
  }
}

async fn run<S: CacheStorage>(command: Command, config: &Config, storage: S) -> Result<()> {
  let worker_config = config.worker_config()?;
  let network = Arc::new(HttpNetwork::new(
    worker_config.origin.clone(),
    config.timeout(),
  )?);

  match command {
    Command::Install => {
      let worker = Arc::new(Worker::new(worker_config, storage, network));
      let events = EventDispatcher::spawn(Arc::clone(&worker));
      events.install().await?;
      println!(
        "installed {} ({} assets), state: {}, controlling clients: {}",
        worker.config().version,
        worker.config().precache.len(),
        worker.state(),
        worker.controls_clients()
      );
    }
    Command::Activate => {
      let worker = Arc::new(Worker::resumed(worker_config, storage, network));
      let events = EventDispatcher::spawn(worker);
      let deleted = events.activate().await?;
      if deleted.is_empty() {
        println!("no stale caches");
      }
      for name in deleted {
        println!("deleted {}", name);
      }
    }
    Command::Fetch {
      urls,
      method,
      navigate,
      mode,
    } => {
      let worker = Arc::new(Worker::resumed(worker_config, storage, network));
      let events = EventDispatcher::spawn(Arc::clone(&worker));

      let mut requests = Vec::with_capacity(urls.len());
      for raw in &urls {
        let url = worker
          .config()
          .origin
          .join(raw)
          .map_err(|e| eyre!("Invalid URL {}: {}", raw, e))?;
        let request = if navigate {
          Request::navigate(url)
        } else {
          let mode = mode.unwrap_or_else(|| {
            if net::is_same_origin(&url, &worker.config().origin) {
              RequestMode::SameOrigin
            } else {
              RequestMode::NoCors
            }
          });
          Request::get(url).with_mode(mode)
        };
        requests.push(request.with_method(&method));
      }

      let outcomes =
        futures::future::join_all(requests.iter().map(|r| events.fetch(r.clone()))).await;

      let mut failed = 0;
      for (request, outcome) in requests.iter().zip(outcomes) {
        match outcome {
          Ok(FetchOutcome::Respond { route, response }) => println!(
            "{} {} {} [{}] {} bytes {}",
            response.status,
            request.method,
            request.url,
            route,
            response.body.len(),
            response.header("content-type").unwrap_or("-")
          ),
          Ok(FetchOutcome::Passthrough) => match worker.fetch_direct(request).await {
            Ok(response) => println!(
              "{} {} {} [passthrough] {} bytes",
              response.status,
              request.method,
              request.url,
              response.body.len()
            ),
            Err(e) => {
              failed += 1;
              eprintln!("error {} {}: {}", request.method, request.url, e);
            }
          },
          Err(e) => {
            failed += 1;
            eprintln!("error {} {}: {}", request.method, request.url, e);
          }
        }
      }

      worker.settle().await;

      if failed > 0 {
        return Err(eyre!("{} of {} requests failed", failed, requests.len()));
      }
    }
    Command::Caches => {
      let worker = Worker::resumed(worker_config, storage, network);
      let names = worker.store().keys();
      if names.is_empty() {
        println!("no caches");
      }
      for name in &names {
        let status = if worker.config().registry.is_current(name) {
          "current"
        } else {
          "stale"
        };
        println!("{:<40} {}", name, status);
      }
      for (role, name) in worker.config().registry.roles() {
        if !names.iter().any(|n| n == name) {
          println!("{:<40} missing ({})", name, role.suffix());
        }
      }
    }
  }

  Ok(())
}
