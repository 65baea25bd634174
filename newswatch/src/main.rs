/*
newswatch - single-binary main.rs
Serves the HTTP API and runs the subscription scheduler in one process.
Either half can be switched off from the command line.
*/

use anyhow::{Context, Result};
use clap::Parser;
use common::{init_db_pool, run_migrations, Config};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use newswatch::app::App;
use newswatch::notify::{sink_from_config, spawn_dispatcher};
use newswatch::server::launch_rocket;
use newswatch::worker::run_worker;

const DEFAULT_CONFIG: &str = "config.default.toml";
const LOCAL_CONFIG: &str = "config.toml";
const WORKER_GRACE: Duration = Duration::from_secs(5);
const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Parser, Debug)]
#[command(name = "newswatch", about = "Company news watch: HTTP API + subscription scheduler")]
struct Args {
    /// Override file merged on top of config.default.toml (defaults to ./config.toml when present)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Serve HTTP only, never run subscriptions
    #[arg(long, conflicts_with = "worker_only")]
    no_worker: bool,

    /// Run subscriptions only, do not bind the HTTP server
    #[arg(long)]
    worker_only: bool,

    /// Log filter directive (e.g. info, debug, newswatch=trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = load_config(args.config.clone()).await?;
    let pool = open_database(&config.database.path).await?;

    let app = App::from_config(&config, pool)?;
    let _dispatcher = spawn_dispatcher(&app.events, sink_from_config(config.notify.as_ref()));
    let shutdown = Arc::new(Notify::new());

    if args.worker_only {
        return run_worker_only(app, &config, shutdown).await;
    }

    let worker = if args.no_worker {
        info!("subscription worker disabled (--no-worker)");
        None
    } else {
        Some(spawn_worker(app.clone(), &config, Arc::clone(&shutdown)))
    };

    if let Err(e) = launch_rocket(app, Arc::new(config)).await {
        error!(error = %e, "HTTP server failed");
    }

    info!("HTTP server stopped; stopping subscription worker");
    shutdown.notify_waiters();
    if let Some(handle) = worker {
        await_worker(handle).await;
    }

    info!("shutdown complete");
    Ok(())
}

/// Defaults first, then the explicit `--config` file or a local config.toml.
async fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
    let default_path = PathBuf::from(DEFAULT_CONFIG);
    let override_path = match explicit {
        Some(p) if !p.exists() => {
            error!(path = ?p, "specified config file not found");
            anyhow::bail!("Config file not found: {}", p.display());
        }
        Some(p) => Some(p),
        None => Some(PathBuf::from(LOCAL_CONFIG)).filter(|p| p.exists()),
    };

    let config = Config::load_with_defaults(
        Some(default_path.as_path()).filter(|p| p.exists()),
        override_path.as_deref(),
    )
    .await
    .context("failed to load configuration")?;

    info!(
        default = ?default_path,
        override = ?override_path,
        subscriptions = config.subscriptions.len(),
        "configuration loaded"
    );
    Ok(config)
}

/// Opens the record store database and brings its schema up to date.
async fn open_database(path: &str) -> Result<SqlitePool> {
    let resolved = match tokio::fs::canonicalize(path).await {
        Ok(p) => p.to_string_lossy().to_string(),
        Err(_) => path.to_string(),
    };
    info!(db_path = %resolved, "opening record store");

    let pool = init_db_pool(&resolved)
        .await
        .with_context(|| format!("failed to initialize database pool at {}", resolved))?;
    run_migrations(&pool).await?;
    info!("DB migrations completed");
    Ok(pool)
}

/// Scheduler in the foreground until ctrl-c or until it stops by itself.
async fn run_worker_only(app: App, config: &Config, shutdown: Arc<Notify>) -> Result<()> {
    info!("starting in worker-only mode");
    let worker = run_worker(app, config.subscriptions.clone(), Arc::clone(&shutdown));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, stopping subscription worker");
            shutdown.notify_waiters();
            tokio::time::sleep(WORKER_GRACE).await;
        }
        res = worker => {
            if let Err(e) = res {
                error!(error = %e, "subscription worker failed");
            }
        }
    }
    info!("worker-only run finished");
    Ok(())
}

fn spawn_worker(app: App, config: &Config, shutdown: Arc<Notify>) -> JoinHandle<Result<()>> {
    let subscriptions = config.subscriptions.clone();
    info!(subscriptions = subscriptions.len(), "spawning subscription worker");
    tokio::spawn(async move {
        let res = run_worker(app, subscriptions, shutdown).await;
        if let Err(e) = &res {
            error!(error = %e, "subscription worker failed");
        }
        res
    })
}

async fn await_worker(handle: JoinHandle<Result<()>>) {
    match tokio::time::timeout(WORKER_SHUTDOWN_TIMEOUT, handle).await {
        Ok(Ok(Ok(()))) => info!("subscription worker exited cleanly"),
        Ok(Ok(Err(e))) => error!(error = %e, "subscription worker returned an error"),
        Ok(Err(join_err)) => error!(error = %join_err, "subscription worker panicked"),
        Err(_) => warn!("timed out waiting for subscription worker; continuing shutdown"),
    }
}
