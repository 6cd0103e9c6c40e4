mod bus;
mod config;
mod console;
mod core;
mod fetch;
mod fingerprint;
mod optimize;
mod scheduler;
mod snapshot;

use anyhow::{Context, Result};
use bus::types::Bus;
use config::config::AppCfg;
use console::actor::{ConsoleActor, read_lines};
use crate::core::clock::{Clock, MonotonicClock, SharedVisibility};
use crate::core::types::Actor;
use fetch::client::ResourceFetcher;
use fetch::http::HttpResourceFetcher;
use optimize::actor::OptimizeActor;
use reqwest::Client;
use scheduler::actor::SyncActor;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    dotenv::dotenv().ok();

    let cfg = AppCfg::load("config.yml")?;

    // Root span for the supervisor/main thread
    let span = info_span!(
        "Supervisor",
        pid = %std::process::id(),
        version = env!("CARGO_PKG_VERSION"),
    );
    let _enter = span.enter();

    info!(backend = %cfg.backend.base_url, "Starting up");

    let bus = Bus::new();
    let shutdown = CancellationToken::new();

    info!("Initializing Client");
    let client = Client::builder()
        .user_agent(cfg.http.user_agent.clone())
        .pool_idle_timeout(cfg.http.pool_idle_timeout)
        .pool_max_idle_per_host(cfg.http.pool_max_idle_per_host)
        .tcp_keepalive(cfg.http.tcp_keep_alive)
        .timeout(cfg.http.timeout)
        .build()
        .context("building http client")?;

    let fetcher: Arc<dyn ResourceFetcher> = Arc::new(HttpResourceFetcher::new(
        cfg.backend.clone(),
        client,
        cfg.http.timeout,
    ));
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let visibility = Arc::new(SharedVisibility::new(true));

    let (sync_tx, sync_rx) = mpsc::channel(64);
    let (optimize_tx, optimize_rx) = mpsc::channel(64);
    let (line_tx, line_rx) = mpsc::channel(64);

    info!("Building actors");
    let sync = SyncActor::new(
        bus.clone(),
        shutdown.clone(),
        &cfg,
        fetcher.clone(),
        clock.clone(),
        visibility,
        sync_rx,
    );
    let optimize = OptimizeActor::new(
        bus.clone(),
        shutdown.clone(),
        cfg.optimize.clone(),
        fetcher,
        clock,
        optimize_rx,
    );
    let console = ConsoleActor::new(bus.clone(), shutdown.clone(), line_rx, sync_tx, optimize_tx);

    info!("Spawning actors");
    let mut actors = tokio::task::JoinSet::new();
    actors.spawn(sync.run().instrument(info_span!("Sync")));
    actors.spawn(optimize.run().instrument(info_span!("Optimize")));
    actors.spawn(console.run().instrument(info_span!("Console")));

    // stdin is not cancellable, so it stays outside the supervised set
    tokio::spawn(
        async move {
            if let Err(e) = read_lines(BufReader::new(tokio::io::stdin()), line_tx).await {
                warn!("console input failed: {:#}", e);
            }
        }
        .instrument(info_span!("Stdin")),
    );

    info!("Waiting for actors");

    tokio::select! {
        _ = async {
             while let Some(res) = actors.join_next().await {
                 match res {
                    Ok(Ok(()))  => info!("Actor exited cleanly"),
                    Ok(Err(e))  => error!(?e, "Actor returned error"),
                    Err(panic)  => error!(?panic, "Actor panicked/cancelled"),
                }
            }
        } => {  }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down supervisor loop");
            shutdown.cancel();
        }
    }

    info!("Waiting for graceful shutdown of actors");
    while let Some(res) = actors.join_next().await {
        match res {
            Ok(Ok(())) => info!("Actor exited cleanly"),
            Ok(Err(e)) => error!(?e, "Actor returned error"),
            Err(panic) => error!(?panic, "Actor panicked/cancelled"),
        }
    }

    info!("Supervisor exit");
    // a pending stdin read would otherwise hold the runtime open
    std::process::exit(0);
}
