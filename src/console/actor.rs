use crate::bus::types::Bus;
use crate::console::command::{ConsoleCommand, HELP, parse};
use crate::core::types::{Actor, OperatorAlert};
use crate::optimize::actor::OptimizeCommand;
use crate::optimize::workflow::OptimizeView;
use crate::scheduler::actor::{SyncCommand, SyncUpdate};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Forward raw lines from `reader` until EOF.
pub async fn read_lines<R: AsyncBufRead + Unpin>(reader: R, tx: mpsc::Sender<String>) -> Result<()> {
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.context("reading console input")? {
        if tx.send(line).await.is_err() {
            break;
        }
    }
    Ok(())
}

pub fn render_update(update: &SyncUpdate) -> String {
    let snap = &update.snapshot;
    let mut out = format!(
        "#{} {} rows={} changed={:?}",
        snap.seq,
        snap.taken_at.format("%H:%M:%S"),
        snap.rows().len(),
        update.changes.changed,
    );
    if !update.changes.appeared.is_empty() {
        out.push_str(&format!(" new={:?}", update.changes.appeared));
    }
    if !update.changes.disappeared.is_empty() {
        out.push_str(&format!(" gone={:?}", update.changes.disappeared));
    }
    if let Some(since) = snap.stale_since {
        out.push_str(&format!(" STALE since {}", since.format("%H:%M:%S")));
    } else if snap.is_stale() {
        out.push_str(" (partially stale)");
    }
    out
}

pub fn render_view(view: &OptimizeView) -> String {
    let items: Vec<String> = view
        .suggestions
        .iter()
        .map(|v| {
            format!(
                "{}[{:?}/{:?}]",
                v.suggestion.setting_name, v.state, v.tier
            )
        })
        .collect();
    let mut out = format!("optimize {:?}: {}", view.phase, items.join(" "));
    if view.loading {
        out.push_str(" (loading)");
    }
    if let Some(delta) = &view.delta {
        if let Some(ret) = delta.total_return_pct {
            out.push_str(&format!(" trial Δreturn={ret:+.2}%"));
        }
    }
    out
}

pub fn render_alert(alert: &OperatorAlert) -> String {
    format!("[{:?}] {}", alert.source, alert.message)
}

/// Operator console: turns input lines into commands and logs everything
/// the bus publishes.
pub struct ConsoleActor {
    pub bus: Bus,
    pub shutdown: CancellationToken,
    input: mpsc::Receiver<String>,
    sync: mpsc::Sender<SyncCommand>,
    optimize: mpsc::Sender<OptimizeCommand>,
}

impl ConsoleActor {
    pub fn new(
        bus: Bus,
        shutdown: CancellationToken,
        input: mpsc::Receiver<String>,
        sync: mpsc::Sender<SyncCommand>,
        optimize: mpsc::Sender<OptimizeCommand>,
    ) -> ConsoleActor {
        Self {
            bus,
            shutdown,
            input,
            sync,
            optimize,
        }
    }

    async fn dispatch(&self, line: &str) -> Result<()> {
        match parse(line) {
            Ok(ConsoleCommand::Sync(cmd)) => self.sync.send(cmd).await.context("sync loop gone")?,
            Ok(ConsoleCommand::Optimize(cmd)) => self
                .optimize
                .send(cmd)
                .await
                .context("optimize loop gone")?,
            Ok(ConsoleCommand::Help) => info!("\n{HELP}"),
            Err(e) => warn!("{}", e),
        }
        Ok(())
    }
}

fn lagged(topic: &str, err: broadcast::error::RecvError) -> bool {
    match err {
        broadcast::error::RecvError::Lagged(n) => {
            warn!("ConsoleActor lagged by {n} {topic} messages");
            false
        }
        broadcast::error::RecvError::Closed => {
            error!("ConsoleActor {topic} channel closed");
            true
        }
    }
}

#[async_trait]
impl Actor for ConsoleActor {
    async fn run(mut self) -> Result<()> {
        info!("ConsoleActor started");
        let mut updates = self.bus.updates.subscribe();
        let mut views = self.bus.optimize.subscribe();
        let mut alerts = self.bus.alerts.subscribe();
        let mut input_open = true;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("ConsoleActor: shutdown requested");
                    break;
                }

                line = self.input.recv(), if input_open => {
                    match line {
                        Some(line) if line.trim().is_empty() => {}
                        Some(line) => {
                            if let Err(e) = self.dispatch(&line).await {
                                error!("Failed to dispatch console command: {:#}", e);
                            }
                        }
                        None => {
                            info!("console input closed");
                            input_open = false;
                        }
                    }
                }

                res = updates.recv() => match res {
                    Ok(update) => info!("{}", render_update(&update)),
                    Err(e) => if lagged("update", e) { break },
                },

                res = views.recv() => match res {
                    Ok(view) => info!("{}", render_view(&view)),
                    Err(e) => if lagged("optimize view", e) { break },
                },

                res = alerts.recv() => match res {
                    Ok(alert) => warn!("{}", render_alert(&alert)),
                    Err(e) => if lagged("alert", e) { break },
                },
            }
        }

        info!("ConsoleActor stopped cleanly");
        Ok(())
    }
}
