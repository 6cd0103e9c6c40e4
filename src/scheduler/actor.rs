use crate::bus::types::Bus;
use crate::config::config::AppCfg;
use crate::core::clock::{Clock, SharedVisibility, VisibilitySource};
use crate::core::types::{Actor, AlertSource, OperatorAlert};
use crate::fetch::client::ResourceFetcher;
use crate::fetch::error::FetchError;
use crate::fingerprint::differ::{ChangeSet, ChangeTracker};
use crate::scheduler::poller::{PollScheduler, RefreshTrigger};
use crate::snapshot::aggregator::SnapshotAggregator;
use crate::snapshot::types::Snapshot;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Operator controls for the live sync loop.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncCommand {
    Enable,
    Disable,
    SetInterval(Duration),
    RefreshNow,
    SetVisible(bool),
}

/// One published refresh: the new snapshot and what moved since the last one.
#[derive(Clone, Debug)]
pub struct SyncUpdate {
    pub snapshot: Arc<Snapshot>,
    pub changes: ChangeSet,
    pub trigger: RefreshTrigger,
}

pub struct SyncActor {
    pub bus: Bus,
    pub shutdown: CancellationToken,
    heartbeat: Duration,
    enabled: bool,
    scheduler: PollScheduler,
    aggregator: Arc<SnapshotAggregator>,
    tracker: ChangeTracker,
    commands: mpsc::Receiver<SyncCommand>,
    visibility: Arc<SharedVisibility>,
    clock: Arc<dyn Clock>,
}

impl SyncActor {
    pub fn new(
        bus: Bus,
        shutdown: CancellationToken,
        cfg: &AppCfg,
        fetcher: Arc<dyn ResourceFetcher>,
        clock: Arc<dyn Clock>,
        visibility: Arc<SharedVisibility>,
        commands: mpsc::Receiver<SyncCommand>,
    ) -> SyncActor {
        let scheduler = PollScheduler::new(&cfg.poll, clock.clone(), visibility.clone());
        let aggregator = SnapshotAggregator::new(fetcher, clock.clone(), cfg.snapshot.clone());
        let seed = Arc::new(Snapshot::empty(clock.now()));
        Self {
            bus,
            shutdown,
            heartbeat: cfg.poll.heartbeat,
            enabled: cfg.poll.enabled,
            scheduler,
            aggregator: Arc::new(aggregator),
            tracker: ChangeTracker::new(seed, cfg.diff.precision),
            commands,
            visibility,
            clock,
        }
    }

    fn spawn_refresh(
        &self,
        refreshes: &mut JoinSet<(RefreshTrigger, Snapshot)>,
        trigger: RefreshTrigger,
    ) {
        let aggregator = self.aggregator.clone();
        let prev = self.tracker.previous();
        debug!(?trigger, seq = prev.seq + 1, "refresh started");
        refreshes.spawn(async move {
            let snap = aggregator.refresh(&prev).await;
            (trigger, snap)
        });
    }

    fn handle_command(
        &mut self,
        cmd: SyncCommand,
        refreshes: &mut JoinSet<(RefreshTrigger, Snapshot)>,
    ) {
        debug!(?cmd, "sync command");
        match cmd {
            SyncCommand::Enable => self.scheduler.enable(),
            SyncCommand::Disable => self.scheduler.disable(),
            SyncCommand::SetInterval(requested) => {
                let effective = self.scheduler.set_interval(requested);
                info!(?effective, "poll interval set");
            }
            SyncCommand::RefreshNow => {
                if let Some(trigger) = self.scheduler.request_refresh() {
                    self.spawn_refresh(refreshes, trigger);
                }
            }
            SyncCommand::SetVisible(visible) => self.visibility.set(visible),
        }
    }

    /// Scheduled refreshes only alert when a primary resource starts failing;
    /// a manual refresh reports every failure it saw.
    fn alerts_for(&self, trigger: RefreshTrigger, prev: &Snapshot, snap: &Snapshot) -> Vec<String> {
        let describe = |e: &FetchError| format!("refresh failed: {e}");
        match trigger {
            RefreshTrigger::Manual => snap.resource_errors().into_iter().map(describe).collect(),
            RefreshTrigger::Scheduled => {
                let already: Vec<_> = prev.primary_errors().iter().map(|e| e.resource).collect();
                snap.primary_errors()
                    .into_iter()
                    .filter(|e| !already.contains(&e.resource))
                    .map(describe)
                    .collect()
            }
        }
    }

    async fn on_refreshed(&mut self, trigger: RefreshTrigger, snap: Snapshot) -> Result<()> {
        self.scheduler.finish_refresh();
        let prev = self.tracker.previous();
        let snapshot = Arc::new(snap);
        let changes = self.tracker.observe(snapshot.clone());

        if !changes.is_empty() {
            info!(
                seq = snapshot.seq,
                changed = changes.changed.len(),
                appeared = changes.appeared.len(),
                disappeared = changes.disappeared.len(),
                "changes detected"
            );
        }
        if let Some(since) = snapshot.stale_since {
            warn!(seq = snapshot.seq, %since, "showing stale data");
        }

        for message in self.alerts_for(trigger, &prev, &snapshot) {
            let alert = OperatorAlert::new(AlertSource::Refresh, message, self.clock.now());
            self.bus.alerts.publish(alert).await?;
        }

        self.bus
            .updates
            .publish(SyncUpdate {
                snapshot,
                changes,
                trigger,
            })
            .await
    }
}

#[async_trait]
impl Actor for SyncActor {
    async fn run(mut self) -> Result<()> {
        info!("SyncActor started");
        let mut heartbeat = tokio::time::interval(self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut refreshes: JoinSet<(RefreshTrigger, Snapshot)> = JoinSet::new();

        if self.enabled {
            self.scheduler.enable();
        }
        // initial load, only if someone is looking
        if self.visibility.is_visible() {
            if let Some(trigger) = self.scheduler.request_refresh() {
                self.spawn_refresh(&mut refreshes, trigger);
            }
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("SyncActor: shutdown requested");
                    break;
                }

                _ = heartbeat.tick() => {
                    if let Some(trigger) = self.scheduler.tick() {
                        self.spawn_refresh(&mut refreshes, trigger);
                    }
                }

                Some(cmd) = self.commands.recv() => {
                    self.handle_command(cmd, &mut refreshes);
                }

                Some(done) = refreshes.join_next(), if !refreshes.is_empty() => {
                    match done {
                        Ok((trigger, snap)) => {
                            if let Err(e) = self.on_refreshed(trigger, snap).await {
                                error!("Failed to publish sync update: {}", e);
                            }
                        }
                        Err(e) => {
                            self.scheduler.finish_refresh();
                            error!(?e, "refresh task panicked/cancelled");
                        }
                    }
                }
            }
        }

        refreshes.abort_all();
        info!("SyncActor stopped cleanly");
        Ok(())
    }
}
