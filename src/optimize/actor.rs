use crate::bus::types::Bus;
use crate::config::config::OptimizeCfg;
use crate::core::clock::Clock;
use crate::core::types::{Actor, AlertSource, OperatorAlert};
use crate::fetch::client::ResourceFetcher;
use crate::fetch::error::FetchError;
use crate::optimize::types::{DecisionLog, Suggestion, TrialResult};
use crate::optimize::workflow::{ApplyOutcome, OptimizeWorkflow, Ticket, WorkflowError};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Operator actions on the optimize panel.
#[derive(Clone, Debug, PartialEq)]
pub enum OptimizeCommand {
    Reload,
    Toggle(String),
    SelectAll,
    SelectNone,
    SetCustom(String, Value),
    ClearCustom(String),
    Trial,
    ResetTrial,
    Apply,
    Confirm,
    Cancel,
    Dismiss(String),
}

enum Completion {
    Reload(Ticket, Result<Vec<Suggestion>, FetchError>),
    Trial(Ticket, Result<TrialResult, FetchError>),
    Apply(Ticket, Result<(), FetchError>),
    Dismiss(String, Ticket, Result<(), FetchError>),
    Accepted(String, Result<(), FetchError>),
}

pub struct OptimizeActor {
    pub bus: Bus,
    pub shutdown: CancellationToken,
    fetcher: Arc<dyn ResourceFetcher>,
    clock: Arc<dyn Clock>,
    lookback_days: u32,
    workflow: OptimizeWorkflow,
    commands: mpsc::Receiver<OptimizeCommand>,
}

impl OptimizeActor {
    pub fn new(
        bus: Bus,
        shutdown: CancellationToken,
        cfg: OptimizeCfg,
        fetcher: Arc<dyn ResourceFetcher>,
        clock: Arc<dyn Clock>,
        commands: mpsc::Receiver<OptimizeCommand>,
    ) -> OptimizeActor {
        Self {
            bus,
            shutdown,
            fetcher,
            clock,
            lookback_days: cfg.lookback_days,
            workflow: OptimizeWorkflow::new(cfg),
            commands,
        }
    }

    fn start_reload(&mut self, tasks: &mut JoinSet<Completion>) {
        let ticket = self.workflow.begin_reload();
        let fetcher = self.fetcher.clone();
        let lookback = self.lookback_days;
        tasks.spawn(async move {
            Completion::Reload(ticket, fetcher.get_suggested_settings(lookback).await)
        });
    }

    fn send_accepted(&self, tasks: &mut JoinSet<Completion>, log: DecisionLog) {
        let fetcher = self.fetcher.clone();
        tasks.spawn(async move {
            let outcome = fetcher.log_suggestion_decision(&log).await;
            Completion::Accepted(log.setting_name, outcome)
        });
    }

    fn handle_command(
        &mut self,
        cmd: OptimizeCommand,
        tasks: &mut JoinSet<Completion>,
    ) -> Result<(), WorkflowError> {
        debug!(?cmd, "optimize command");
        let wf = &mut self.workflow;
        match cmd {
            OptimizeCommand::Reload => {
                self.start_reload(tasks);
            }
            OptimizeCommand::Toggle(name) => {
                wf.toggle(&name)?;
            }
            OptimizeCommand::SelectAll => wf.select_all()?,
            OptimizeCommand::SelectNone => wf.select_none()?,
            OptimizeCommand::SetCustom(name, value) => wf.set_custom_value(&name, value)?,
            OptimizeCommand::ClearCustom(name) => wf.clear_custom_value(&name)?,
            OptimizeCommand::Trial => {
                let (ticket, req) = wf.begin_trial()?;
                info!(settings = req.settings.len(), custom = req.is_custom, "trial started");
                let fetcher = self.fetcher.clone();
                tasks.spawn(async move {
                    Completion::Trial(ticket, fetcher.run_trial_backtest(&req).await)
                });
            }
            OptimizeCommand::ResetTrial => wf.reset_trial(),
            OptimizeCommand::Apply => {
                let pending = wf.request_apply()?;
                info!(settings = ?pending.settings, "apply requested, awaiting confirmation");
            }
            OptimizeCommand::Confirm => {
                let (ticket, settings) = wf.confirm_apply()?;
                info!(settings = settings.len(), "apply confirmed, committing");
                let fetcher = self.fetcher.clone();
                tasks.spawn(async move {
                    Completion::Apply(ticket, fetcher.apply_settings(&settings).await)
                });
            }
            OptimizeCommand::Cancel => {
                wf.cancel_apply()?;
                info!("apply cancelled");
            }
            OptimizeCommand::Dismiss(name) => {
                let (ticket, log) = wf.begin_dismiss(&name)?;
                let fetcher = self.fetcher.clone();
                tasks.spawn(async move {
                    let outcome = fetcher.log_suggestion_decision(&log).await;
                    Completion::Dismiss(name, ticket, outcome)
                });
            }
        }
        Ok(())
    }

    fn handle_completion(
        &mut self,
        done: Completion,
        tasks: &mut JoinSet<Completion>,
    ) -> Result<(), WorkflowError> {
        match done {
            Completion::Reload(ticket, outcome) => {
                self.workflow.complete_reload(ticket, outcome)?;
            }
            Completion::Trial(ticket, outcome) => {
                if self.workflow.complete_trial(ticket, outcome)? {
                    info!("trial finished");
                }
            }
            Completion::Apply(ticket, outcome) => {
                let outcome = self.workflow.complete_apply(ticket, outcome);
                if self.workflow.take_deferred_reload() {
                    self.start_reload(tasks);
                }
                if let ApplyOutcome::Committed(logs) = outcome? {
                    for log in logs {
                        self.send_accepted(tasks, log);
                    }
                }
            }
            Completion::Dismiss(name, ticket, outcome) => {
                self.workflow.complete_dismiss(&name, ticket, outcome)?;
            }
            Completion::Accepted(name, outcome) => match outcome {
                Ok(()) => debug!(setting = %name, "accepted decision logged"),
                // audit entry only, the commit itself succeeded
                Err(e) => warn!(setting = %name, "failed to log accepted decision: {}", e),
            },
        }
        Ok(())
    }

    async fn alert(&self, err: &WorkflowError) -> Result<()> {
        warn!("optimize action failed: {}", err);
        let alert = OperatorAlert::new(AlertSource::Optimize, err.to_string(), self.clock.now());
        self.bus.alerts.publish(alert).await
    }

    async fn publish_view(&self) -> Result<()> {
        self.bus.optimize.publish(self.workflow.view()).await
    }
}

#[async_trait]
impl Actor for OptimizeActor {
    async fn run(mut self) -> Result<()> {
        info!("OptimizeActor started");
        let mut tasks: JoinSet<Completion> = JoinSet::new();
        self.start_reload(&mut tasks);
        self.publish_view().await?;

        loop {
            let outcome = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("OptimizeActor: shutdown requested");
                    break;
                }

                Some(cmd) = self.commands.recv() => self.handle_command(cmd, &mut tasks),

                Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                    match done {
                        Ok(done) => self.handle_completion(done, &mut tasks),
                        Err(e) => {
                            error!(?e, "optimize task panicked/cancelled");
                            Ok(())
                        }
                    }
                }
            };

            if let Err(e) = &outcome {
                if let Err(publish_err) = self.alert(e).await {
                    error!("Failed to publish alert: {}", publish_err);
                }
            }
            if let Err(e) = self.publish_view().await {
                error!("Failed to publish optimize view: {}", e);
            }
        }

        tasks.abort_all();
        info!("OptimizeActor stopped cleanly");
        Ok(())
    }
}
