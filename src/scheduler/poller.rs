use crate::config::config::PollCfg;
use crate::core::clock::{Clock, VisibilitySource};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Longest period the scheduler will run at. Longer requests are clamped.
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PollState {
    Stopped,
    Running,
    Suspended,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RefreshTrigger {
    Scheduled,
    Manual,
}

/// Decides when a refresh may start. Owns no timers: the caller asks via
/// `tick` as often as it likes and starts a refresh only when told to.
pub struct PollScheduler {
    clock: Arc<dyn Clock>,
    visibility: Arc<dyn VisibilitySource>,
    state: PollState,
    interval: Duration,
    min_interval: Duration,
    next_due: Option<DateTime<Utc>>,
    in_flight: Option<RefreshTrigger>,
    coalesced: u64,
}

impl PollScheduler {
    pub fn new(
        cfg: &PollCfg,
        clock: Arc<dyn Clock>,
        visibility: Arc<dyn VisibilitySource>,
    ) -> Self {
        Self {
            clock,
            visibility,
            state: PollState::Stopped,
            interval: bounded(cfg.interval, cfg.min_interval),
            min_interval: cfg.min_interval,
            next_due: None,
            in_flight: None,
            coalesced: 0,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn in_flight(&self) -> Option<RefreshTrigger> {
        self.in_flight
    }

    /// Requests dropped because a refresh was already outstanding.
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.next_due
    }

    fn step(&self) -> TimeDelta {
        TimeDelta::from_std(self.interval).unwrap_or(TimeDelta::MAX)
    }

    fn one_step_from(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        saturating_add(from, self.step())
    }

    /// First interval boundary strictly after `now`, walking from `from`.
    fn boundary_after(&self, from: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        if from > now {
            return from;
        }
        let step_ms = self.step().num_milliseconds().max(1);
        let behind_ms = now.signed_duration_since(from).num_milliseconds();
        let ahead_ms = (behind_ms / step_ms)
            .saturating_add(1)
            .saturating_mul(step_ms);
        TimeDelta::try_milliseconds(ahead_ms)
            .map(|ahead| saturating_add(from, ahead))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn enable(&mut self) {
        if self.state != PollState::Stopped {
            return;
        }
        let now = self.clock.now();
        self.next_due = Some(self.one_step_from(now));
        self.state = if self.visibility.is_visible() {
            PollState::Running
        } else {
            PollState::Suspended
        };
        info!(state = ?self.state, interval = ?self.interval, "polling enabled");
    }

    pub fn disable(&mut self) {
        if self.state == PollState::Stopped {
            return;
        }
        self.state = PollState::Stopped;
        self.next_due = None;
        info!("polling disabled");
    }

    /// Set the period, clamped to `[floor, MAX_INTERVAL]`. Returns the
    /// effective value. Restarts the cadence from now.
    pub fn set_interval(&mut self, requested: Duration) -> Duration {
        let effective = bounded(requested, self.min_interval);
        if effective != requested {
            info!(?requested, ?effective, "poll interval clamped");
        }
        self.interval = effective;
        if self.state != PollState::Stopped {
            self.next_due = Some(self.one_step_from(self.clock.now()));
        }
        effective
    }

    fn sync_visibility(&mut self, now: DateTime<Utc>) {
        let visible = self.visibility.is_visible();
        match (self.state, visible) {
            (PollState::Running, false) => {
                self.state = PollState::Suspended;
                info!("view hidden, polling suspended");
            }
            (PollState::Suspended, true) => {
                self.state = PollState::Running;
                if let Some(due) = self.next_due {
                    self.next_due = Some(self.boundary_after(due, now));
                }
                info!(next_due = ?self.next_due, "view visible, polling resumed");
            }
            _ => {}
        }
    }

    /// Evaluate the schedule. `Some` means the caller must start a refresh
    /// now and call `finish_refresh` when it completes.
    pub fn tick(&mut self) -> Option<RefreshTrigger> {
        let now = self.clock.now();
        self.sync_visibility(now);
        if self.state != PollState::Running {
            return None;
        }

        let due = self.next_due?;
        if now < due {
            return None;
        }
        self.next_due = Some(self.boundary_after(due, now));

        if let Some(outstanding) = self.in_flight {
            self.coalesced += 1;
            debug!(?outstanding, "tick coalesced into in-flight refresh");
            return None;
        }
        self.in_flight = Some(RefreshTrigger::Scheduled);
        Some(RefreshTrigger::Scheduled)
    }

    /// Operator "refresh now". Works in every state and leaves the cadence
    /// alone; coalesced like a tick if a refresh is outstanding.
    pub fn request_refresh(&mut self) -> Option<RefreshTrigger> {
        if let Some(outstanding) = self.in_flight {
            self.coalesced += 1;
            debug!(?outstanding, "manual refresh coalesced into in-flight refresh");
            return None;
        }
        self.in_flight = Some(RefreshTrigger::Manual);
        Some(RefreshTrigger::Manual)
    }

    pub fn finish_refresh(&mut self) {
        self.in_flight = None;
    }
}

fn bounded(requested: Duration, floor: Duration) -> Duration {
    requested.max(floor).min(MAX_INTERVAL)
}

fn saturating_add(from: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    from.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
