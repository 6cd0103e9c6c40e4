use chrono::{DateTime, TimeDelta, Utc};
use std::sync::atomic::{AtomicBool, Ordering};

/// Source of "now" for anything that schedules or timestamps.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall time anchored once at construction, advanced by the tokio monotonic
/// clock. Never goes backwards and follows `tokio::time::pause`.
pub struct MonotonicClock {
    wall_anchor: DateTime<Utc>,
    mono_anchor: tokio::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            wall_anchor: Utc::now(),
            mono_anchor: tokio::time::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.mono_anchor.elapsed();
        self.wall_anchor + TimeDelta::from_std(elapsed).unwrap_or_default()
    }
}

/// Whether the host view is currently on screen.
pub trait VisibilitySource: Send + Sync + 'static {
    fn is_visible(&self) -> bool;
}

/// Visibility flag flipped by the view layer (tab focus, window minimised).
#[derive(Debug)]
pub struct SharedVisibility(AtomicBool);

impl SharedVisibility {
    pub fn new(visible: bool) -> Self {
        Self(AtomicBool::new(visible))
    }

    pub fn set(&self, visible: bool) {
        self.0.store(visible, Ordering::Relaxed);
    }
}

impl VisibilitySource for SharedVisibility {
    fn is_visible(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
pub use manual::ManualClock;
