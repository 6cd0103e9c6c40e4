use crate::config::config::SnapshotCfg;
use crate::core::clock::Clock;
use crate::fetch::client::ResourceFetcher;
use crate::snapshot::types::{Slot, Snapshot};
use chrono::TimeDelta;
use std::sync::Arc;
use tracing::{debug, warn};

/// Fans out one poll cycle's fetches and folds them into a single snapshot.
pub struct SnapshotAggregator {
    fetcher: Arc<dyn ResourceFetcher>,
    clock: Arc<dyn Clock>,
    cfg: SnapshotCfg,
}

impl SnapshotAggregator {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>, clock: Arc<dyn Clock>, cfg: SnapshotCfg) -> Self {
        Self {
            fetcher,
            clock,
            cfg,
        }
    }

    /// Build the successor of `prev`. Always returns exactly one snapshot;
    /// failed resources keep their previous value and carry the error.
    pub async fn refresh(&self, prev: &Snapshot) -> Snapshot {
        let f = &self.fetcher;
        let (status, cycle, trades, shadow_logs, performance) = tokio::join!(
            f.get_status(),
            f.get_latest_cycle(),
            f.get_recent_trades(self.cfg.trades_limit),
            f.get_recent_shadow_logs(self.cfg.shadow_logs_limit),
            f.get_performance_metrics(self.cfg.analytics_lookback_days),
        );

        let min_next = prev.taken_at + TimeDelta::milliseconds(1);
        let taken_at = self.clock.now().max(min_next);

        let snap = Snapshot {
            seq: prev.seq + 1,
            taken_at,
            valid: status.is_ok() && cycle.is_ok(),
            stale_since: None,
            status: Slot::settle(&prev.status, status, taken_at),
            latest_cycle: Slot::settle(&prev.latest_cycle, cycle, taken_at),
            trades: Slot::settle(&prev.trades, trades, taken_at),
            shadow_logs: Slot::settle(&prev.shadow_logs, shadow_logs, taken_at),
            performance: Slot::settle(&prev.performance, performance, taken_at),
        };

        let stale_since = if snap.valid {
            None
        } else if prev.valid {
            Some(prev.taken_at)
        } else {
            // never had a valid snapshot: stale since the seed
            prev.stale_since.or(Some(prev.taken_at))
        };
        let snap = Snapshot { stale_since, ..snap };

        for err in snap.resource_errors() {
            if err.resource.is_primary() {
                warn!(seq = snap.seq, "primary resource failed: {}", err);
            } else {
                debug!(seq = snap.seq, "secondary resource degraded: {}", err);
            }
        }
        snap
    }
}
