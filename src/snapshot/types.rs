use crate::core::types::{
    CyclePayload, DecisionRow, PerformanceMetrics, ShadowLog, StatusPayload, TradeRecord,
};
use crate::fetch::error::FetchError;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Last good payload of one resource plus the error of the latest attempt,
/// if that attempt failed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Slot<T> {
    pub value: Option<T>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub error: Option<FetchError>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            value: None,
            fetched_at: None,
            error: None,
        }
    }
}

impl<T: Clone> Slot<T> {
    /// Fold one fetch outcome into the slot carried over from `prev`.
    pub fn settle(prev: &Slot<T>, outcome: Result<T, FetchError>, at: DateTime<Utc>) -> Self {
        match outcome {
            Ok(value) => Self {
                value: Some(value),
                fetched_at: Some(at),
                error: None,
            },
            Err(err) => Self {
                value: prev.value.clone(),
                fetched_at: prev.fetched_at,
                error: Some(err),
            },
        }
    }

    /// Showing a value that did not come from the latest attempt.
    pub fn is_stale(&self) -> bool {
        self.error.is_some()
    }
}

/// Everything fetched in one poll cycle. Immutable once published.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Snapshot {
    pub seq: u64,
    pub taken_at: DateTime<Utc>,
    /// Both primary resources answered in this cycle.
    pub valid: bool,
    /// Timestamp of the last valid snapshot while the primary resources are
    /// failing.
    pub stale_since: Option<DateTime<Utc>>,
    pub status: Slot<StatusPayload>,
    pub latest_cycle: Slot<CyclePayload>,
    pub trades: Slot<Vec<TradeRecord>>,
    pub shadow_logs: Slot<Vec<ShadowLog>>,
    pub performance: Slot<PerformanceMetrics>,
}

impl Snapshot {
    /// Seed used before the first refresh.
    pub fn empty(at: DateTime<Utc>) -> Self {
        Self {
            seq: 0,
            taken_at: at,
            valid: false,
            stale_since: None,
            status: Slot::default(),
            latest_cycle: Slot::default(),
            trades: Slot::default(),
            shadow_logs: Slot::default(),
            performance: Slot::default(),
        }
    }

    pub fn rows(&self) -> &[DecisionRow] {
        self.latest_cycle
            .value
            .as_ref()
            .map(|c| c.rows.as_slice())
            .unwrap_or(&[])
    }

    pub fn resource_errors(&self) -> Vec<&FetchError> {
        [
            self.status.error.as_ref(),
            self.latest_cycle.error.as_ref(),
            self.trades.error.as_ref(),
            self.shadow_logs.error.as_ref(),
            self.performance.error.as_ref(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn primary_errors(&self) -> Vec<&FetchError> {
        self.resource_errors()
            .into_iter()
            .filter(|e| e.resource.is_primary())
            .collect()
    }

    /// Any slot is showing carried-over data.
    pub fn is_stale(&self) -> bool {
        !self.valid || !self.resource_errors().is_empty()
    }
}
