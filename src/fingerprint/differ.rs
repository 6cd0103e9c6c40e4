use crate::fingerprint::fingerprint::{Fingerprint, Fingerprintable, fingerprint};
use crate::snapshot::types::Snapshot;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::warn;

/// Identity keys that moved between two adjacent snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    /// Present in both, fingerprint differs.
    pub changed: BTreeSet<String>,
    /// Only in the newer snapshot.
    pub appeared: BTreeSet<String>,
    /// Only in the older snapshot.
    pub disappeared: BTreeSet<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.appeared.is_empty() && self.disappeared.is_empty()
    }
}

fn index<T: Fingerprintable>(rows: &[T], precision: u32) -> BTreeMap<&str, Fingerprint> {
    rows.iter()
        .map(|r| (r.identity(), fingerprint(r, precision)))
        .collect()
}

/// Compare two row sets by identity. Duplicate identities keep the last row.
pub fn diff_rows<T: Fingerprintable>(prev: &[T], curr: &[T], precision: u32) -> ChangeSet {
    let before = index(prev, precision);
    let after = index(curr, precision);

    let mut out = ChangeSet::default();
    for (key, fp) in &after {
        match before.get(key) {
            Some(old) if old != fp => {
                out.changed.insert(key.to_string());
            }
            Some(_) => {}
            None => {
                out.appeared.insert(key.to_string());
            }
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            out.disappeared.insert(key.to_string());
        }
    }
    out
}

pub fn diff(prev: &Snapshot, curr: &Snapshot, precision: u32) -> ChangeSet {
    diff_rows(prev.rows(), curr.rows(), precision)
}

/// Holds the last published snapshot and diffs each new one against it, so
/// comparisons are always between neighbours.
pub struct ChangeTracker {
    precision: u32,
    previous: Arc<Snapshot>,
    highlights: ChangeSet,
}

impl ChangeTracker {
    pub fn new(seed: Arc<Snapshot>, precision: u32) -> Self {
        Self {
            precision,
            previous: seed,
            highlights: ChangeSet::default(),
        }
    }

    pub fn previous(&self) -> Arc<Snapshot> {
        self.previous.clone()
    }

    /// Entities flagged by the latest cycle. Replaced wholesale each cycle,
    /// so a row that stops changing loses its highlight.
    pub fn highlights(&self) -> &ChangeSet {
        &self.highlights
    }

    pub fn observe(&mut self, curr: Arc<Snapshot>) -> ChangeSet {
        if curr.seq != self.previous.seq + 1 {
            warn!(
                prev = self.previous.seq,
                curr = curr.seq,
                "diffing non-adjacent snapshots"
            );
        }
        let changes = diff(&self.previous, &curr, self.precision);
        self.previous = curr;
        self.highlights = changes.clone();
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CyclePayload, DecisionRow};
    use crate::snapshot::types::Slot;
    use chrono::{TimeZone, Utc};

    fn row(symbol: &str, decision: &str, confidence: f64) -> DecisionRow {
        DecisionRow {
            symbol: symbol.into(),
            decision: Some(decision.into()),
            confidence: Some(confidence),
            ..Default::default()
        }
    }

    fn snap(seq: u64, rows: Vec<DecisionRow>) -> Arc<Snapshot> {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap();
        let mut s = Snapshot::empty(t);
        s.seq = seq;
        s.valid = true;
        s.latest_cycle = Slot {
            value: Some(CyclePayload {
                rows,
                ..Default::default()
            }),
            fetched_at: Some(t),
            error: None,
        };
        Arc::new(s)
    }

    #[test]
    fn test_confidence_jitter_below_precision_is_not_a_change() {
        let s1 = snap(1, vec![row("QQQ", "BUY", 0.812)]);
        let s2 = snap(2, vec![row("QQQ", "BUY", 0.8121)]);
        assert!(diff(&s1, &s2, 2).is_empty());
    }

    #[test]
    fn test_confidence_change_at_precision_is_flagged() {
        let s1 = snap(1, vec![row("QQQ", "BUY", 0.812)]);
        let s2 = snap(2, vec![row("QQQ", "BUY", 0.8121)]);
        let cs = diff(&s1, &s2, 4);
        assert_eq!(cs.changed, BTreeSet::from(["QQQ".to_string()]));
        assert!(cs.appeared.is_empty());
    }

    #[test]
    fn test_appear_and_disappear_are_not_changes() {
        let s1 = snap(1, vec![row("QQQ", "BUY", 0.8), row("SPY", "HOLD", 0.4)]);
        let s2 = snap(2, vec![row("QQQ", "SELL", 0.8), row("IWM", "BUY", 0.6)]);
        let cs = diff(&s1, &s2, 2);
        assert_eq!(cs.changed, BTreeSet::from(["QQQ".to_string()]));
        assert_eq!(cs.appeared, BTreeSet::from(["IWM".to_string()]));
        assert_eq!(cs.disappeared, BTreeSet::from(["SPY".to_string()]));
    }

    #[test]
    fn test_row_order_does_not_matter() {
        let s1 = snap(1, vec![row("QQQ", "BUY", 0.8), row("SPY", "HOLD", 0.4)]);
        let s2 = snap(2, vec![row("SPY", "HOLD", 0.4), row("QQQ", "BUY", 0.8)]);
        assert!(diff(&s1, &s2, 2).is_empty());
    }

    #[test]
    fn test_adjacent_diffs_differ_from_skipping_ahead() {
        // QQQ flips and flips back: each step changes, end-to-end does not
        let s1 = snap(1, vec![row("QQQ", "BUY", 0.8)]);
        let s2 = snap(2, vec![row("QQQ", "HOLD", 0.8)]);
        let s3 = snap(3, vec![row("QQQ", "BUY", 0.8)]);

        let mut tracker = ChangeTracker::new(s1.clone(), 2);
        let d12 = tracker.observe(s2);
        let d23 = tracker.observe(s3.clone());
        assert_eq!(d12.changed.len(), 1);
        assert_eq!(d23.changed.len(), 1);
        assert!(diff(&s1, &s3, 2).is_empty());
    }

    #[test]
    fn test_highlights_decay_when_row_settles() {
        let s0 = snap(0, vec![]);
        let mut tracker = ChangeTracker::new(s0, 2);

        tracker.observe(snap(1, vec![row("QQQ", "BUY", 0.8)]));
        assert!(tracker.highlights().changed.is_empty());

        tracker.observe(snap(2, vec![row("QQQ", "SELL", 0.8)]));
        assert!(tracker.highlights().changed.contains("QQQ"));

        tracker.observe(snap(3, vec![row("QQQ", "SELL", 0.8)]));
        assert!(tracker.highlights().changed.is_empty());
        assert_eq!(tracker.previous().seq, 3);
    }
}
