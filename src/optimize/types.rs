use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A backend-proposed change to one setting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub setting_name: String,
    #[serde(default)]
    pub current_value: Value,
    #[serde(default)]
    pub suggested_value: Value,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub impact: Option<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SuggestionsPayload {
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionDecision {
    Accepted,
    Dismissed,
}

impl fmt::Display for SuggestionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuggestionDecision::Accepted => write!(f, "accepted"),
            SuggestionDecision::Dismissed => write!(f, "dismissed"),
        }
    }
}

/// Audit record sent to the backend when the operator accepts or dismisses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionLog {
    pub setting_name: String,
    pub current_value: Value,
    pub suggested_value: Value,
    pub decision: SuggestionDecision,
}

impl DecisionLog {
    pub fn for_suggestion(s: &Suggestion, decision: SuggestionDecision) -> Self {
        Self {
            setting_name: s.setting_name.clone(),
            current_value: s.current_value.clone(),
            suggested_value: s.suggested_value.clone(),
            decision,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialRequest {
    pub settings: BTreeMap<String, Value>,
    pub lookback_days: u32,
    pub is_custom: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    #[serde(default)]
    pub total_return_pct: Option<f64>,
    #[serde(default)]
    pub win_rate: Option<f64>,
    #[serde(default)]
    pub max_drawdown_pct: Option<f64>,
    #[serde(default)]
    pub sharpe_ratio: Option<f64>,
    #[serde(default)]
    pub total_trades: Option<u64>,
}

/// Outcome of a non-committing what-if run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    #[serde(default)]
    pub metrics: BacktestMetrics,
    #[serde(default)]
    pub baseline: Option<BacktestMetrics>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Difference between two consecutive trials, `current - previous`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrialDelta {
    pub total_return_pct: Option<f64>,
    pub win_rate: Option<f64>,
    pub max_drawdown_pct: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    pub total_trades: Option<i64>,
}

impl TrialDelta {
    pub fn between(current: &BacktestMetrics, previous: &BacktestMetrics) -> Self {
        fn sub(a: Option<f64>, b: Option<f64>) -> Option<f64> {
            Some(a? - b?)
        }
        Self {
            total_return_pct: sub(current.total_return_pct, previous.total_return_pct),
            win_rate: sub(current.win_rate, previous.win_rate),
            max_drawdown_pct: sub(current.max_drawdown_pct, previous.max_drawdown_pct),
            sharpe_ratio: sub(current.sharpe_ratio, previous.sharpe_ratio),
            total_trades: match (current.total_trades, previous.total_trades) {
                (Some(a), Some(b)) => Some(a as i64 - b as i64),
                _ => None,
            },
        }
    }
}

/// Display tier of a suggestion's confidence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    pub fn classify(confidence: f64, high: f64, medium: f64) -> Self {
        if confidence >= high {
            ConfidenceTier::High
        } else if confidence >= medium {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }
}

/// Per-suggestion lifecycle as seen by the operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SuggestionState {
    Unselected,
    Selected,
    Trialed,
    Confirming,
    Applied,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_suggestion_parses_with_optional_fields_missing() {
        let s: Suggestion = serde_json::from_value(json!({
            "setting_name": "stop_loss_pct",
            "current_value": 2.0,
            "suggested_value": 1.5,
            "confidence": 0.75
        }))
        .unwrap();
        assert_eq!(s.setting_name, "stop_loss_pct");
        assert_eq!(s.suggested_value, json!(1.5));
        assert!(s.rationale.is_none());
        assert!(s.impact.is_none());
    }

    #[test]
    fn test_decision_serializes_lowercase() {
        let log = DecisionLog {
            setting_name: "take_profit_pct".into(),
            current_value: json!(4.0),
            suggested_value: json!(5.0),
            decision: SuggestionDecision::Dismissed,
        };
        let v = serde_json::to_value(&log).unwrap();
        assert_eq!(v["decision"], json!("dismissed"));
    }

    #[test]
    fn test_trial_delta_skips_missing_metrics() {
        let prev = BacktestMetrics {
            total_return_pct: Some(4.0),
            win_rate: Some(0.5),
            total_trades: Some(40),
            ..Default::default()
        };
        let curr = BacktestMetrics {
            total_return_pct: Some(6.5),
            win_rate: None,
            total_trades: Some(35),
            ..Default::default()
        };
        let delta = TrialDelta::between(&curr, &prev);
        assert_eq!(delta.total_return_pct, Some(2.5));
        assert_eq!(delta.win_rate, None);
        assert_eq!(delta.total_trades, Some(-5));
    }

    #[test]
    fn test_confidence_tiers() {
        assert_eq!(ConfidenceTier::classify(0.75, 0.7, 0.6), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::classify(0.7, 0.7, 0.6), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::classify(0.65, 0.7, 0.6), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::classify(0.5, 0.7, 0.6), ConfidenceTier::Low);
    }
}
