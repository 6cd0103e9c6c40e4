use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[async_trait::async_trait]
pub trait Actor: Send + Sync + 'static {
    async fn run(self) -> Result<()>;
}

// ----------- Backend payloads -----------------

/// Account / engine status as reported by the backend.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub equity: Option<f64>,
    #[serde(default)]
    pub cash: Option<f64>,
    #[serde(default)]
    pub buying_power: Option<f64>,
    #[serde(default)]
    pub market_open: Option<bool>,
    #[serde(default)]
    pub last_cycle_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub qty: Option<f64>,
    #[serde(default)]
    pub avg_price: Option<f64>,
}

/// One symbol's row in a decision cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionRow {
    pub symbol: String,
    #[serde(default)]
    pub decision: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub hold_reason: Option<String>,
    #[serde(default)]
    pub position: Option<PositionState>,
    // notes, timings, model ids etc. Never part of the fingerprint.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CyclePayload {
    #[serde(default)]
    pub cycle_id: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub rows: Vec<DecisionRow>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub qty: Option<f64>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub executed_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TradesPayload {
    #[serde(default)]
    pub trades: Vec<TradeRecord>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowLog {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub decision: Option<String>,
    #[serde(default)]
    pub logged_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowLogsPayload {
    #[serde(default)]
    pub logs: Vec<ShadowLog>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
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
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ----------- Operator messages -----------------

/// Where an alert came from, so the view can group them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertSource {
    Refresh,
    Optimize,
}

/// Explicit, dismissible message for the operator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperatorAlert {
    pub source: AlertSource,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl OperatorAlert {
    pub fn new(source: AlertSource, message: impl Into<String>, raised_at: DateTime<Utc>) -> Self {
        Self {
            source,
            message: message.into(),
            raised_at,
        }
    }
}
