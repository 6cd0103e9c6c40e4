use crate::core::types::{
    CyclePayload, PerformanceMetrics, ShadowLog, StatusPayload, TradeRecord,
};
use crate::fetch::error::FetchError;
use crate::optimize::types::{DecisionLog, Suggestion, TrialRequest, TrialResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Typed access to the backend. Expected failures come back as a classified
/// `FetchError`; implementations never cache.
#[async_trait]
pub trait ResourceFetcher: Send + Sync + 'static {
    async fn get_status(&self) -> Result<StatusPayload, FetchError>;
    async fn get_latest_cycle(&self) -> Result<CyclePayload, FetchError>;
    async fn get_recent_trades(&self, limit: u32) -> Result<Vec<TradeRecord>, FetchError>;
    async fn get_recent_shadow_logs(&self, limit: u32) -> Result<Vec<ShadowLog>, FetchError>;
    async fn get_performance_metrics(
        &self,
        lookback_days: u32,
    ) -> Result<PerformanceMetrics, FetchError>;
    async fn get_suggested_settings(
        &self,
        lookback_days: u32,
    ) -> Result<Vec<Suggestion>, FetchError>;
    async fn run_trial_backtest(&self, req: &TrialRequest) -> Result<TrialResult, FetchError>;
    async fn apply_settings(&self, settings: &BTreeMap<String, Value>) -> Result<(), FetchError>;
    async fn log_suggestion_decision(&self, entry: &DecisionLog) -> Result<(), FetchError>;
}
