use crate::core::types::{
    CyclePayload, PerformanceMetrics, ShadowLog, StatusPayload, TradeRecord,
};
use crate::fetch::client::ResourceFetcher;
use crate::fetch::error::{FetchError, Resource};
use crate::optimize::types::{DecisionLog, Suggestion, TrialRequest, TrialResult};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

type Scripted = Result<Value, FetchError>;

/// Scripted backend for tests. Each resource answers from its queue; the
/// last scripted answer repeats once the queue runs dry. Every call is
/// recorded.
#[derive(Default)]
pub struct SimResourceFetcher {
    responses: Mutex<HashMap<Resource, VecDeque<Scripted>>>,
    sticky: Mutex<HashMap<Resource, Scripted>>,
    latency: Mutex<Option<Duration>>,
    calls: Mutex<Vec<Resource>>,
    trial_requests: Mutex<Vec<TrialRequest>>,
    applied: Mutex<Vec<BTreeMap<String, Value>>>,
    decisions: Mutex<Vec<DecisionLog>>,
}

impl SimResourceFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, resource: Resource, payload: Value) {
        self.push(resource, Ok(payload));
    }

    pub fn push_err(&self, resource: Resource, err: FetchError) {
        self.push(resource, Err(err));
    }

    fn push(&self, resource: Resource, answer: Scripted) {
        self.responses
            .lock()
            .unwrap()
            .entry(resource)
            .or_default()
            .push_back(answer);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn calls(&self) -> Vec<Resource> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, resource: Resource) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| **r == resource)
            .count()
    }

    pub fn trial_requests(&self) -> Vec<TrialRequest> {
        self.trial_requests.lock().unwrap().clone()
    }

    pub fn applied(&self) -> Vec<BTreeMap<String, Value>> {
        self.applied.lock().unwrap().clone()
    }

    pub fn decisions(&self) -> Vec<DecisionLog> {
        self.decisions.lock().unwrap().clone()
    }

    async fn answer<T: serde::de::DeserializeOwned>(
        &self,
        resource: Resource,
        empty: Value,
    ) -> Result<T, FetchError> {
        self.calls.lock().unwrap().push(resource);
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let next = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&resource)
            .and_then(|q| q.pop_front());
        let answer = match next {
            Some(answer) => {
                self.sticky.lock().unwrap().insert(resource, answer.clone());
                answer
            }
            None => self
                .sticky
                .lock()
                .unwrap()
                .get(&resource)
                .cloned()
                .unwrap_or(Ok(empty)),
        };

        let value = answer?;
        serde_json::from_value(value).map_err(|e| FetchError::decode(resource, e.to_string()))
    }
}

#[async_trait]
impl ResourceFetcher for SimResourceFetcher {
    async fn get_status(&self) -> Result<StatusPayload, FetchError> {
        self.answer(Resource::Status, json!({})).await
    }

    async fn get_latest_cycle(&self) -> Result<CyclePayload, FetchError> {
        self.answer(Resource::LatestCycle, json!({})).await
    }

    async fn get_recent_trades(&self, _limit: u32) -> Result<Vec<TradeRecord>, FetchError> {
        self.answer(Resource::RecentTrades, json!([])).await
    }

    async fn get_recent_shadow_logs(&self, _limit: u32) -> Result<Vec<ShadowLog>, FetchError> {
        self.answer(Resource::ShadowLogs, json!([])).await
    }

    async fn get_performance_metrics(
        &self,
        _lookback_days: u32,
    ) -> Result<PerformanceMetrics, FetchError> {
        self.answer(Resource::Performance, json!({})).await
    }

    async fn get_suggested_settings(
        &self,
        _lookback_days: u32,
    ) -> Result<Vec<Suggestion>, FetchError> {
        self.answer(Resource::Suggestions, json!([])).await
    }

    async fn run_trial_backtest(&self, req: &TrialRequest) -> Result<TrialResult, FetchError> {
        self.trial_requests.lock().unwrap().push(req.clone());
        self.answer(Resource::TrialBacktest, json!({})).await
    }

    async fn apply_settings(&self, settings: &BTreeMap<String, Value>) -> Result<(), FetchError> {
        let _: serde::de::IgnoredAny = self.answer(Resource::ApplySettings, json!({})).await?;
        self.applied.lock().unwrap().push(settings.clone());
        Ok(())
    }

    async fn log_suggestion_decision(&self, entry: &DecisionLog) -> Result<(), FetchError> {
        let _: serde::de::IgnoredAny = self.answer(Resource::SuggestionLog, json!({})).await?;
        self.decisions.lock().unwrap().push(entry.clone());
        Ok(())
    }
}
