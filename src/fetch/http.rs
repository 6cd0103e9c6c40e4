use crate::config::config::BackendCfg;
use crate::core::types::{
    CyclePayload, PerformanceMetrics, ShadowLog, ShadowLogsPayload, StatusPayload, TradeRecord,
    TradesPayload,
};
use crate::fetch::client::ResourceFetcher;
use crate::fetch::error::{FetchError, Resource};
use crate::optimize::types::{
    DecisionLog, Suggestion, SuggestionsPayload, TrialRequest, TrialResult,
};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

fn endpoint(resource: Resource) -> (Method, &'static str) {
    match resource {
        Resource::Status => (Method::GET, "/api/status"),
        Resource::LatestCycle => (Method::GET, "/api/cycles/latest"),
        Resource::RecentTrades => (Method::GET, "/api/trades"),
        Resource::ShadowLogs => (Method::GET, "/api/shadow-logs"),
        Resource::Performance => (Method::GET, "/api/analytics/performance"),
        Resource::Suggestions => (Method::GET, "/api/optimize/suggestions"),
        Resource::TrialBacktest => (Method::POST, "/api/optimize/backtest"),
        Resource::ApplySettings => (Method::POST, "/api/settings"),
        Resource::SuggestionLog => (Method::POST, "/api/optimize/suggestions/log"),
    }
}

pub struct HttpResourceFetcher {
    client: Client,
    cfg: BackendCfg,
    timeout: Duration,
}

impl HttpResourceFetcher {
    pub fn new(cfg: BackendCfg, client: Client, timeout: Duration) -> Self {
        Self {
            client,
            cfg,
            timeout,
        }
    }

    fn url(&self, resource: Resource) -> Result<String, FetchError> {
        let base = self.cfg.base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(FetchError::config(resource, "backend.baseUrl is not set"));
        }
        Ok(format!("{}{}", base, endpoint(resource).1))
    }

    /// Single funnel for every backend call: bounded wait, envelope check,
    /// typed decode.
    async fn fetch<T: DeserializeOwned>(
        &self,
        resource: Resource,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<T, FetchError> {
        let url = self.url(resource)?;
        let (method, _) = endpoint(resource);

        let mut req = self.client.request(method, &url).query(query);
        if !self.cfg.api_key.is_empty() {
            req = req.bearer_auth(&self.cfg.api_key);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        debug!(%resource, %url, "fetching");
        let exchange = async {
            let resp = req.send().await?;
            let status = resp.status();
            let text = resp.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        let (status, text) = match tokio::time::timeout(self.timeout, exchange).await {
            Err(_) => {
                return Err(FetchError::timeout(
                    resource,
                    format!("no response within {:?}", self.timeout),
                ));
            }
            Ok(Err(e)) => return Err(FetchError::from_reqwest(resource, &e)),
            Ok(Ok(res)) => res,
        };

        decode_envelope(resource, status.as_u16(), &text)
    }
}

/// Every body is `{"ok": bool, "error"?: string, ...payload}`. Anything but
/// `ok: true` is a failure, whatever the HTTP status said.
pub(crate) fn decode_envelope<T: DeserializeOwned>(
    resource: Resource,
    status: u16,
    text: &str,
) -> Result<T, FetchError> {
    let parsed = serde_json::from_str::<Value>(text);

    if !(200..300).contains(&status) {
        let message = parsed
            .as_ref()
            .ok()
            .and_then(|v| v.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| text.to_string());
        return Err(FetchError::http(resource, status, message));
    }

    let value = parsed.map_err(|e| FetchError::decode(resource, e.to_string()))?;
    let Value::Object(mut map) = value else {
        return Err(FetchError::decode(resource, "expected a JSON object"));
    };

    let ok = map.remove("ok");
    let error = map.remove("error");
    if ok != Some(Value::Bool(true)) {
        let message = error
            .as_ref()
            .and_then(Value::as_str)
            .unwrap_or("response did not report ok");
        return Err(FetchError::api(resource, message));
    }

    serde_json::from_value(Value::Object(map)).map_err(|e| FetchError::decode(resource, e.to_string()))
}

#[async_trait]
impl ResourceFetcher for HttpResourceFetcher {
    async fn get_status(&self) -> Result<StatusPayload, FetchError> {
        self.fetch(Resource::Status, &[], None).await
    }

    async fn get_latest_cycle(&self) -> Result<CyclePayload, FetchError> {
        self.fetch(Resource::LatestCycle, &[], None).await
    }

    async fn get_recent_trades(&self, limit: u32) -> Result<Vec<TradeRecord>, FetchError> {
        let payload: TradesPayload = self
            .fetch(Resource::RecentTrades, &[("limit", limit.to_string())], None)
            .await?;
        Ok(payload.trades)
    }

    async fn get_recent_shadow_logs(&self, limit: u32) -> Result<Vec<ShadowLog>, FetchError> {
        let payload: ShadowLogsPayload = self
            .fetch(Resource::ShadowLogs, &[("limit", limit.to_string())], None)
            .await?;
        Ok(payload.logs)
    }

    async fn get_performance_metrics(
        &self,
        lookback_days: u32,
    ) -> Result<PerformanceMetrics, FetchError> {
        self.fetch(
            Resource::Performance,
            &[("lookback_days", lookback_days.to_string())],
            None,
        )
        .await
    }

    async fn get_suggested_settings(
        &self,
        lookback_days: u32,
    ) -> Result<Vec<Suggestion>, FetchError> {
        let payload: SuggestionsPayload = self
            .fetch(
                Resource::Suggestions,
                &[("lookback_days", lookback_days.to_string())],
                None,
            )
            .await?;
        Ok(payload.suggestions)
    }

    async fn run_trial_backtest(&self, req: &TrialRequest) -> Result<TrialResult, FetchError> {
        let body = serde_json::to_value(req)
            .map_err(|e| FetchError::decode(Resource::TrialBacktest, e.to_string()))?;
        self.fetch(Resource::TrialBacktest, &[], Some(body)).await
    }

    async fn apply_settings(&self, settings: &BTreeMap<String, Value>) -> Result<(), FetchError> {
        let _: IgnoredAny = self
            .fetch(
                Resource::ApplySettings,
                &[],
                Some(json!({ "settings": settings })),
            )
            .await?;
        Ok(())
    }

    async fn log_suggestion_decision(&self, entry: &DecisionLog) -> Result<(), FetchError> {
        let body = serde_json::to_value(entry)
            .map_err(|e| FetchError::decode(Resource::SuggestionLog, e.to_string()))?;
        let _: IgnoredAny = self.fetch(Resource::SuggestionLog, &[], Some(body)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::error::FetchErrorKind;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn fetcher(base_url: String, timeout: Duration) -> HttpResourceFetcher {
        let cfg = BackendCfg {
            base_url,
            api_key: "".to_string(),
        };
        HttpResourceFetcher::new(cfg, Client::new(), timeout)
    }

    fn backend() -> Router {
        Router::new()
            .route(
                "/api/status",
                get(|| async { Json(json!({"ok": true, "mode": "paper", "equity": 1000.5})) }),
            )
            .route(
                "/api/cycles/latest",
                get(|| async { Json(json!({"ok": false, "error": "cycle engine offline"})) }),
            )
            .route(
                "/api/trades",
                get(|| async {
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        Json(json!({"ok": false, "error": "maintenance"})),
                    )
                }),
            )
            .route("/api/shadow-logs", get(|| async { "<html>oops</html>" }))
            .route(
                "/api/analytics/performance",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Json(json!({"ok": true}))
                }),
            )
            .route(
                "/api/optimize/suggestions",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    let lookback = q.get("lookback_days").cloned().unwrap_or_default();
                    Json(json!({
                        "ok": true,
                        "suggestions": [{
                            "setting_name": "stop_loss_pct",
                            "current_value": 2.0,
                            "suggested_value": 1.5,
                            "confidence": 0.75,
                            "rationale": format!("lookback {lookback}")
                        }]
                    }))
                }),
            )
            .route(
                "/api/optimize/backtest",
                post(|Json(body): Json<Value>| async move {
                    Json(json!({
                        "ok": true,
                        "metrics": {"total_return_pct": 3.2, "total_trades": 12},
                        "is_custom_seen": body["is_custom"]
                    }))
                }),
            )
            .route(
                "/api/settings",
                post(|Json(_): Json<Value>| async { Json(json!({"ok": true, "applied": 2})) }),
            )
    }

    #[tokio::test]
    async fn test_status_decodes_payload() {
        let f = fetcher(serve(backend()).await, Duration::from_secs(5));
        let status = f.get_status().await.unwrap();
        assert_eq!(status.mode.as_deref(), Some("paper"));
        assert_eq!(status.equity, Some(1000.5));
        // envelope fields are stripped before decoding
        assert!(!status.extra.contains_key("ok"));
    }

    #[tokio::test]
    async fn test_ok_false_is_api_error_even_on_200() {
        let f = fetcher(serve(backend()).await, Duration::from_secs(5));
        let err = f.get_latest_cycle().await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Api);
        assert_eq!(err.resource, Resource::LatestCycle);
        assert_eq!(err.message, "cycle engine offline");
    }

    #[tokio::test]
    async fn test_non_2xx_is_http_error_with_status() {
        let f = fetcher(serve(backend()).await, Duration::from_secs(5));
        let err = f.get_recent_trades(10).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Http);
        assert_eq!(err.status, Some(503));
        assert_eq!(err.message, "maintenance");
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let f = fetcher(serve(backend()).await, Duration::from_secs(5));
        let err = f.get_recent_shadow_logs(10).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Decode);
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let f = fetcher(serve(backend()).await, Duration::from_millis(100));
        let err = f.get_performance_metrics(30).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Timeout);
        assert!(err.status.is_none());
    }

    #[tokio::test]
    async fn test_query_params_and_post_bodies() {
        let f = fetcher(serve(backend()).await, Duration::from_secs(5));

        let suggestions = f.get_suggested_settings(45).await.unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].rationale.as_deref(), Some("lookback 45"));

        let req = TrialRequest {
            settings: BTreeMap::from([("stop_loss_pct".to_string(), json!(1.5))]),
            lookback_days: 30,
            is_custom: true,
        };
        let trial = f.run_trial_backtest(&req).await.unwrap();
        assert_eq!(trial.metrics.total_trades, Some(12));
        assert_eq!(trial.extra["is_custom_seen"], json!(true));

        f.apply_settings(&req.settings).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_base_url_is_config_error() {
        let f = fetcher("".to_string(), Duration::from_secs(5));
        let err = f.get_status().await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Config);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let f = fetcher(format!("http://{addr}"), Duration::from_secs(5));
        let err = f.get_status().await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Network);
    }

    #[test]
    fn test_envelope_without_ok_is_api_error() {
        let err = decode_envelope::<IgnoredAny>(Resource::Status, 200, r#"{"mode":"live"}"#)
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Api);
        assert_eq!(err.message, "response did not report ok");
    }
}
