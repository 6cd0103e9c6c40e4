use crate::scheduler::poller::MAX_INTERVAL;
use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppCfg {
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub backend: BackendCfg,
    #[serde(default)]
    pub poll: PollCfg,
    #[serde(default)]
    pub snapshot: SnapshotCfg,
    #[serde(default)]
    pub diff: DiffCfg,
    #[serde(default)]
    pub optimize: OptimizeCfg,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpCfg {
    #[serde(rename = "userAgent", alias = "useragent", default = "default_ua")]
    pub user_agent: String,
    /// Upper bound on every backend call.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(
        rename = "poolIdleTimeout",
        alias = "poolidletimeout",
        with = "humantime_serde",
        default = "default_pool_idle"
    )]
    pub pool_idle_timeout: Duration,
    #[serde(
        rename = "tcpKeepAlive",
        alias = "tcpkeepalive",
        with = "humantime_serde",
        default = "default_keepalive"
    )]
    pub tcp_keep_alive: Duration,
    #[serde(rename = "poolMaxIdlePerHost", alias = "poolmaxidleperhost", default = "default_pool")]
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            user_agent: default_ua(),
            timeout: default_timeout(),
            pool_idle_timeout: default_pool_idle(),
            tcp_keep_alive: default_keepalive(),
            pool_max_idle_per_host: default_pool(),
        }
    }
}
fn default_ua() -> String {
    "dashsync/0.1".into()
}
fn default_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_pool_idle() -> Duration {
    Duration::from_secs(90)
}
fn default_keepalive() -> Duration {
    Duration::from_secs(60)
}
fn default_pool() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendCfg {
    // Empty means every fetch fails with a configuration error.
    #[serde(rename = "baseUrl", alias = "baseurl", default)]
    pub base_url: String,
    #[serde(rename = "apiKey", alias = "apikey", default)]
    pub api_key: String,
}

impl Default for BackendCfg {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            api_key: "".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollCfg {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,
    #[serde(
        rename = "minInterval",
        alias = "mininterval",
        with = "humantime_serde",
        default = "default_min_interval"
    )]
    pub min_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_heartbeat")]
    pub heartbeat: Duration,
}

impl Default for PollCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_interval(),
            min_interval: default_min_interval(),
            heartbeat: default_heartbeat(),
        }
    }
}
fn default_true() -> bool {
    true
}
fn default_interval() -> Duration {
    Duration::from_secs(15)
}
fn default_min_interval() -> Duration {
    Duration::from_secs(5)
}
fn default_heartbeat() -> Duration {
    Duration::from_millis(250)
}

#[derive(Debug, Deserialize, Clone)]
pub struct SnapshotCfg {
    #[serde(rename = "tradesLimit", alias = "tradeslimit", default = "default_list_limit")]
    pub trades_limit: u32,
    #[serde(rename = "shadowLogsLimit", alias = "shadowlogslimit", default = "default_list_limit")]
    pub shadow_logs_limit: u32,
    #[serde(
        rename = "analyticsLookbackDays",
        alias = "analyticslookbackdays",
        default = "default_lookback"
    )]
    pub analytics_lookback_days: u32,
}

impl Default for SnapshotCfg {
    fn default() -> Self {
        Self {
            trades_limit: default_list_limit(),
            shadow_logs_limit: default_list_limit(),
            analytics_lookback_days: default_lookback(),
        }
    }
}
fn default_list_limit() -> u32 {
    50
}
fn default_lookback() -> u32 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiffCfg {
    /// Decimal places kept on numeric fields before fingerprinting.
    #[serde(default = "default_precision")]
    pub precision: u32,
}

impl Default for DiffCfg {
    fn default() -> Self {
        Self {
            precision: default_precision(),
        }
    }
}
fn default_precision() -> u32 {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct OptimizeCfg {
    #[serde(rename = "lookbackDays", alias = "lookbackdays", default = "default_lookback")]
    pub lookback_days: u32,
    #[serde(
        rename = "preselectThreshold",
        alias = "preselectthreshold",
        default = "default_preselect"
    )]
    pub preselect_threshold: f64,
    #[serde(
        rename = "displayTierThreshold",
        alias = "displaytierthreshold",
        default = "default_display_tier"
    )]
    pub display_tier_threshold: f64,
}

impl Default for OptimizeCfg {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback(),
            preselect_threshold: default_preselect(),
            display_tier_threshold: default_display_tier(),
        }
    }
}
fn default_preselect() -> f64 {
    0.7
}
fn default_display_tier() -> f64 {
    0.6
}

impl AppCfg {
    pub fn load(path: &str) -> Result<Self> {
        let cfg = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(config::Environment::default().separator("__"))
            .build()
            .context("building config")?;

        let app: AppCfg = cfg.try_deserialize().context("deserializing config")?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.poll.min_interval.is_zero(),
            "poll.minInterval must be > 0"
        );
        anyhow::ensure!(
            self.poll.min_interval <= MAX_INTERVAL && self.poll.interval <= MAX_INTERVAL,
            "poll.interval and poll.minInterval must be <= {:?}",
            MAX_INTERVAL
        );
        anyhow::ensure!(!self.poll.heartbeat.is_zero(), "poll.heartbeat must be > 0");
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.optimize.preselect_threshold),
            "optimize.preselectThreshold must be within [0, 1]"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.optimize.display_tier_threshold),
            "optimize.displayTierThreshold must be within [0, 1]"
        );
        anyhow::ensure!(self.diff.precision <= 10, "diff.precision must be <= 10");
        if self.backend.base_url.is_empty() {
            tracing::warn!("backend.baseUrl is empty, every fetch will fail until it is set");
        }
        Ok(())
    }
}
