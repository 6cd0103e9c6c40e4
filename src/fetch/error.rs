use serde::Serialize;
use std::fmt;
use thiserror::Error;

const MAX_MESSAGE_CHARS: usize = 200;

/// Backend endpoints the dashboard talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Resource {
    Status,
    LatestCycle,
    RecentTrades,
    ShadowLogs,
    Performance,
    Suggestions,
    TrialBacktest,
    ApplySettings,
    SuggestionLog,
}

impl Resource {
    pub fn name(&self) -> &'static str {
        match self {
            Resource::Status => "status",
            Resource::LatestCycle => "latest_cycle",
            Resource::RecentTrades => "recent_trades",
            Resource::ShadowLogs => "shadow_logs",
            Resource::Performance => "performance",
            Resource::Suggestions => "suggestions",
            Resource::TrialBacktest => "trial_backtest",
            Resource::ApplySettings => "apply_settings",
            Resource::SuggestionLog => "suggestion_log",
        }
    }

    /// Status and latest cycle decide whether a snapshot is valid.
    pub fn is_primary(&self) -> bool {
        matches!(self, Resource::Status | Resource::LatestCycle)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Error)]
pub enum FetchErrorKind {
    /// Backend unreachable (connect/reset/DNS).
    #[error("network error")]
    Network,
    /// Backend did not answer within the bounded wait.
    #[error("timed out")]
    Timeout,
    /// Non-2xx response.
    #[error("http error")]
    Http,
    /// Well-formed response without `ok: true`.
    #[error("api error")]
    Api,
    /// Body could not be parsed.
    #[error("malformed response")]
    Decode,
    /// Fetcher is missing required configuration.
    #[error("not configured")]
    Config,
}

/// Classified failure of one backend call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Error)]
#[error("{resource} {kind}{}{}", status_suffix(.status), message_suffix(.message))]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub resource: Resource,
    pub status: Option<u16>,
    pub message: String,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

fn message_suffix(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(": {message}")
    }
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, resource: Resource, message: impl AsRef<str>) -> Self {
        Self {
            kind,
            resource,
            status: None,
            message: truncate(message.as_ref()),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn network(resource: Resource, message: impl AsRef<str>) -> Self {
        Self::new(FetchErrorKind::Network, resource, message)
    }

    pub fn timeout(resource: Resource, message: impl AsRef<str>) -> Self {
        Self::new(FetchErrorKind::Timeout, resource, message)
    }

    pub fn http(resource: Resource, status: u16, message: impl AsRef<str>) -> Self {
        Self::new(FetchErrorKind::Http, resource, message).with_status(status)
    }

    pub fn api(resource: Resource, message: impl AsRef<str>) -> Self {
        Self::new(FetchErrorKind::Api, resource, message)
    }

    pub fn decode(resource: Resource, message: impl AsRef<str>) -> Self {
        Self::new(FetchErrorKind::Decode, resource, message)
    }

    pub fn config(resource: Resource, message: impl AsRef<str>) -> Self {
        Self::new(FetchErrorKind::Config, resource, message)
    }

    /// Classify a transport-level reqwest failure.
    pub fn from_reqwest(resource: Resource, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(resource, err.to_string())
        } else if err.is_decode() {
            Self::decode(resource, err.to_string())
        } else if let Some(status) = err.status() {
            Self::http(resource, status.as_u16(), err.to_string())
        } else {
            Self::network(resource, err.to_string())
        }
    }
}

fn truncate(message: &str) -> String {
    let message = message.trim();
    match message.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((idx, _)) => format!("{}…", &message[..idx]),
        None => message.to_string(),
    }
}
