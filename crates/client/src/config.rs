//! Client configuration and endpoint derivation

use std::time::Duration;

use downlink_protocol::{Subject, TerminalParams};
use url::Url;

use crate::error::ClientError;

/// Default idle countdown shown next to a waiting run.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Reconnect schedule for one stream connection. Counters are private to
/// each connection instance, never shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// First-retry delay
    pub base: Duration,
    /// Upper bound on any single delay
    pub cap: Duration,
    /// Abnormal closes tolerated before surfacing a terminal error
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 6,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given 1-based attempt: `min(cap, base * 2^(attempt-1))`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = 2u32.saturating_pow(exponent);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Connection settings shared by every subscription a client opens.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP(S) origin of the monitored server; WebSocket endpoints are
    /// derived from it at runtime.
    pub base_url: Url,
    pub retry: RetryPolicy,
    pub idle_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            retry: RetryPolicy::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// WebSocket endpoint for a subject's stream.
    pub fn ws_endpoint(&self, subject: &Subject) -> Result<Url, ClientError> {
        let mut url = self
            .base_url
            .join(&subject.ws_path())
            .map_err(|e| ClientError::Endpoint(e.to_string()))?;
        to_ws_scheme(&mut url)?;
        Ok(url)
    }

    /// WebSocket endpoint for an interactive terminal, carrying the
    /// geometry (and optional cwd) the remote shell is spawned with.
    pub fn terminal_endpoint(&self, params: &TerminalParams) -> Result<Url, ClientError> {
        let mut url = self
            .base_url
            .join("/api/terminal/ws")
            .map_err(|e| ClientError::Endpoint(e.to_string()))?;
        url.set_query(Some(&params.query_string()));
        to_ws_scheme(&mut url)?;
        Ok(url)
    }
}

fn to_ws_scheme(url: &mut Url) -> Result<(), ClientError> {
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ClientError::Endpoint(format!(
                "unsupported scheme: {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::Endpoint("cannot set websocket scheme".to_string()))
}
