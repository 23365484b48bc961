// src/config/mod.rs
// All tunables load from the environment (.env supported), with defaults
// that match the production deployment.

use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // ── Reasoning service
    pub reasoning_base_url: String,
    /// Per-request HTTP deadline (seconds). Expiry yields a typed transient
    /// error, never a hang.
    pub http_timeout_secs: u64,
    /// T1: bound on handle_query as observed by the caller (seconds).
    pub query_timeout_secs: u64,

    // ── Reconciliation cadence
    /// Epoch/alert polling interval while at least one panel is open
    /// (seconds).
    pub poll_interval_secs: u64,

    // ── Reminder scheduling
    /// Minimum lead time for a reminder to be accepted as-is (seconds).
    pub reminder_min_lead_secs: u64,
    /// How many daily occurrences a recurring reminder materializes up
    /// front. A bounded horizon, not an invariant.
    pub recurrence_horizon_days: u32,
}

fn env_var_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        // Load from .env first if present; plain env vars still win.
        let _ = dotenvy::dotenv();

        Self {
            reasoning_base_url: env_var_or(
                "TABMIND_REASONING_URL",
                "http://127.0.0.1:8000".to_string(),
            ),
            http_timeout_secs: env_var_or("TABMIND_HTTP_TIMEOUT_SECS", 8),
            query_timeout_secs: env_var_or("TABMIND_QUERY_TIMEOUT_SECS", 12),
            poll_interval_secs: env_var_or("TABMIND_POLL_INTERVAL_SECS", 30),
            reminder_min_lead_secs: env_var_or("TABMIND_REMINDER_MIN_LEAD_SECS", 60),
            recurrence_horizon_days: env_var_or("TABMIND_RECURRENCE_HORIZON_DAYS", 30),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reasoning_base_url: "http://127.0.0.1:8000".to_string(),
            http_timeout_secs: 8,
            query_timeout_secs: 12,
            poll_interval_secs: 30,
            reminder_min_lead_secs: 60,
            recurrence_horizon_days: 30,
        }
    }
}
