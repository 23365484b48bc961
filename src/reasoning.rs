// src/reasoning.rs

//! Reasoning service client.
//!
//! The service is a stateful HTTP collaborator; its `session_epoch` changes
//! when it restarts, which is how the rest of the system detects "forget
//! everything". Every call carries an explicit deadline; expiry yields a
//! typed transient error, never a hang.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{SyncError, SyncResult};
use crate::host::TabId;
use crate::transcript::Message;

/// Classification of a query outcome. Not a persistent state machine: it
/// only shapes how the reply is presented and which side effects attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One tab is relevant; may carry a focus target.
    Single,
    /// Several tabs are relevant; may carry close candidates.
    Multi,
    /// Bulk tab cleanup; the verbose reply is suppressed in favor of the
    /// close-candidate list.
    Cleanup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderRequest {
    pub text: String,
    pub fire_time: DateTime<Utc>,
    #[serde(default)]
    pub recurring: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceWatch {
    pub product: String,
    pub url: String,
    pub price: f64,
    #[serde(default)]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub reply: String,
    pub mode: Mode,
    #[serde(default)]
    pub focus_tab_id: Option<TabId>,
    #[serde(default)]
    pub close_candidates: Vec<TabId>,
    #[serde(default)]
    pub reminder: Option<ReminderRequest>,
    #[serde(default)]
    pub price_watch: Option<PriceWatch>,
    #[serde(default)]
    pub should_ask_cleanup: bool,
    pub session_epoch: String,
}

/// Seam over the reasoning service so the coordinator and tests never care
/// whether the other side is HTTP or an in-memory fake.
#[async_trait]
pub trait ReasoningApi: Send + Sync {
    async fn query(&self, query: &str, transcript: &[Message]) -> SyncResult<QueryResponse>;

    /// Returns the service's current session epoch. Unreachable service is a
    /// `Transient` error, which callers must never treat as a restart.
    async fn health(&self) -> SyncResult<String>;

    async fn alerts(&self) -> SyncResult<Vec<Alert>>;
    async fn add_watch(&self, watch: &PriceWatch) -> SyncResult<()>;
    async fn mark_alert_read(&self, id: &str) -> SyncResult<()>;
    async fn mark_all_alerts_read(&self) -> SyncResult<()>;
}

/// HTTP implementation backed by reqwest.
#[derive(Clone)]
pub struct HttpReasoningClient {
    client: Client,
    base_url: String,
    deadline: Duration,
}

impl HttpReasoningClient {
    pub fn new(base_url: impl Into<String>, deadline: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            deadline,
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn send_json(
        &self,
        builder: reqwest::RequestBuilder,
        what: &str,
    ) -> SyncResult<serde_json::Value> {
        let fut = async {
            let response = builder.send().await?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<no body>".to_string());
                return Err(SyncError::Transient(format!(
                    "{what}: service error {status}: {body}"
                )));
            }
            Ok(response.json::<serde_json::Value>().await?)
        };

        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Transient(format!(
                "{what}: deadline of {:?} expired",
                self.deadline
            ))),
        }
    }
}

#[async_trait]
impl ReasoningApi for HttpReasoningClient {
    async fn query(&self, query: &str, transcript: &[Message]) -> SyncResult<QueryResponse> {
        let payload = json!({
            "query": query,
            "transcript": transcript,
        });
        let value = self
            .send_json(self.client.post(self.url("query")).json(&payload), "query")
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn health(&self) -> SyncResult<String> {
        let value = self
            .send_json(self.client.get(self.url("health")), "health")
            .await?;
        value
            .get("session_epoch")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| SyncError::Transient("health: missing session_epoch".to_string()))
    }

    async fn alerts(&self) -> SyncResult<Vec<Alert>> {
        let value = self
            .send_json(self.client.get(self.url("alerts")), "alerts")
            .await?;
        let list = value
            .get("alerts")
            .cloned()
            .unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(list)?)
    }

    async fn add_watch(&self, watch: &PriceWatch) -> SyncResult<()> {
        self.send_json(
            self.client.post(self.url("watchlist/add")).json(watch),
            "watchlist/add",
        )
        .await?;
        Ok(())
    }

    async fn mark_alert_read(&self, id: &str) -> SyncResult<()> {
        self.send_json(
            self.client
                .post(self.url(&format!("alerts/{id}/read"))),
            "alerts/read",
        )
        .await?;
        Ok(())
    }

    async fn mark_all_alerts_read(&self) -> SyncResult<()> {
        self.send_json(self.client.post(self.url("alerts/read-all")), "alerts/read-all")
            .await?;
        Ok(())
    }
}
