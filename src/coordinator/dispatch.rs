// src/coordinator/dispatch.rs

//! Query dispatch: bounded-time handling, late-reply side effects, and the
//! best-effort focus/close operations.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Coordinator;
use crate::error::{SyncError, SyncResult};
use crate::host::TabId;
use crate::reasoning::{Mode, QueryResponse};
use crate::reminders::ScheduleReport;
use crate::store::keys;
use crate::transcript::{self, Message};

/// Per-id result of a bulk close. Partial failure is terminal: the
/// succeeded subset is never rolled back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseReport {
    pub closed: Vec<TabId>,
    pub failed: Vec<TabId>,
}

/// Typed outcome of `handle_query`, returned within the T1 bound.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Answered {
        reply: String,
        mode: Mode,
        focused: Option<TabId>,
        close_report: Option<CloseReport>,
        reminder: Option<ScheduleReport>,
    },
    /// The reasoning service did not answer within T1. If its reply lands
    /// later, side effects still apply but the transcript gains no second
    /// entry for the same logical answer.
    TimedOut,
}

/// Side effects extracted from one reply.
#[derive(Debug, Clone, Default)]
struct AppliedEffects {
    focused: Option<TabId>,
    close_report: Option<CloseReport>,
    reminder: Option<ScheduleReport>,
    ask_cleanup: bool,
}

impl Coordinator {
    /// Dispatch one query. Always returns within the configured T1 bound;
    /// a slow or unreachable reasoning service yields `TimedOut` (or a
    /// typed error), never a hang.
    pub async fn handle_query(
        self: &Arc<Self>,
        query: &str,
        snapshot: &[Message],
    ) -> SyncResult<QueryOutcome> {
        // Opportunistic reconcile; a failure here must not block dispatch.
        if let Err(e) = self.reconcile_epoch().await {
            warn!(error = %e, "pre-query reconcile failed");
        }

        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel::<SyncResult<QueryOutcome>>();

        let coordinator = Arc::clone(self);
        let query = query.to_string();
        let snapshot = snapshot.to_vec();
        tokio::spawn(async move {
            let result = coordinator
                .complete_query(request_id, &query, &snapshot)
                .await;
            // Receiver gone means the caller already gave up; the work above
            // still ran to completion, which is the point.
            let _ = tx.send(result);
        });

        match tokio::time::timeout(self.query_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(SyncError::Transient(
                "dispatch task dropped its reply".to_string(),
            )),
            Err(_) => {
                self.timed_out.lock().await.insert(request_id);
                info!(%request_id, "query timed out; late reply will apply side effects only");
                Ok(QueryOutcome::TimedOut)
            }
        }
    }

    /// The slow half of dispatch: talk to the service, apply side effects,
    /// and append the reply unless the caller already timed out.
    async fn complete_query(
        self: &Arc<Self>,
        request_id: Uuid,
        query: &str,
        snapshot: &[Message],
    ) -> SyncResult<QueryOutcome> {
        let response = match self.service.query(query, snapshot).await {
            Ok(response) => response,
            Err(e) => {
                // The caller may already hold a timeout for this id; a failed
                // query produces no late reply, so release it now.
                self.timed_out.lock().await.remove(&request_id);
                return Err(e);
            }
        };
        let effects = self.apply_effects(&response).await;

        let late = self.timed_out.lock().await.remove(&request_id);
        let reply = presented_reply(&response, &effects);
        if late {
            debug!(%request_id, "late reply: transcript untouched");
        } else {
            self.append_reply(&reply, &effects).await?;
        }

        Ok(QueryOutcome::Answered {
            reply,
            mode: response.mode,
            focused: effects.focused,
            close_report: effects.close_report,
            reminder: effects.reminder,
        })
    }

    /// Apply every side effect the reply carries. Individually best-effort:
    /// a stale focus target or a down watchlist endpoint never fails the
    /// query as a whole.
    async fn apply_effects(self: &Arc<Self>, response: &QueryResponse) -> AppliedEffects {
        let mut effects = AppliedEffects::default();

        if let Some(target) = response.focus_tab_id {
            effects.focused = self.apply_focus(target).await;
        }

        if !response.close_candidates.is_empty() {
            effects.close_report = Some(self.apply_close(&response.close_candidates).await);
        }

        if let Some(reminder) = &response.reminder {
            match self.reminders.schedule(reminder).await {
                Ok(report) => effects.reminder = Some(report),
                Err(e) => warn!(error = %e, "reminder scheduling failed"),
            }
        }

        if let Some(watch) = &response.price_watch {
            if let Err(e) = self.service.add_watch(watch).await {
                warn!(product = %watch.product, error = %e, "price watch not recorded");
            }
        }

        if response.should_ask_cleanup {
            effects.ask_cleanup = self.claim_cleanup_prompt().await;
        }

        effects
    }

    /// Re-validate and focus a tab. Tabs are volatile: a stale target is a
    /// logged no-op, never raised to the caller.
    pub async fn apply_focus(&self, target: TabId) -> Option<TabId> {
        if !self.host.exists(target).await {
            warn!(target, "focus target no longer exists; skipping");
            return None;
        }
        match self.host.focus(target).await {
            Ok(()) => Some(target),
            Err(e) => {
                warn!(target, error = %e, "focus failed; skipping");
                None
            }
        }
    }

    /// Best-effort bulk close with per-id outcomes.
    pub async fn apply_close(&self, ids: &[TabId]) -> CloseReport {
        let mut report = CloseReport::default();
        for &id in ids {
            match self.host.close(id).await {
                Ok(()) => {
                    self.remove_overlay(id).await;
                    if let Err(e) =
                        crate::overlay::set_visible_flag(self.store.as_ref(), id, false).await
                    {
                        debug!(id, error = %e, "visibility flag not cleared");
                    }
                    report.closed.push(id);
                }
                Err(e) => {
                    debug!(id, error = %e, "close failed; continuing");
                    report.failed.push(id);
                }
            }
        }
        if !report.failed.is_empty() {
            info!(
                closed = report.closed.len(),
                failed = report.failed.len(),
                "bulk close partially succeeded"
            );
        }
        report
    }

    /// The cleanup prompt is asked at most once; the flag lives in the
    /// shared store so a restarted coordinator does not re-ask.
    async fn claim_cleanup_prompt(&self) -> bool {
        let already = matches!(
            self.store.get(keys::ASKED_CLEANUP_ONCE).await,
            Ok(Some(v)) if v.as_bool() == Some(true)
        );
        if already {
            return false;
        }
        if let Err(e) = self.store.set(keys::ASKED_CLEANUP_ONCE, json!(true)).await {
            warn!(error = %e, "could not persist cleanup-prompt flag");
            return false;
        }
        true
    }

    /// Append the assistant's reply (and the one-time cleanup prompt) to the
    /// shared transcript. The panel already persisted the user turn, so we
    /// load the current store copy rather than trusting our snapshot.
    async fn append_reply(&self, reply: &str, effects: &AppliedEffects) -> SyncResult<()> {
        let mut current = transcript::load(self.store.as_ref()).await?;
        current.push(Message::assistant(reply));
        if effects.ask_cleanup {
            current.push(Message::system(
                "You have several tabs unrelated to this. Want me to close them?",
            ));
        }
        transcript::persist(self.store.as_ref(), &current).await
    }
}

/// The text actually shown for a reply. Cleanup mode suppresses the verbose
/// reply in favor of the bulk close-candidate result.
fn presented_reply(response: &QueryResponse, effects: &AppliedEffects) -> String {
    if response.mode != Mode::Cleanup {
        return response.reply.clone();
    }
    match &effects.close_report {
        Some(report) if !report.failed.is_empty() => format!(
            "Closed {} tabs ({} could not be closed).",
            report.closed.len(),
            report.failed.len()
        ),
        Some(report) => format!("Closed {} tabs.", report.closed.len()),
        None => response.reply.clone(),
    }
}
