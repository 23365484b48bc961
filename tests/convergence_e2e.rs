//! End-to-end convergence tests.
//!
//! Exercises the coordinator, epoch guard, reminder engine, and panels
//! against in-memory implementations of the store, tab host, and reasoning
//! service: the same seams the demo binary wires up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use tabmind::config::Config;
use tabmind::coordinator::{Coordinator, QueryOutcome};
use tabmind::error::{SyncError, SyncResult};
use tabmind::host::{MemoryTabHost, TabHost};
use tabmind::messages::ContextMessage;
use tabmind::notify::{LogNotifier, Notifier};
use tabmind::panel::Panel;
use tabmind::reasoning::{Alert, Mode, PriceWatch, QueryResponse, ReasoningApi, ReminderRequest};
use tabmind::reminders::{
    PlanConfig, ReminderEngine, ReminderScheduler, ScheduleReport, TokioScheduler,
};
use tabmind::store::{keys, MemoryStore, SharedStore};
use tabmind::transcript::{self, Message};

// ============================================================================
// Test Doubles
// ============================================================================

/// Scriptable reasoning service.
struct FakeService {
    epoch: Mutex<String>,
    reachable: AtomicBool,
    /// Next response to hand out from `query`.
    response: Mutex<QueryResponse>,
    /// Artificial latency before `query` answers.
    query_delay: Mutex<Duration>,
    alerts: Mutex<Vec<Alert>>,
    read_ids: Mutex<Vec<String>>,
    watches: Mutex<Vec<PriceWatch>>,
}

impl FakeService {
    fn new(epoch: &str) -> Arc<Self> {
        Arc::new(Self {
            epoch: Mutex::new(epoch.to_string()),
            reachable: AtomicBool::new(true),
            response: Mutex::new(plain_reply("ok")),
            query_delay: Mutex::new(Duration::ZERO),
            alerts: Mutex::new(Vec::new()),
            read_ids: Mutex::new(Vec::new()),
            watches: Mutex::new(Vec::new()),
        })
    }

    async fn set_epoch(&self, epoch: &str) {
        *self.epoch.lock().await = epoch.to_string();
    }

    fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    async fn set_response(&self, response: QueryResponse) {
        *self.response.lock().await = response;
    }

    async fn set_query_delay(&self, delay: Duration) {
        *self.query_delay.lock().await = delay;
    }

    fn down(&self) -> SyncError {
        SyncError::Transient("service unreachable".to_string())
    }
}

fn plain_reply(text: &str) -> QueryResponse {
    QueryResponse {
        reply: text.to_string(),
        mode: Mode::Single,
        focus_tab_id: None,
        close_candidates: Vec::new(),
        reminder: None,
        price_watch: None,
        should_ask_cleanup: false,
        session_epoch: "e1".to_string(),
    }
}

#[async_trait::async_trait]
impl ReasoningApi for FakeService {
    async fn query(&self, _query: &str, _transcript: &[Message]) -> SyncResult<QueryResponse> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(self.down());
        }
        let delay = *self.query_delay.lock().await;
        tokio::time::sleep(delay).await;
        Ok(self.response.lock().await.clone())
    }

    async fn health(&self) -> SyncResult<String> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(self.down());
        }
        Ok(self.epoch.lock().await.clone())
    }

    async fn alerts(&self) -> SyncResult<Vec<Alert>> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(self.down());
        }
        Ok(self.alerts.lock().await.clone())
    }

    async fn add_watch(&self, watch: &PriceWatch) -> SyncResult<()> {
        self.watches.lock().await.push(watch.clone());
        Ok(())
    }

    async fn mark_alert_read(&self, id: &str) -> SyncResult<()> {
        self.read_ids.lock().await.push(id.to_string());
        let mut alerts = self.alerts.lock().await;
        if let Some(alert) = alerts.iter_mut().find(|a| a.id == id) {
            alert.read = true;
        }
        Ok(())
    }

    async fn mark_all_alerts_read(&self) -> SyncResult<()> {
        for alert in self.alerts.lock().await.iter_mut() {
            alert.read = true;
        }
        Ok(())
    }
}

/// Scheduler wrapper that refuses one specific entry name.
struct FlakyScheduler {
    inner: Arc<TokioScheduler>,
    poisoned: String,
}

#[async_trait::async_trait]
impl ReminderScheduler for FlakyScheduler {
    async fn register(&self, name: &str, fire_at: DateTime<Utc>) -> SyncResult<()> {
        if name == self.poisoned {
            return Err(SyncError::Transient("registration refused".to_string()));
        }
        self.inner.register(name, fire_at).await
    }

    async fn cancel(&self, name: &str) -> SyncResult<()> {
        self.inner.cancel(name).await
    }

    async fn names(&self) -> Vec<String> {
        self.inner.names().await
    }
}

struct SilentNotifier;

#[async_trait::async_trait]
impl Notifier for SilentNotifier {
    async fn notify(&self, _title: &str, _body: &str) {}
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    service: Arc<FakeService>,
    store: Arc<MemoryStore>,
    host: Arc<MemoryTabHost>,
    reminders: Arc<ReminderEngine>,
    coordinator: Arc<Coordinator>,
    scheduler: Arc<TokioScheduler>,
}

/// Wire a full system around the fakes. `min_lead_secs = 0` lets tests use
/// sub-second fire times.
async fn harness(query_timeout_secs: u64) -> Harness {
    harness_with_store(query_timeout_secs, Arc::new(MemoryStore::new())).await
}

async fn harness_with_store(query_timeout_secs: u64, store: Arc<MemoryStore>) -> Harness {
    let service = FakeService::new("e1");
    let host = Arc::new(MemoryTabHost::new());
    let (scheduler, fired) = TokioScheduler::new();
    let reminders = Arc::new(ReminderEngine::new(
        scheduler.clone(),
        store.clone(),
        host.clone(),
        Arc::new(SilentNotifier),
        PlanConfig::new(0, 30),
    ));

    let config = Config {
        query_timeout_secs,
        ..Config::default()
    };
    let coordinator = Coordinator::new(
        service.clone(),
        store.clone(),
        host.clone(),
        reminders.clone(),
        &config,
    );
    coordinator.spawn_fire_loop(fired);

    Harness {
        service,
        store,
        host,
        reminders,
        coordinator,
        scheduler,
    }
}

async fn seed_transcript(store: &MemoryStore, n: usize) {
    let messages: Vec<Message> = (0..n).map(|i| Message::user(format!("m{i}"))).collect();
    transcript::persist(store, &messages).await.unwrap();
}

fn future_reminder(text: &str, secs: i64) -> ReminderRequest {
    ReminderRequest {
        text: text.to_string(),
        fire_time: Utc::now() + ChronoDuration::seconds(secs),
        recurring: false,
    }
}

// ============================================================================
// Epoch Guard
// ============================================================================

#[tokio::test]
async fn test_first_run_defensively_clears_and_persists_epoch() {
    let h = harness(5).await;
    seed_transcript(&h.store, 2).await;

    let reset = h.coordinator.reconcile_epoch().await.unwrap();

    assert!(reset);
    assert!(transcript::load(h.store.as_ref()).await.unwrap().is_empty());
    assert_eq!(
        h.store.get(keys::SESSION_EPOCH).await.unwrap(),
        Some(serde_json::json!("e1"))
    );
}

#[tokio::test]
async fn test_epoch_change_clears_transcript_and_cancels_reminders() {
    let h = harness(5).await;
    h.coordinator.reconcile_epoch().await.unwrap();

    seed_transcript(&h.store, 5).await;
    for name in ["a", "b", "c"] {
        h.reminders
            .schedule(&future_reminder(name, 3600))
            .await
            .unwrap();
    }
    assert_eq!(h.scheduler.names().await.len(), 3);

    h.service.set_epoch("e2").await;
    let reset = h.coordinator.reconcile_epoch().await.unwrap();

    assert!(reset);
    assert!(transcript::load(h.store.as_ref()).await.unwrap().is_empty());
    assert!(h.scheduler.names().await.is_empty());
    // Aliases cleared too, not only the canonical key.
    for alias in keys::TRANSCRIPT_ALIASES {
        assert!(h.store.get(alias).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_unreachable_service_never_clears_state() {
    let h = harness(5).await;
    h.coordinator.reconcile_epoch().await.unwrap();
    seed_transcript(&h.store, 3).await;
    h.reminders
        .schedule(&future_reminder("keep me", 3600))
        .await
        .unwrap();

    h.service.set_reachable(false);
    let reset = h.coordinator.reconcile_epoch().await.unwrap();

    assert!(!reset);
    assert_eq!(transcript::load(h.store.as_ref()).await.unwrap().len(), 3);
    assert_eq!(h.scheduler.names().await, vec!["keep me".to_string()]);
}

#[tokio::test]
async fn test_concurrent_reconciles_reset_exactly_once() {
    let h = harness(5).await;
    h.coordinator.reconcile_epoch().await.unwrap();
    seed_transcript(&h.store, 5).await;
    h.service.set_epoch("e2").await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let coordinator = h.coordinator.clone();
        handles.push(tokio::spawn(
            async move { coordinator.reconcile_epoch().await },
        ));
    }
    let mut resets = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            resets += 1;
        }
    }

    assert_eq!(resets, 1, "redundant invocations must be idempotent no-ops");
    assert!(transcript::load(h.store.as_ref()).await.unwrap().is_empty());
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test]
async fn test_answer_is_appended_and_focus_applied() {
    let h = harness(5).await;
    h.coordinator.reconcile_epoch().await.unwrap();
    let _tab = h.host.open_tab(7).await;
    h.service
        .set_response(QueryResponse {
            reply: "that tab has it".to_string(),
            focus_tab_id: Some(7),
            ..plain_reply("")
        })
        .await;

    let snapshot = vec![Message::user("where was that article?")];
    transcript::persist(h.store.as_ref(), &snapshot).await.unwrap();
    let outcome = h
        .coordinator
        .handle_query("where was that article?", &snapshot)
        .await
        .unwrap();

    match outcome {
        QueryOutcome::Answered { reply, focused, .. } => {
            assert_eq!(reply, "that tab has it");
            assert_eq!(focused, Some(7));
        }
        other => panic!("expected answer, got {other:?}"),
    }
    assert_eq!(h.host.focused().await, Some(7));

    let stored = transcript::load(h.store.as_ref()).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1], Message::assistant("that tab has it"));
}

#[tokio::test]
async fn test_stale_focus_target_is_a_noop() {
    let h = harness(5).await;
    h.service
        .set_response(QueryResponse {
            focus_tab_id: Some(99),
            ..plain_reply("gone tab")
        })
        .await;

    let outcome = h.coordinator.handle_query("find it", &[]).await.unwrap();

    match outcome {
        QueryOutcome::Answered { focused, .. } => assert_eq!(focused, None),
        other => panic!("expected answer, got {other:?}"),
    }
    assert_eq!(h.host.focused().await, None);
}

#[tokio::test]
async fn test_bulk_close_reports_partial_failure() {
    let h = harness(5).await;
    let _t1 = h.host.open_tab(1).await;
    let _t2 = h.host.open_tab(2).await;
    // Tab 3 never opened: closing it fails, the rest still close.
    h.service
        .set_response(QueryResponse {
            mode: Mode::Cleanup,
            close_candidates: vec![1, 2, 3],
            ..plain_reply("closing")
        })
        .await;

    let outcome = h.coordinator.handle_query("clean up", &[]).await.unwrap();

    match outcome {
        QueryOutcome::Answered {
            reply,
            close_report: Some(report),
            ..
        } => {
            assert_eq!(report.closed, vec![1, 2]);
            assert_eq!(report.failed, vec![3]);
            // Cleanup mode suppresses the verbose reply.
            assert_eq!(reply, "Closed 2 tabs (1 could not be closed).");
        }
        other => panic!("expected answer with close report, got {other:?}"),
    }
    assert!(!h.host.exists(1).await);
    assert!(!h.host.exists(2).await);
}

#[tokio::test]
async fn test_timeout_then_late_reply_applies_effects_without_transcript_entry() {
    let h = harness(1).await;
    h.coordinator.reconcile_epoch().await.unwrap();
    let _tab = h.host.open_tab(4).await;
    h.service.set_query_delay(Duration::from_secs(2)).await;
    h.service
        .set_response(QueryResponse {
            reply: "late answer".to_string(),
            focus_tab_id: Some(4),
            reminder: Some(future_reminder("stretch", 3600)),
            ..plain_reply("")
        })
        .await;

    let snapshot = vec![Message::user("remind me to stretch in an hour")];
    transcript::persist(h.store.as_ref(), &snapshot).await.unwrap();
    let outcome = h
        .coordinator
        .handle_query("remind me to stretch in an hour", &snapshot)
        .await
        .unwrap();
    assert!(matches!(outcome, QueryOutcome::TimedOut));

    // Let the late reply land.
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(h.host.focused().await, Some(4), "late focus still applies");
    assert_eq!(h.scheduler.names().await, vec!["stretch".to_string()]);
    let stored = transcript::load(h.store.as_ref()).await.unwrap();
    assert_eq!(
        stored.len(),
        1,
        "no second transcript entry for the same logical answer"
    );
}

#[tokio::test]
async fn test_price_watch_is_recorded() {
    let h = harness(5).await;
    h.service
        .set_response(QueryResponse {
            price_watch: Some(PriceWatch {
                product: "noise-cancelling headphones".to_string(),
                url: "https://shop.example/p/123".to_string(),
                price: 249.0,
                threshold: Some(10.0),
            }),
            ..plain_reply("watching the price")
        })
        .await;

    h.coordinator
        .handle_query("watch this price", &[])
        .await
        .unwrap();

    let watches = h.service.watches.lock().await;
    assert_eq!(watches.len(), 1);
    assert_eq!(watches[0].product, "noise-cancelling headphones");
}

#[tokio::test]
async fn test_cleanup_prompt_is_asked_at_most_once() {
    let h = harness(5).await;
    h.service
        .set_response(QueryResponse {
            should_ask_cleanup: true,
            ..plain_reply("sure")
        })
        .await;

    h.coordinator.handle_query("first", &[]).await.unwrap();
    h.coordinator.handle_query("second", &[]).await.unwrap();

    let stored = transcript::load(h.store.as_ref()).await.unwrap();
    let prompts = stored
        .iter()
        .filter(|m| m.text.contains("Want me to close them?"))
        .count();
    assert_eq!(prompts, 1);
}

// ============================================================================
// Reminders
// ============================================================================

#[tokio::test]
async fn test_fired_reminder_reaches_every_open_tab_without_day_suffix() {
    let h = harness(5).await;
    let mut tab1 = h.host.open_tab(1).await;
    let mut tab2 = h.host.open_tab(2).await;

    // Direct registration with a day suffix, as a recurring entry would be.
    h.scheduler
        .register(
            "stretch (Day 1)",
            Utc::now() + ChronoDuration::milliseconds(100),
        )
        .await
        .unwrap();

    let expect = ContextMessage::ShowNotification {
        text: "stretch".to_string(),
    };
    let got1 = tokio::time::timeout(Duration::from_secs(2), tab1.recv())
        .await
        .expect("tab 1 never notified")
        .unwrap();
    let got2 = tokio::time::timeout(Duration::from_secs(2), tab2.recv())
        .await
        .expect("tab 2 never notified")
        .unwrap();
    assert_eq!(got1, expect);
    assert_eq!(got2, expect);

    let pending = h.store.get(keys::PENDING_NOTIFICATION).await.unwrap();
    assert_eq!(
        pending.unwrap().get("text").unwrap(),
        &serde_json::json!("stretch")
    );
}

#[tokio::test]
async fn test_internal_reminder_names_never_surface() {
    let h = harness(5).await;
    let mut tab = h.host.open_tab(1).await;

    h.reminders.on_fire("__tabmind_selfcheck").await.unwrap();

    assert!(h.store.get(keys::PENDING_NOTIFICATION).await.unwrap().is_none());
    assert!(
        tokio::time::timeout(Duration::from_millis(100), tab.recv())
            .await
            .is_err(),
        "internal reminder must not broadcast"
    );
}

#[tokio::test]
async fn test_dismissal_fans_out_everywhere() {
    let h = harness(5).await;
    let mut tab = h.host.open_tab(1).await;

    h.reminders.on_fire("stretch").await.unwrap();
    assert_eq!(
        tab.recv().await,
        Some(ContextMessage::ShowNotification {
            text: "stretch".to_string()
        })
    );

    h.coordinator.dismiss_notification().await.unwrap();
    h.coordinator.dismiss_notification().await.unwrap(); // idempotent

    assert!(h.store.get(keys::PENDING_NOTIFICATION).await.unwrap().is_none());
    assert_eq!(tab.recv().await, Some(ContextMessage::DismissNotification));
    assert_eq!(tab.recv().await, Some(ContextMessage::DismissNotification));
}

#[tokio::test]
async fn test_recurring_registration_failure_does_not_block_later_entries() {
    let store = Arc::new(MemoryStore::new());
    let host = Arc::new(MemoryTabHost::new());
    let (inner, _fired) = TokioScheduler::new();
    let flaky = Arc::new(FlakyScheduler {
        inner: inner.clone(),
        poisoned: "water plants (Day 5)".to_string(),
    });
    let engine = ReminderEngine::new(
        flaky,
        store,
        host,
        Arc::new(LogNotifier),
        PlanConfig::new(60, 30),
    );

    let report: ScheduleReport = engine
        .schedule(&ReminderRequest {
            text: "water plants".to_string(),
            fire_time: Utc::now() + ChronoDuration::hours(2),
            recurring: true,
        })
        .await
        .unwrap();

    assert_eq!(report.requested, 30);
    assert_eq!(report.registered, 29);
    let names = inner.names().await;
    assert!(!names.contains(&"water plants (Day 5)".to_string()));
    assert!(names.contains(&"water plants (Day 6)".to_string()));
    assert!(names.contains(&"water plants (Day 30)".to_string()));
}

// ============================================================================
// Overlay Registry
// ============================================================================

#[tokio::test]
async fn test_overlay_registry_is_singleton_per_tab() {
    use tabmind::overlay::memory::MemoryDom;

    let h = harness(5).await;
    let dom = Arc::new(MemoryDom::new());

    let first = h.coordinator.register_overlay(9, dom.clone()).await;
    let second = h.coordinator.register_overlay(9, dom.clone()).await;
    assert!(Arc::ptr_eq(&first, &second));

    first.lock().await.create().await.unwrap();
    second.lock().await.create().await.unwrap();
    assert_eq!(dom.mount_count(), 1, "one logical overlay per tab");

    h.coordinator.remove_overlay(9).await;
    assert!(h.coordinator.overlay(9).await.is_none());
}

#[tokio::test]
async fn test_overlay_visibility_restores_after_context_reload() {
    use tabmind::overlay::memory::MemoryDom;

    let h = harness(5).await;
    let dom = Arc::new(MemoryDom::new());
    let overlay = h.coordinator.register_overlay(3, dom.clone()).await;
    overlay.lock().await.create().await.unwrap();

    // Context reload: the registration drops, the old surface dies, and its
    // marker node survives in the page.
    h.coordinator.remove_overlay(3).await;
    let fresh = Arc::new(MemoryDom::new());
    fresh.leave_stale_marker();

    let restored = h.coordinator.register_overlay(3, fresh.clone()).await;

    assert!(restored.lock().await.is_open());
    assert_eq!(fresh.mount_count(), 1, "stale marker cleaned, mounted once");
}

// ============================================================================
// Alerts
// ============================================================================

#[tokio::test]
async fn test_unread_alerts_surface_once_and_are_acknowledged() {
    let h = harness(5).await;
    h.service.alerts.lock().await.push(Alert {
        id: "a1".to_string(),
        text: "headphones dropped to $199".to_string(),
        read: false,
    });

    h.coordinator.surface_unread_alerts().await.unwrap();
    h.coordinator.surface_unread_alerts().await.unwrap();

    let stored = transcript::load(h.store.as_ref()).await.unwrap();
    let surfaced = stored
        .iter()
        .filter(|m| m.text.contains("headphones dropped"))
        .count();
    assert_eq!(surfaced, 1);
    assert_eq!(h.service.read_ids.lock().await.as_slice(), ["a1"]);
}

// ============================================================================
// Panels
// ============================================================================

#[tokio::test]
async fn test_two_panels_converge_through_the_store() {
    let h = harness(5).await;
    h.service
        .set_response(plain_reply("here is your answer"))
        .await;

    let panel_a = Panel::mount(h.coordinator.clone(), h.store.clone())
        .await
        .unwrap();
    let panel_b = Panel::mount(h.coordinator.clone(), h.store.clone())
        .await
        .unwrap();

    panel_a.submit("a question").await.unwrap();
    // Panel B converges via the store mutation notification alone.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let seen = panel_b.transcript().await;
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], Message::user("a question"));
    assert_eq!(seen[1], Message::assistant("here is your answer"));

    panel_a.unmount().await;
    panel_b.unmount().await;
}

#[tokio::test]
async fn test_panel_renders_timeout_as_inline_system_message() {
    let h = harness(1).await;
    h.service.set_query_delay(Duration::from_secs(3)).await;

    let panel = Panel::mount(h.coordinator.clone(), h.store.clone())
        .await
        .unwrap();
    let outcome = panel.submit("slow question").await.unwrap();

    assert!(matches!(outcome, QueryOutcome::TimedOut));
    let local = panel.transcript().await;
    assert_eq!(local.len(), 2);
    assert_eq!(local[0], Message::user("slow question"));
    assert!(matches!(
        local[1].role,
        tabmind::transcript::Role::System
    ));
    assert!(panel.banner().await.is_none(), "timeouts are not banner-worthy");

    panel.unmount().await;
}

#[tokio::test]
async fn test_panel_recovers_after_lagged_store_notifications() {
    // A one-slot notification buffer guarantees the watcher observes a
    // lagged receiver: the transcript and notification events below are
    // pushed out by the scratch-key burst before the watcher runs.
    let h = harness_with_store(5, Arc::new(MemoryStore::with_capacity(1))).await;
    let panel = Panel::mount(h.coordinator.clone(), h.store.clone())
        .await
        .unwrap();

    seed_transcript(&h.store, 2).await;
    h.store
        .set(
            keys::PENDING_NOTIFICATION,
            serde_json::json!({ "text": "drink water", "createdAt": 0 }),
        )
        .await
        .unwrap();
    for i in 0..4 {
        h.store.set("scratch", serde_json::json!(i)).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        panel.transcript().await.len(),
        2,
        "dropped transcript events must trigger a re-read, not a stall"
    );
    assert_eq!(panel.notification().await, Some("drink water".to_string()));

    panel.unmount().await;
}

#[tokio::test]
async fn test_panel_mirrors_notification_and_dismissal_via_store() {
    let h = harness(5).await;
    let panel = Panel::mount(h.coordinator.clone(), h.store.clone())
        .await
        .unwrap();

    h.reminders.on_fire("drink water").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(panel.notification().await, Some("drink water".to_string()));

    h.reminders.dismiss().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(panel.notification().await, None);

    panel.unmount().await;
}
