//! End-to-end lifecycle tests
//!
//! Coordinator, reconciler and HTTP router wired against the in-memory
//! store, a manual clock and recording collaborators.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tower::ServiceExt;

use super::clock::ManualClock;
use super::coordinator::{PaymentResult, PurchaseCoordinator};
use super::effects::EffectDispatcher;
use super::effects::mock::{RecordingJanitor, RecordingSettlement};
use super::error::PurchaseError;
use super::machine::{LifecycleWindows, PurchaseEvent, SettlementOutcome};
use super::reconciler::{ReconciliationWorker, WorkerConfig};
use super::state::PurchaseStatus;
use super::store::{BuyerStats, MemoryPurchaseStore, Page, PurchaseStore};
use super::types::{Actor, ProductId, Purchase, PurchaseId, UserId};
use crate::gateway;
use crate::gateway::state::AppState;

const BUYER: UserId = 7001;
const ADMIN: UserId = 1;
const ASSET: &str = "products/77/brushes.abr";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).unwrap()
}

struct Env {
    coordinator: Arc<PurchaseCoordinator>,
    store: Arc<dyn PurchaseStore>,
    clock: Arc<ManualClock>,
    settlement: Arc<RecordingSettlement>,
    janitor: Arc<RecordingJanitor>,
}

impl Env {
    fn new() -> Self {
        Self::with_store(Arc::new(MemoryPurchaseStore::new()))
    }

    fn with_store(store: Arc<dyn PurchaseStore>) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let settlement = Arc::new(RecordingSettlement::new());
        let janitor = Arc::new(RecordingJanitor::new());
        let effects = EffectDispatcher::new(
            settlement.clone(),
            janitor.clone(),
            StdDuration::from_secs(1),
        );
        let coordinator = Arc::new(PurchaseCoordinator::with_clock(
            store.clone(),
            effects,
            clock.clone(),
            LifecycleWindows::default(),
        ));
        Self {
            coordinator,
            store,
            clock,
            settlement,
            janitor,
        }
    }

    fn worker(&self) -> ReconciliationWorker {
        ReconciliationWorker::with_defaults(self.coordinator.clone())
    }

    async fn paid(&self) -> Purchase {
        let order = self
            .coordinator
            .open_order(
                Actor::user(BUYER),
                77,
                Decimal::new(2500, 2),
                Some(ASSET.to_string()),
            )
            .await
            .unwrap();
        self.coordinator
            .record_payment(Actor::system(), order.id, PaymentResult::Succeeded)
            .await
            .unwrap()
            .purchase
    }

    async fn reload(&self, id: PurchaseId) -> Purchase {
        self.store.get(id).await.unwrap().unwrap()
    }

    async fn dispute(&self, id: PurchaseId) -> Result<Purchase, PurchaseError> {
        self.coordinator
            .open_dispute(Actor::user(BUYER), id, "Files do not match the preview images")
            .await
            .map(|o| o.purchase)
    }
}

// ============================================================================
// Reconciliation sweeps
// ============================================================================

#[tokio::test]
async fn test_sweep_is_idempotent() {
    let env = Env::new();
    let a = env.paid().await;
    let b = env.paid().await;
    env.dispute(b.id).await.unwrap();

    env.clock.advance(Duration::days(8));
    let worker = env.worker();

    let first = worker.run_cycle().await.unwrap();
    assert_eq!(first.auto_confirmed, 1);
    assert_eq!(first.escalated, 1);

    let second = worker.run_cycle().await.unwrap();
    assert_eq!(second.transitions(), 0);

    assert_eq!(env.reload(a.id).await.status(), PurchaseStatus::Confirmed);
    assert_eq!(
        env.reload(b.id).await.status(),
        PurchaseStatus::DisputeProcessing
    );
    assert_eq!(env.settlement.release_count(), 1);
    assert_eq!(env.janitor.delete_count(), 1);
}

fn small_batches(env: &Env) -> ReconciliationWorker {
    ReconciliationWorker::new(
        env.coordinator.clone(),
        WorkerConfig {
            interval: StdDuration::from_secs(3600),
            batch_size: 2,
            concurrency: 1,
        },
    )
}

#[tokio::test]
async fn test_sweep_drains_backlog_larger_than_batch() {
    let env = Env::new();
    let mut confirmable = Vec::new();
    for _ in 0..5 {
        confirmable.push(env.paid().await);
    }
    let mut disputed = Vec::new();
    for _ in 0..3 {
        let p = env.paid().await;
        env.dispute(p.id).await.unwrap();
        disputed.push(p);
    }

    env.clock.advance(Duration::days(8));
    let worker = small_batches(&env);

    let first = worker.run_cycle().await.unwrap();
    assert_eq!(first.auto_confirmed, 5);
    assert_eq!(first.escalated, 3);
    assert_eq!(first.failed, 0);

    let second = worker.run_cycle().await.unwrap();
    assert_eq!(second.transitions(), 0);

    for p in &confirmable {
        assert_eq!(env.reload(p.id).await.status(), PurchaseStatus::Confirmed);
    }
    for p in &disputed {
        assert_eq!(
            env.reload(p.id).await.status(),
            PurchaseStatus::DisputeProcessing
        );
    }
    assert_eq!(env.settlement.release_count(), 5);
}

#[tokio::test]
async fn test_sweep_with_exact_multiple_of_batch_size() {
    let env = Env::new();
    for _ in 0..4 {
        env.paid().await;
    }
    env.clock.advance(Duration::days(7));

    let summary = small_batches(&env).run_cycle().await.unwrap();
    assert_eq!(summary.auto_confirmed, 4);
    let left = env
        .store
        .find_due_auto_confirm(env.coordinator.now(), 10)
        .await
        .unwrap();
    assert!(left.is_empty());
}

#[tokio::test]
async fn test_sweep_stops_when_batch_makes_no_progress() {
    let store = Arc::new(RacingStore::new());
    let env = Env::with_store(store.clone());
    let mut purchases = Vec::new();
    for _ in 0..3 {
        purchases.push(env.paid().await);
        // distinct deadlines fix the batch order
        env.clock.advance(Duration::minutes(1));
    }
    store.fail_reads_of(&[purchases[0].id, purchases[1].id]);
    env.clock.advance(Duration::days(7));
    let worker = small_batches(&env);

    let stuck = worker.run_cycle().await.unwrap();
    assert_eq!(stuck.failed, 2);
    assert_eq!(stuck.transitions(), 0);
    assert_eq!(
        env.store.get(purchases[2].id).await.unwrap().unwrap().status(),
        PurchaseStatus::Completed
    );

    store.heal();
    let recovered = worker.run_cycle().await.unwrap();
    assert_eq!(recovered.auto_confirmed, 3);
    assert_eq!(recovered.failed, 0);
}

#[tokio::test]
async fn test_auto_confirm_deadline_boundary() {
    let env = Env::new();
    let purchase = env.paid().await;
    let deadline = t0() + Duration::days(7);
    let worker = env.worker();

    let summary = worker
        .run_cycle_at(deadline - Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(summary.auto_confirmed, 0);
    assert_eq!(env.reload(purchase.id).await.status(), PurchaseStatus::Completed);

    let summary = worker
        .run_cycle_at(deadline + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(summary.auto_confirmed, 1);

    let confirmed = env.reload(purchase.id).await;
    assert_eq!(confirmed.status(), PurchaseStatus::Confirmed);
    assert_eq!(confirmed.lifecycle.auto_confirm_at(), None);
    assert_eq!(env.settlement.calls(), vec![(purchase.id, SettlementOutcome::Confirm)]);
    assert_eq!(env.janitor.deleted(), vec![ASSET.to_string()]);
}

#[tokio::test]
async fn test_not_yet_due_purchase_is_left_alone() {
    let env = Env::new();
    let purchase = env.paid().await;

    let summary = env
        .worker()
        .run_cycle_at(t0() + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(summary, Default::default());
    assert_eq!(env.reload(purchase.id).await.status(), PurchaseStatus::Completed);
    assert_eq!(env.settlement.release_count(), 0);
}

#[tokio::test]
async fn test_escalation_boundary_counts_from_dispute() {
    let env = Env::new();
    let purchase = env.paid().await;

    env.clock.advance(Duration::days(2));
    let disputed = env.dispute(purchase.id).await.unwrap();
    let escalate_at = t0() + Duration::days(5);
    assert_eq!(
        disputed.lifecycle.dispute().unwrap().platform_intervention_at,
        escalate_at
    );

    let worker = env.worker();
    let summary = worker
        .run_cycle_at(escalate_at - Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(summary.escalated, 0);
    assert_eq!(
        env.reload(purchase.id).await.status(),
        PurchaseStatus::DisputeRequested
    );

    let summary = worker
        .run_cycle_at(escalate_at + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(summary.escalated, 1);

    let escalated = env.reload(purchase.id).await;
    assert_eq!(escalated.status(), PurchaseStatus::DisputeProcessing);
    // the dispute record travels with the escalation
    assert_eq!(escalated.lifecycle.dispute(), disputed.lifecycle.dispute());
    assert_eq!(env.settlement.release_count(), 0);
}

#[tokio::test]
async fn test_disputed_purchase_never_auto_confirms() {
    let env = Env::new();
    let purchase = env.paid().await;
    env.dispute(purchase.id).await.unwrap();

    // well past the original auto-confirm deadline
    let summary = env
        .worker()
        .run_cycle_at(t0() + Duration::days(30))
        .await
        .unwrap();
    assert_eq!(summary.auto_confirmed, 0);
    assert_eq!(summary.escalated, 1);
    assert_eq!(env.settlement.release_count(), 0);
    assert_eq!(env.janitor.delete_count(), 0);
}

#[tokio::test]
async fn test_stale_candidate_skipped_on_reread() {
    let env = Env::new();
    let purchase = env.paid().await;
    let sweep_at = t0() + Duration::days(8);

    let stale = env.coordinator.advance_due(purchase.id, PurchaseEvent::AutoConfirmDue, t0()).await;
    assert!(matches!(stale, Err(PurchaseError::InvalidTransition(_))));

    // the admin confirms first; the sweep's re-read no longer satisfies the guard
    env.coordinator
        .force_confirm(Actor::admin(ADMIN), purchase.id)
        .await
        .unwrap();
    let err = env
        .coordinator
        .advance_due(purchase.id, PurchaseEvent::AutoConfirmDue, sweep_at)
        .await
        .unwrap_err();
    assert!(matches!(err, PurchaseError::InvalidTransition(_)));
    assert_eq!(env.settlement.release_count(), 1);
}

// ============================================================================
// Disputes and resolution
// ============================================================================

#[tokio::test]
async fn test_second_dispute_rejected_and_record_unchanged() {
    let env = Env::new();
    let purchase = env.paid().await;
    env.dispute(purchase.id).await.unwrap();
    let before = env.reload(purchase.id).await;

    env.clock.advance(Duration::hours(2));
    let err = env
        .coordinator
        .open_dispute(
            Actor::user(BUYER),
            purchase.id,
            "Second complaint about the same files",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PurchaseError::InvalidTransition(_)));
    assert_eq!(env.reload(purchase.id).await, before);
}

#[tokio::test]
async fn test_dispute_after_window_rejected() {
    let env = Env::new();
    let purchase = env.paid().await;

    env.clock.advance(Duration::days(7));
    let err = env.dispute(purchase.id).await.unwrap_err();
    match err {
        PurchaseError::InvalidTransition(rejected) => assert!(rejected.guard.is_some()),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(env.reload(purchase.id).await.status(), PurchaseStatus::Completed);
}

#[tokio::test]
async fn test_resolution_applies_exactly_once() {
    let env = Env::new();
    let refunded = env.paid().await;
    let kept = env.paid().await;
    env.dispute(refunded.id).await.unwrap();
    env.dispute(kept.id).await.unwrap();

    let admin = Actor::admin(ADMIN);
    env.coordinator
        .resolve(admin, refunded.id, "Refund approved after review", true)
        .await
        .unwrap();
    env.coordinator
        .resolve(admin, kept.id, "Files verified as described", false)
        .await
        .unwrap();

    for id in [refunded.id, kept.id] {
        let err = env
            .coordinator
            .resolve(admin, id, "Trying to resolve a second time", true)
            .await
            .unwrap_err();
        assert!(matches!(err, PurchaseError::InvalidTransition(_)));
    }

    assert_eq!(env.reload(refunded.id).await.status(), PurchaseStatus::Refunded);
    assert_eq!(env.reload(kept.id).await.status(), PurchaseStatus::Confirmed);
    assert_eq!(env.settlement.refund_count(), 1);
    assert_eq!(env.settlement.release_count(), 0);
    assert_eq!(env.janitor.delete_count(), 1);
}

#[tokio::test]
async fn test_full_dispute_scenario() {
    let env = Env::new();
    let purchase = env.paid().await;
    let worker = env.worker();

    // day 2: buyer disputes
    env.clock.set(t0() + Duration::days(2));
    env.dispute(purchase.id).await.unwrap();

    // day 5: nobody acted, sweep escalates
    env.clock.set(t0() + Duration::days(5) + Duration::minutes(1));
    let summary = worker.run_cycle().await.unwrap();
    assert_eq!(summary.escalated, 1);

    // day 6: admin refunds
    env.clock.set(t0() + Duration::days(6));
    let outcome = env
        .coordinator
        .resolve(
            Actor::admin(ADMIN),
            purchase.id,
            "Seller did not respond; refund issued",
            true,
        )
        .await
        .unwrap();
    assert_eq!(outcome.from, PurchaseStatus::DisputeProcessing);
    assert!(outcome.side_effect_failures.is_empty());

    // day 9: later sweeps change nothing
    env.clock.set(t0() + Duration::days(9));
    assert_eq!(worker.run_cycle().await.unwrap().transitions(), 0);

    let finished = env.reload(purchase.id).await;
    assert_eq!(finished.status(), PurchaseStatus::Refunded);
    let resolution = finished.lifecycle.resolution().unwrap();
    assert_eq!(resolution.resolved_at, t0() + Duration::days(6));
    assert_eq!(env.settlement.calls(), vec![(purchase.id, SettlementOutcome::Refund)]);
    assert_eq!(env.janitor.delete_count(), 0);
}

#[tokio::test]
async fn test_refund_delivered_when_caller_gives_up() {
    let env = Env::new();
    let purchase = env.paid().await;
    env.dispute(purchase.id).await.unwrap();
    env.settlement.set_delay(StdDuration::from_millis(100));

    // e.g. the HTTP client disconnects while the refund is in flight
    let call = env.coordinator.resolve(
        Actor::admin(ADMIN),
        purchase.id,
        "Refund approved after review",
        true,
    );
    assert!(
        tokio::time::timeout(StdDuration::from_millis(20), call)
            .await
            .is_err()
    );
    assert_eq!(env.reload(purchase.id).await.status(), PurchaseStatus::Refunded);

    tokio::time::sleep(StdDuration::from_millis(300)).await;
    assert_eq!(env.settlement.refund_count(), 1);
    assert_eq!(env.settlement.calls(), vec![(purchase.id, SettlementOutcome::Refund)]);
}

// ============================================================================
// Concurrency
// ============================================================================

/// Delegates to a memory store, but lets a competing writer land first on
/// the next compare-and-swap. Reads of ids marked unreadable fail.
struct RacingStore {
    inner: MemoryPurchaseStore,
    interloper: Mutex<Option<(PurchaseStatus, Purchase)>>,
    unreadable: Mutex<HashSet<PurchaseId>>,
}

impl RacingStore {
    fn new() -> Self {
        Self {
            inner: MemoryPurchaseStore::new(),
            interloper: Mutex::new(None),
            unreadable: Mutex::new(HashSet::new()),
        }
    }

    fn race_next_write(&self, expected: PurchaseStatus, competing: Purchase) {
        *self.interloper.lock().unwrap() = Some((expected, competing));
    }

    fn fail_reads_of(&self, ids: &[PurchaseId]) {
        self.unreadable.lock().unwrap().extend(ids.iter().copied());
    }

    fn heal(&self) {
        self.unreadable.lock().unwrap().clear();
    }
}

#[async_trait]
impl PurchaseStore for RacingStore {
    async fn insert(&self, purchase: &Purchase) -> Result<(), PurchaseError> {
        self.inner.insert(purchase).await
    }

    async fn get(&self, id: PurchaseId) -> Result<Option<Purchase>, PurchaseError> {
        if self.unreadable.lock().unwrap().contains(&id) {
            return Err(PurchaseError::Storage(format!("row {} unreadable", id)));
        }
        self.inner.get(id).await
    }

    async fn compare_and_swap(
        &self,
        expected: PurchaseStatus,
        next: &Purchase,
    ) -> Result<bool, PurchaseError> {
        let competing = self.interloper.lock().unwrap().take();
        if let Some((their_expected, theirs)) = competing {
            assert!(self.inner.compare_and_swap(their_expected, &theirs).await?);
        }
        self.inner.compare_and_swap(expected, next).await
    }

    async fn find_due_auto_confirm(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Purchase>, PurchaseError> {
        self.inner.find_due_auto_confirm(now, limit).await
    }

    async fn find_due_escalation(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Purchase>, PurchaseError> {
        self.inner.find_due_escalation(now, limit).await
    }

    async fn list_pending_confirmations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Purchase>, PurchaseError> {
        self.inner.list_pending_confirmations(now).await
    }

    async fn list_pending_interventions(&self) -> Result<Vec<Purchase>, PurchaseError> {
        self.inner.list_pending_interventions().await
    }

    async fn list_disputes(&self, page: Page) -> Result<(Vec<Purchase>, u64), PurchaseError> {
        self.inner.list_disputes(page).await
    }

    async fn list_for_buyer(
        &self,
        buyer_id: UserId,
        page: Page,
    ) -> Result<(Vec<Purchase>, u64), PurchaseError> {
        self.inner.list_for_buyer(buyer_id, page).await
    }

    async fn record_download(&self, id: PurchaseId) -> Result<Option<Purchase>, PurchaseError> {
        self.inner.record_download(id).await
    }

    async fn buyer_stats(&self, buyer_id: UserId) -> Result<BuyerStats, PurchaseError> {
        self.inner.buyer_stats(buyer_id).await
    }

    async fn find_paid(
        &self,
        buyer_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<Purchase>, PurchaseError> {
        self.inner.find_paid(buyer_id, product_id).await
    }
}

#[tokio::test]
async fn test_sweep_loses_race_to_dispute() {
    let store = Arc::new(RacingStore::new());
    let env = Env::with_store(store.clone());
    let purchase = env.paid().await;

    // buyer's dispute lands between the sweep's re-read and its write
    let mut disputed = purchase.clone();
    disputed.lifecycle = super::types::Lifecycle::DisputeRequested {
        dispute: super::types::Dispute {
            reason: "Opened while the sweep was running".to_string(),
            requested_at: t0() + Duration::days(7),
            platform_intervention_at: t0() + Duration::days(10),
        },
    };
    store.race_next_write(PurchaseStatus::Completed, disputed);

    let summary = env
        .worker()
        .run_cycle_at(t0() + Duration::days(7) + Duration::seconds(5))
        .await
        .unwrap();
    assert_eq!(summary.auto_confirmed, 0);
    assert_eq!(summary.lost_races, 1);

    assert_eq!(
        env.reload(purchase.id).await.status(),
        PurchaseStatus::DisputeRequested
    );
    assert_eq!(env.settlement.release_count(), 0);
    assert_eq!(env.janitor.delete_count(), 0);
}

#[tokio::test]
async fn test_concurrent_resolutions_settle_once() {
    let env = Env::new();
    let purchase = env.paid().await;
    env.dispute(purchase.id).await.unwrap();

    let mut handles = Vec::new();
    for refund in [true, false, true, false] {
        let coordinator = env.coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator
                .resolve(
                    Actor::admin(ADMIN),
                    purchase.id,
                    "Racing admin resolution",
                    refund,
                )
                .await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(PurchaseError::InvalidTransition(_) | PurchaseError::ConcurrentModification(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(accepted, 1);
    let settled = env.settlement.refund_count() + env.janitor.delete_count();
    assert_eq!(settled, 1);
}

// ============================================================================
// Worker loop
// ============================================================================

#[tokio::test]
async fn test_worker_runs_immediately_and_stops_on_shutdown() {
    let env = Env::new();
    let purchase = env.paid().await;
    env.clock.advance(Duration::days(8));

    let worker = ReconciliationWorker::new(
        env.coordinator.clone(),
        WorkerConfig {
            interval: StdDuration::from_secs(3600),
            batch_size: 10,
            concurrency: 2,
        },
    );
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(rx).await });

    let mut confirmed = false;
    for _ in 0..200 {
        if env.reload(purchase.id).await.status() == PurchaseStatus::Confirmed {
            confirmed = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    assert!(confirmed, "first sweep should run without waiting an interval");

    tx.send(true).unwrap();
    tokio::time::timeout(StdDuration::from_secs(2), handle)
        .await
        .expect("worker should stop on shutdown")
        .unwrap();
}

// ============================================================================
// HTTP surface
// ============================================================================

fn app(env: &Env) -> axum::Router {
    gateway::router(Arc::new(AppState::new(env.coordinator.clone(), None)))
}

fn request(
    method: &str,
    uri: &str,
    actor: Option<(UserId, &str)>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((user_id, role)) = actor {
        builder = builder
            .header("x-user-id", user_id.to_string())
            .header("x-user-role", role);
    }
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_http_health_is_public() {
    let env = Env::new();
    let app = app(&env);
    for path in ["/api/v1/health", "/health"] {
        let (status, body) = send(&app, request("GET", path, None, None)).await;
        assert_eq!(status, StatusCode::OK, "{path}");
        assert_eq!(body["code"], 0);
        assert_eq!(body["data"]["store"], "memory");
    }
}

#[tokio::test]
async fn test_http_requires_identity() {
    let env = Env::new();
    let (status, body) = send(&app(&env), request("GET", "/api/v1/purchases", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 2001);
}

#[tokio::test]
async fn test_http_order_to_dispute_flow() {
    let env = Env::new();
    let app = app(&env);
    let buyer = Some((BUYER, "user"));

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/v1/purchases",
            buyer,
            Some(serde_json::json!({"product_id": 77, "price": "25.00", "asset_ref": ASSET})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "pending");
    let id = body["data"]["purchase_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/v1/internal/payments",
            Some((0, "system")),
            Some(serde_json::json!({"purchase_id": id, "succeeded": true})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["purchase"]["status"], "completed");
    assert_eq!(body["data"]["purchase"]["days_until_auto_confirm"], 7);
    assert_eq!(body["data"]["purchase"]["can_request_dispute"], true);

    let dispute_uri = format!("/api/v1/purchases/{}/dispute", id);
    let (status, body) = send(
        &app,
        request("POST", &dispute_uri, buyer, Some(serde_json::json!({"reason": "short"}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1002);

    let (status, body) = send(
        &app,
        request(
            "POST",
            &dispute_uri,
            Some((BUYER + 1, "user")),
            Some(serde_json::json!({"reason": "Not my purchase but complaining anyway"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 4001);

    let (status, body) = send(
        &app,
        request(
            "POST",
            &dispute_uri,
            buyer,
            Some(serde_json::json!({"reason": "Archive is corrupted after download"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["from"], "completed");
    assert_eq!(body["data"]["purchase"]["status"], "dispute_requested");
    assert!(body["data"]["purchase"]["auto_confirm_at"].is_null());

    let (status, body) = send(
        &app,
        request(
            "POST",
            &dispute_uri,
            buyer,
            Some(serde_json::json!({"reason": "Archive is corrupted after download"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 4091);
}

#[tokio::test]
async fn test_http_admin_routes_require_admin() {
    let env = Env::new();
    let purchase = env.paid().await;
    env.dispute(purchase.id).await.unwrap();
    let app = app(&env);

    let (status, _) = send(
        &app,
        request("GET", "/api/v1/admin/disputes", Some((BUYER, "user")), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &app,
        request("GET", "/api/v1/admin/disputes", Some((ADMIN, "admin")), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["purchase_id"], purchase.id.to_string());

    let uri = format!("/api/v1/admin/purchases/{}/resolve", purchase.id);
    let (status, body) = send(
        &app,
        request(
            "POST",
            &uri,
            Some((ADMIN, "admin")),
            Some(serde_json::json!({"resolution": "Refund approved after review", "refund": true})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["purchase"]["status"], "refunded");
    assert_eq!(env.settlement.refund_count(), 1);
}

#[tokio::test]
async fn test_http_downloads_stats_and_ownership() {
    let env = Env::new();
    let purchase = env.paid().await;
    let refunded = env.paid().await;
    env.dispute(refunded.id).await.unwrap();
    env.coordinator
        .resolve(
            Actor::admin(ADMIN),
            refunded.id,
            "Refund approved after review",
            true,
        )
        .await
        .unwrap();
    let app = app(&env);
    let buyer = Some((BUYER, "user"));

    let download_uri = format!("/api/v1/purchases/{}/download", purchase.id);
    for expected in 1..=purchase.max_downloads {
        let (status, body) = send(&app, request("POST", &download_uri, buyer, None)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["download_count"], expected);
    }
    let (status, body) = send(&app, request("POST", &download_uri, buyer, None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 4093);
    assert_eq!(
        env.reload(purchase.id).await.download_count,
        purchase.max_downloads
    );

    let refunded_uri = format!("/api/v1/purchases/{}/download", refunded.id);
    let (status, _) = send(&app, request("POST", &refunded_uri, buyer, None)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app, request("GET", "/api/v1/purchases/stats", buyer, None)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["total_purchases"], 2);
    assert_eq!(body["data"]["paid_purchases"], 1);
    assert_eq!(body["data"]["total_spent"], "25.00");

    let (status, body) = send(
        &app,
        request("GET", "/api/v1/purchases/products/77/status", buyer, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["purchased"], true);
    assert_eq!(body["data"]["purchase_id"], purchase.id.to_string());
    assert_eq!(body["data"]["status"], "completed");

    let (_, body) = send(
        &app,
        request(
            "GET",
            "/api/v1/purchases/products/77/status",
            Some((BUYER + 1, "user")),
            None,
        ),
    )
    .await;
    assert_eq!(body["data"]["purchased"], false);
    assert!(body["data"]["purchase_id"].is_null());

    let (status, body) = send(
        &app,
        request("GET", "/api/v1/purchases/products/abc/status", buyer, None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1001);
}
