//! End-to-end flows through the pricing and settlement kernel

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use points_market::{
    amm, BroadcastHub, CoreError, InMemoryLedgerStore, InMemoryLockProvider, InMemoryMarketStore,
    InMemoryPositionStore, LedgerEntry, LedgerReason, LedgerStore, MarketService,
    MarketServiceConfig, MarketStatus, MarketStore, PointsLedger, Position, PositionStore,
    PositionTracker, Side,
};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_test::assert_ok;
use uuid::Uuid;

struct Harness {
    service: MarketService,
    ledger: Arc<PointsLedger>,
    tracker: PositionTracker,
    hub: Arc<BroadcastHub>,
    markets: Arc<InMemoryMarketStore>,
}

fn harness() -> Harness {
    harness_with_ledger_store(Arc::new(InMemoryLedgerStore::new()))
}

fn harness_with_ledger_store(ledger_store: Arc<dyn LedgerStore>) -> Harness {
    points_market::telemetry::init_tracing("warn");

    let markets = Arc::new(InMemoryMarketStore::new());
    let positions = Arc::new(InMemoryPositionStore::new());
    let ledger = Arc::new(PointsLedger::new(ledger_store));
    let hub = Arc::new(BroadcastHub::new(256));

    let service = MarketService::new(
        MarketServiceConfig::default(),
        markets.clone(),
        positions.clone(),
        ledger.clone(),
        Arc::new(InMemoryLockProvider::default()),
        hub.clone(),
    );
    let tracker = PositionTracker::new(positions, markets.clone(), ledger.clone());

    Harness {
        service,
        ledger,
        tracker,
        hub,
        markets,
    }
}

async fn fund(ledger: &PointsLedger, user_id: &str, amount: f64) {
    ledger
        .credit(user_id, amount, LedgerReason::Initial, None)
        .await
        .unwrap();
}

/// Ledger store that refuses appends for configured users, for exercising
/// payout failure isolation.
struct FlakyLedgerStore {
    inner: InMemoryLedgerStore,
    failing_users: Mutex<HashSet<String>>,
}

impl FlakyLedgerStore {
    fn new() -> Self {
        Self {
            inner: InMemoryLedgerStore::new(),
            failing_users: Mutex::new(HashSet::new()),
        }
    }

    async fn fail_user(&self, user_id: &str) {
        self.failing_users.lock().await.insert(user_id.to_string());
    }

    async fn heal_user(&self, user_id: &str) {
        self.failing_users.lock().await.remove(user_id);
    }
}

#[async_trait]
impl LedgerStore for FlakyLedgerStore {
    async fn append_entry(&self, entry: LedgerEntry) -> points_market::Result<()> {
        if self.failing_users.lock().await.contains(&entry.user_id) {
            return Err(CoreError::Storage(format!(
                "simulated append failure for {}",
                entry.user_id
            )));
        }
        self.inner.append_entry(entry).await
    }

    async fn latest_entry(&self, user_id: &str) -> points_market::Result<Option<LedgerEntry>> {
        self.inner.latest_entry(user_id).await
    }

    async fn list_entries(&self, user_id: &str) -> points_market::Result<Vec<LedgerEntry>> {
        self.inner.list_entries(user_id).await
    }
}

/// Position store whose next insert fails, for exercising trade rollback.
struct FailingPositionStore {
    inner: InMemoryPositionStore,
    fail_next_insert: AtomicBool,
}

impl FailingPositionStore {
    fn new() -> Self {
        Self {
            inner: InMemoryPositionStore::new(),
            fail_next_insert: AtomicBool::new(false),
        }
    }

    fn fail_next(&self) {
        self.fail_next_insert.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PositionStore for FailingPositionStore {
    async fn insert(&self, position: Position) -> points_market::Result<()> {
        if self.fail_next_insert.swap(false, Ordering::SeqCst) {
            return Err(CoreError::Storage("simulated insert failure".to_string()));
        }
        self.inner.insert(position).await
    }

    async fn find_by_id(&self, position_id: Uuid) -> points_market::Result<Option<Position>> {
        self.inner.find_by_id(position_id).await
    }

    async fn list_by_market(&self, market_id: Uuid) -> points_market::Result<Vec<Position>> {
        self.inner.list_by_market(market_id).await
    }

    async fn list_by_user(&self, user_id: &str) -> points_market::Result<Vec<Position>> {
        self.inner.list_by_user(user_id).await
    }

    async fn update_shares(
        &self,
        position_id: Uuid,
        shares: f64,
        points_spent: f64,
    ) -> points_market::Result<()> {
        self.inner.update_shares(position_id, shares, points_spent).await
    }
}

#[tokio::test]
async fn full_user_journey() -> anyhow::Result<()> {
    let h = harness();
    fund(&h.ledger, "alice", 500.0).await;
    fund(&h.ledger, "bob", 500.0).await;

    let market = h
        .service
        .create_market("Will the launch succeed?", "creator-1", Some(100.0), None)
        .await?;

    h.service.place_trade(market.id, "alice", Side::Yes, 50.0).await?;
    let bob_receipt = h.service.place_trade(market.id, "bob", Side::No, 80.0).await?;

    // Alice's portfolio marks her YES position to the live price.
    let portfolio = h.tracker.portfolio("alice").await?;
    assert_eq!(portfolio.len(), 1);
    assert!(portfolio[0].unrealized_pnl.is_finite());

    h.service.close_market(market.id).await?;
    let report = h.service.resolve_market(market.id, Side::No).await?;

    assert_eq!(report.outcome, Side::No);
    assert_eq!(report.paid.len(), 1);
    assert_eq!(report.paid[0].user_id, "bob");
    assert!((report.total_paid - bob_receipt.position.shares).abs() < 1e-9);

    let alice_balance = h.ledger.balance("alice").await?;
    let bob_balance = h.ledger.balance("bob").await?;
    assert!((alice_balance - 450.0).abs() < 1e-9);
    assert!((bob_balance - (420.0 + bob_receipt.position.shares)).abs() < 1e-9);

    // Losing side keeps its stake debit as the only market entry.
    let alice_entries = h.ledger.history("alice").await?;
    assert!(alice_entries
        .iter()
        .all(|entry| entry.reason != LedgerReason::Payout));

    Ok(())
}

#[tokio::test]
async fn concurrent_trades_serialize_per_market() -> anyhow::Result<()> {
    let h = harness();
    let service = Arc::new(h.service);

    let users: Vec<String> = (0..10).map(|i| format!("user-{}", i)).collect();
    for user in &users {
        fund(&h.ledger, user, 1_000.0).await;
    }

    let market = service
        .create_market("contended", "creator-1", Some(100.0), None)
        .await?;
    let seed_k = 100.0 * 100.0;

    let mut handles = Vec::new();
    for (i, user) in users.iter().enumerate() {
        let service = Arc::clone(&service);
        let market_id = market.id;
        let user = user.clone();
        let side = if i % 2 == 0 { Side::Yes } else { Side::No };
        handles.push(tokio::spawn(async move {
            service.place_trade(market_id, &user, side, 25.0).await
        }));
    }

    let mut receipts = Vec::new();
    for handle in handles {
        receipts.push(handle.await??);
    }
    assert_eq!(receipts.len(), 10);

    // Serialized application keeps the product invariant through the final
    // reserves, and every sequence number is distinct.
    let last_prices: Vec<f64> = receipts.iter().map(|r| r.price_yes + r.price_no).collect();
    for sum in last_prices {
        assert!((sum - 1.0).abs() < 1e-9);
    }
    let mut sequences: Vec<u64> = receipts.iter().map(|r| r.sequence).collect();
    sequences.sort_unstable();
    sequences.dedup();
    assert_eq!(sequences.len(), 10);

    // Reserves after the contention equal some sequential application of the
    // ten trades, so the product invariant still holds against the seed.
    let settled = h.markets.find_by_id(market.id).await?.unwrap();
    let k = settled.yes_shares * settled.no_shares;
    assert!((k - seed_k).abs() / seed_k < 1e-9);

    let report = service.resolve_market(market.id, Side::Yes).await?;
    let winning_shares: f64 = receipts
        .iter()
        .filter(|r| r.position.side == Side::Yes)
        .map(|r| r.position.shares)
        .sum();
    assert!((report.total_paid - winning_shares).abs() < 1e-9);

    // Each user's balance lines up with their own signed deltas.
    for user in &users {
        let history = h.ledger.history(user).await?;
        let sum: f64 = history.iter().map(|entry| entry.delta).sum();
        let balance = h.ledger.balance(user).await?;
        assert!((balance - sum).abs() < 1e-9);
    }

    Ok(())
}

#[tokio::test]
async fn payout_failures_are_isolated_and_recoverable() -> anyhow::Result<()> {
    let store = Arc::new(FlakyLedgerStore::new());
    let h = harness_with_ledger_store(store.clone());

    fund(&h.ledger, "alice", 100.0).await;
    fund(&h.ledger, "bob", 100.0).await;

    let market = h
        .service
        .create_market("flaky", "creator-1", Some(100.0), None)
        .await?;
    let alice_receipt = h.service.place_trade(market.id, "alice", Side::Yes, 30.0).await?;
    let bob_receipt = h.service.place_trade(market.id, "bob", Side::Yes, 30.0).await?;

    // Bob's ledger starts refusing writes right before resolution.
    store.fail_user("bob").await;
    let report = h.service.resolve_market(market.id, Side::Yes).await?;

    assert_eq!(report.paid.len(), 1);
    assert_eq!(report.paid[0].user_id, "alice");
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].user_id, "bob");
    assert!((report.failed[0].amount - bob_receipt.position.shares).abs() < 1e-9);

    // Alice was paid despite bob's failure.
    let alice_balance = h.ledger.balance("alice").await?;
    assert!((alice_balance - (70.0 + alice_receipt.position.shares)).abs() < 1e-9);

    // Resolution is single-shot; recovery is its own operation.
    assert!(matches!(
        h.service.resolve_market(market.id, Side::Yes).await,
        Err(CoreError::InvalidTransition { .. })
    ));

    store.heal_user("bob").await;
    let recovered = h.service.retry_payout(market.id, "bob").await?;
    assert!((recovered - bob_receipt.position.shares).abs() < 1e-9);

    assert!(matches!(
        h.service.retry_payout(market.id, "bob").await,
        Err(CoreError::AlreadySettled)
    ));

    Ok(())
}

#[tokio::test]
async fn failed_close_credit_restores_the_position() -> anyhow::Result<()> {
    let store = Arc::new(FlakyLedgerStore::new());
    let h = harness_with_ledger_store(store.clone());

    fund(&h.ledger, "alice", 100.0).await;
    fund(&h.ledger, "bob", 300.0).await;

    let market = h
        .service
        .create_market("close under pressure", "creator-1", Some(100.0), None)
        .await?;

    // Bob's heavy NO stake leaves YES cheap; alice buys in below where the
    // price lands, so closing realizes a gain.
    h.service.place_trade(market.id, "bob", Side::No, 200.0).await?;
    let receipt = h.service.place_trade(market.id, "alice", Side::Yes, 10.0).await?;
    let pnl = h.tracker.unrealized_pnl(&receipt.position).await?;
    assert!(pnl > 0.0);

    store.fail_user("alice").await;
    let err = h
        .tracker
        .close_position(receipt.position.id, "alice", receipt.position.shares)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)));

    // The gain was never credited, so the position keeps its full quantity.
    let portfolio = h.tracker.portfolio("alice").await?;
    assert_eq!(portfolio.len(), 1);
    assert!((portfolio[0].position.shares - receipt.position.shares).abs() < 1e-9);
    assert!((h.ledger.balance("alice").await? - 90.0).abs() < 1e-9);

    store.heal_user("alice").await;
    let closed = h
        .tracker
        .close_position(receipt.position.id, "alice", receipt.position.shares)
        .await?;
    assert!(closed.credited > 0.0);

    Ok(())
}

#[tokio::test]
async fn deltas_carry_monotonic_sequences_and_status_changes() -> anyhow::Result<()> {
    let h = harness();
    let mut rx = h.hub.subscribe();
    fund(&h.ledger, "alice", 100.0).await;

    let market = h
        .service
        .create_market("observed", "creator-1", Some(100.0), None)
        .await?;
    h.service.place_trade(market.id, "alice", Side::Yes, 50.0).await?;
    h.service.close_market(market.id).await?;
    h.service.resolve_market(market.id, Side::Yes).await?;

    let created = rx.recv().await?;
    assert_eq!(created.sequence, 1);
    assert_eq!(created.status, MarketStatus::Open);
    assert_eq!(created.yes_shares, 100.0);
    assert!((created.price_yes - 0.5).abs() < 1e-9);

    let traded = rx.recv().await?;
    assert_eq!(traded.sequence, 2);
    assert!((traded.no_shares - 150.0).abs() < 1e-9);
    assert!((traded.price_yes + traded.price_no - 1.0).abs() < 1e-9);

    // Closing is a status-only notification: reserves unchanged.
    let closed = rx.recv().await?;
    assert_eq!(closed.sequence, 3);
    assert_eq!(closed.status, MarketStatus::Closed);
    assert_eq!(closed.yes_shares, traded.yes_shares);
    assert_eq!(closed.no_shares, traded.no_shares);

    let resolved = rx.recv().await?;
    assert_eq!(resolved.sequence, 4);
    assert_eq!(resolved.status, MarketStatus::Resolved);

    Ok(())
}

#[tokio::test]
async fn trades_on_different_markets_do_not_contend() -> anyhow::Result<()> {
    let h = harness();
    let service = Arc::new(h.service);
    fund(&h.ledger, "alice", 1_000.0).await;

    let first = service
        .create_market("first", "creator-1", Some(100.0), None)
        .await?;
    let second = service
        .create_market("second", "creator-1", Some(100.0), None)
        .await?;

    let a = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.place_trade(first.id, "alice", Side::Yes, 10.0).await })
    };
    let b = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.place_trade(second.id, "alice", Side::No, 10.0).await })
    };

    let (a, b) = (a.await??, b.await??);
    // Sequences are scoped per market, so both first trades get sequence 2
    // (creation consumed 1).
    assert_eq!(a.sequence, 2);
    assert_eq!(b.sequence, 2);

    Ok(())
}

#[tokio::test]
async fn failed_persistence_compensates_the_stake() -> anyhow::Result<()> {
    let markets = Arc::new(InMemoryMarketStore::new());
    let positions = Arc::new(FailingPositionStore::new());
    let ledger = Arc::new(PointsLedger::new(Arc::new(InMemoryLedgerStore::new())));
    let service = MarketService::new(
        MarketServiceConfig::default(),
        markets.clone(),
        positions.clone(),
        ledger.clone(),
        Arc::new(InMemoryLockProvider::default()),
        Arc::new(BroadcastHub::new(16)),
    );

    fund(&ledger, "alice", 100.0).await;
    let market = service
        .create_market("compensated", "creator-1", Some(100.0), None)
        .await?;

    positions.fail_next();
    let err = service
        .place_trade(market.id, "alice", Side::Yes, 50.0)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)));

    // Stake restored through a compensating entry, reserves rolled back.
    assert!((ledger.balance("alice").await? - 100.0).abs() < 1e-9);
    let settled = markets.find_by_id(market.id).await?.unwrap();
    assert_eq!(settled.yes_shares, 100.0);
    assert_eq!(settled.no_shares, 100.0);

    // The correction is an appended entry, never an edit: grant, debit,
    // compensating credit.
    assert_eq!(ledger.history("alice").await?.len(), 3);

    // The market is untouched, so the next trade goes through.
    let receipt = service
        .place_trade(market.id, "alice", Side::Yes, 50.0)
        .await?;
    assert!(receipt.position.shares > 0.0);

    Ok(())
}

#[tokio::test]
async fn assembled_core_runs_a_round_trip() -> anyhow::Result<()> {
    let core = points_market::PointsMarket::in_memory(&points_market::CoreConfig::default());
    let mut rx = core.broadcast_hub.subscribe();

    fund(&core.ledger, "alice", 200.0).await;
    let market = core
        .market_service
        .create_market("assembled", "creator-1", None, None)
        .await?;
    let receipt = core
        .market_service
        .place_trade(market.id, "alice", Side::Yes, 50.0)
        .await?;

    let portfolio = core.position_tracker.portfolio("alice").await?;
    assert_eq!(portfolio.len(), 1);
    assert_eq!(portfolio[0].position.id, receipt.position.id);

    core.market_service
        .resolve_market(market.id, Side::Yes)
        .await?;
    assert!((core.ledger.balance("alice").await? - (150.0 + receipt.position.shares)).abs() < 1e-9);

    // Creation, trade, resolution deltas all arrived in order.
    for expected in 1..=3u64 {
        assert_eq!(rx.recv().await?.sequence, expected);
    }

    Ok(())
}

#[tokio::test]
async fn quoted_price_matches_executed_reserves() -> anyhow::Result<()> {
    let h = harness();
    fund(&h.ledger, "alice", 100.0).await;

    let market = h
        .service
        .create_market("quoted", "creator-1", Some(100.0), None)
        .await?;

    let quote = assert_ok!(amm::quote(100.0, 100.0, Side::Yes, 50.0));
    let receipt = h.service.place_trade(market.id, "alice", Side::Yes, 50.0).await?;

    assert!((receipt.position.shares - quote.shares_out).abs() < 1e-12);
    assert!((receipt.price_yes - amm::price_yes(quote.new_yes, quote.new_no)).abs() < 1e-12);

    Ok(())
}
