//! Market lifecycle, trade execution, and settlement
//!
//! State machine: `Open -> Closed -> Resolved`, with `Open -> Resolved` also
//! allowed. Every mutating operation takes the per-market lock first; the
//! handle is an RAII guard, so the lock is released on every exit path. A
//! trade either fully applies its reserve + position + ledger changes or
//! compensates the ledger so nothing partial survives.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    amm,
    broadcast::DeltaBroadcaster,
    error::{CoreError, Result},
    ledger::PointsLedger,
    lock::LockProvider,
    store::{MarketStore, PositionStore},
    types::{
        LedgerReason, LedgerRef, Market, MarketDelta, MarketStatus, PayoutRecord, Position,
        ResolutionReport, Side, TradeReceipt,
    },
};

#[derive(Debug, Clone)]
pub struct MarketServiceConfig {
    /// Reserve seeded on each side when a market is created without an
    /// explicit seed
    pub default_seed_liquidity: f64,
}

impl Default for MarketServiceConfig {
    fn default() -> Self {
        Self {
            default_seed_liquidity: 100.0,
        }
    }
}

pub struct MarketService {
    config: MarketServiceConfig,
    markets: Arc<dyn MarketStore>,
    positions: Arc<dyn PositionStore>,
    ledger: Arc<PointsLedger>,
    locks: Arc<dyn LockProvider>,
    broadcaster: Arc<dyn DeltaBroadcaster>,
    sequences: DashMap<Uuid, Arc<AtomicU64>>,
}

impl MarketService {
    pub fn new(
        config: MarketServiceConfig,
        markets: Arc<dyn MarketStore>,
        positions: Arc<dyn PositionStore>,
        ledger: Arc<PointsLedger>,
        locks: Arc<dyn LockProvider>,
        broadcaster: Arc<dyn DeltaBroadcaster>,
    ) -> Self {
        Self {
            config,
            markets,
            positions,
            ledger,
            locks,
            broadcaster,
            sequences: DashMap::new(),
        }
    }

    /// Create a market seeded with equal reserves on both sides
    pub async fn create_market(
        &self,
        title: impl Into<String>,
        creator_id: impl Into<String>,
        seed_liquidity: Option<f64>,
        close_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<Market> {
        let seed = seed_liquidity.unwrap_or(self.config.default_seed_liquidity);
        if !seed.is_finite() || seed <= 0.0 {
            return Err(CoreError::InvalidSeed);
        }

        let market = Market::new(title, creator_id, seed, close_at);
        self.markets.insert(market.clone()).await?;

        info!(
            market_id = %market.id,
            title = %market.title,
            seed = seed,
            "market created"
        );
        self.publish_delta(&market);

        Ok(market)
    }

    /// Fill a market order completely at the instantaneous curve price.
    ///
    /// Requires the market to be open and unexpired and the user's balance to
    /// cover the stake. All failures leave market, position, and ledger state
    /// untouched.
    pub async fn place_trade(
        &self,
        market_id: Uuid,
        user_id: &str,
        side: Side,
        points: f64,
    ) -> Result<TradeReceipt> {
        let _lock = self.locks.acquire(&market_id.to_string()).await?;

        let market = self.require_market(market_id).await?;
        if market.status != MarketStatus::Open {
            return Err(CoreError::MarketNotOpen);
        }
        if let Some(close_at) = market.close_at {
            if market.is_expired(Utc::now()) {
                return Err(CoreError::MarketExpired { close_at });
            }
        }

        let quote = amm::quote(market.yes_shares, market.no_shares, side, points)?;

        // The debit enforces balance sufficiency and is the first mutation.
        let new_balance = self
            .ledger
            .debit(
                user_id,
                points,
                LedgerReason::Bet,
                Some(LedgerRef::market(market_id)),
            )
            .await?;

        let position = Position::new(user_id, market_id, side, quote.shares_out, points);
        if let Err(err) = self.persist_trade(market_id, &quote, &position).await {
            // Roll the reserves back and compensate the debit so the failed
            // trade leaves no trace.
            error!(
                market_id = %market_id,
                user_id = %user_id,
                error = %err,
                "trade persistence failed, rolling back"
            );
            if let Err(restore_err) = self
                .markets
                .update_reserves(market_id, market.yes_shares, market.no_shares)
                .await
            {
                error!(
                    market_id = %market_id,
                    error = %restore_err,
                    "reserve rollback failed"
                );
            }
            if let Err(credit_err) = self
                .ledger
                .credit(
                    user_id,
                    points,
                    LedgerReason::Bet,
                    Some(LedgerRef::market(market_id)),
                )
                .await
            {
                error!(
                    market_id = %market_id,
                    user_id = %user_id,
                    error = %credit_err,
                    "compensating credit failed, ledger needs manual correction"
                );
            }
            return Err(err);
        }

        let mut updated = market;
        updated.yes_shares = quote.new_yes;
        updated.no_shares = quote.new_no;
        let sequence = self.publish_delta(&updated);

        info!(
            market_id = %market_id,
            user_id = %user_id,
            side = %side,
            points = points,
            shares_out = quote.shares_out,
            "trade executed"
        );

        Ok(TradeReceipt {
            position,
            price_yes: amm::price_yes(quote.new_yes, quote.new_no),
            price_no: amm::price_no(quote.new_yes, quote.new_no),
            new_balance,
            sequence,
        })
    }

    /// Halt trading without resolving. Emits a status-only delta with the
    /// reserves unchanged.
    pub async fn close_market(&self, market_id: Uuid) -> Result<Market> {
        let _lock = self.locks.acquire(&market_id.to_string()).await?;

        let market = self.require_market(market_id).await?;
        if market.status != MarketStatus::Open {
            return Err(CoreError::InvalidTransition {
                from: market.status,
                to: MarketStatus::Closed,
            });
        }

        self.markets
            .update_status(market_id, MarketStatus::Closed, None)
            .await?;

        let mut updated = market;
        updated.status = MarketStatus::Closed;
        self.publish_delta(&updated);

        info!(market_id = %market_id, "market closed");

        Ok(updated)
    }

    /// Fix the outcome and pay winners one point per winning share.
    ///
    /// Payouts aggregate per user before crediting, so each user gets one
    /// payout entry per market no matter how many winning positions they
    /// hold. Credit failures are isolated: they are logged, reported, and do
    /// not block the remaining users. Recovery for failed credits goes
    /// through `retry_payout`, never a second resolution.
    pub async fn resolve_market(&self, market_id: Uuid, outcome: Side) -> Result<ResolutionReport> {
        let _lock = self.locks.acquire(&market_id.to_string()).await?;

        let market = self.require_market(market_id).await?;
        if market.status == MarketStatus::Resolved {
            return Err(CoreError::InvalidTransition {
                from: MarketStatus::Resolved,
                to: MarketStatus::Resolved,
            });
        }

        self.markets
            .update_status(market_id, MarketStatus::Resolved, Some(outcome))
            .await?;

        let positions = self.positions.list_by_market(market_id).await?;
        let mut winnings: BTreeMap<String, f64> = BTreeMap::new();
        for position in &positions {
            if position.side == outcome && position.shares > 0.0 {
                *winnings.entry(position.user_id.clone()).or_insert(0.0) += position.shares;
            }
        }

        let mut paid = Vec::new();
        let mut failed = Vec::new();
        let mut total_paid = 0.0;
        for (user_id, amount) in winnings {
            match self
                .ledger
                .credit(
                    &user_id,
                    amount,
                    LedgerReason::Payout,
                    Some(LedgerRef::market(market_id)),
                )
                .await
            {
                Ok(_) => {
                    total_paid += amount;
                    paid.push(PayoutRecord { user_id, amount });
                }
                Err(err) => {
                    error!(
                        market_id = %market_id,
                        user_id = %user_id,
                        amount = amount,
                        error = %err,
                        "payout credit failed"
                    );
                    failed.push(PayoutRecord { user_id, amount });
                }
            }
        }

        let mut updated = market;
        updated.status = MarketStatus::Resolved;
        updated.resolved_outcome = Some(outcome);
        self.publish_delta(&updated);

        info!(
            market_id = %market_id,
            outcome = %outcome,
            paid = paid.len(),
            failed = failed.len(),
            total_paid = total_paid,
            "market resolved"
        );

        Ok(ResolutionReport {
            market_id,
            outcome,
            paid,
            failed,
            total_paid,
        })
    }

    /// Recovery path for a payout credit that failed during resolution.
    ///
    /// Recomputes what the user is owed from their winning positions and
    /// credits it, refusing with `AlreadySettled` if a payout entry for this
    /// market already exists. Returns the amount credited (zero when the user
    /// holds no winning shares).
    pub async fn retry_payout(&self, market_id: Uuid, user_id: &str) -> Result<f64> {
        let _lock = self.locks.acquire(&market_id.to_string()).await?;

        let market = self.require_market(market_id).await?;
        if market.status != MarketStatus::Resolved {
            return Err(CoreError::MarketNotResolved);
        }
        let outcome = market.resolved_outcome.ok_or_else(|| {
            CoreError::InvariantViolation(format!(
                "market {} is resolved without an outcome",
                market_id
            ))
        })?;

        let market_ref = LedgerRef::market(market_id);
        let already_paid = self
            .ledger
            .history(user_id)
            .await?
            .iter()
            .any(|entry| {
                entry.reason == LedgerReason::Payout
                    && entry.reference.as_ref() == Some(&market_ref)
            });
        if already_paid {
            return Err(CoreError::AlreadySettled);
        }

        let owed: f64 = self
            .positions
            .list_by_market(market_id)
            .await?
            .iter()
            .filter(|p| p.user_id == user_id && p.side == outcome)
            .map(|p| p.shares)
            .sum();
        if owed <= 0.0 {
            return Ok(0.0);
        }

        self.ledger
            .credit(user_id, owed, LedgerReason::Payout, Some(market_ref))
            .await?;

        info!(
            market_id = %market_id,
            user_id = %user_id,
            amount = owed,
            "payout recovered"
        );

        Ok(owed)
    }

    async fn require_market(&self, market_id: Uuid) -> Result<Market> {
        self.markets
            .find_by_id(market_id)
            .await?
            .ok_or(CoreError::MarketNotFound(market_id))
    }

    async fn persist_trade(
        &self,
        market_id: Uuid,
        quote: &amm::Quote,
        position: &Position,
    ) -> Result<()> {
        self.markets
            .update_reserves(market_id, quote.new_yes, quote.new_no)
            .await?;
        self.positions.insert(position.clone()).await
    }

    /// Publish a delta carrying the next per-market sequence number.
    /// Best-effort: the broadcaster cannot fail the caller.
    fn publish_delta(&self, market: &Market) -> u64 {
        let sequence = self
            .sequences
            .entry(market.id)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .value()
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        self.broadcaster.publish(MarketDelta {
            market_id: market.id,
            yes_shares: market.yes_shares,
            no_shares: market.no_shares,
            price_yes: amm::price_yes(market.yes_shares, market.no_shares),
            price_no: amm::price_no(market.yes_shares, market.no_shares),
            status: market.status,
            timestamp: Utc::now(),
            sequence,
        });
        sequence
    }
}
