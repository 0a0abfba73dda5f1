//! Position accounting and profit tracking
//!
//! Read-heavy layer over position storage. Unrealized PnL marks a position to
//! the current curve price; closing reduces the position and realizes a
//! positive PnL into the ledger, mirroring the payout-only crediting model
//! used at resolution.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    amm,
    error::{CoreError, Result},
    ledger::PointsLedger,
    store::{MarketStore, PositionStore},
    types::{LedgerReason, LedgerRef, MarketStatus, Position},
};

/// A position paired with its mark-to-market PnL
#[derive(Debug, Clone)]
pub struct PortfolioEntry {
    pub position: Position,
    pub unrealized_pnl: f64,
}

/// Result of closing (part of) a position
#[derive(Debug, Clone)]
pub struct CloseReceipt {
    pub position_id: Uuid,
    pub quantity_closed: f64,
    pub realized_pnl: f64,
    /// Points credited to the ledger; zero when PnL was not positive
    pub credited: f64,
}

pub struct PositionTracker {
    positions: Arc<dyn PositionStore>,
    markets: Arc<dyn MarketStore>,
    ledger: Arc<PointsLedger>,
    close_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl PositionTracker {
    pub fn new(
        positions: Arc<dyn PositionStore>,
        markets: Arc<dyn MarketStore>,
        ledger: Arc<PointsLedger>,
    ) -> Self {
        Self {
            positions,
            markets,
            ledger,
            close_locks: DashMap::new(),
        }
    }

    /// Mark a position to the current curve price:
    /// `(current_price - avg_price) * shares`
    pub async fn unrealized_pnl(&self, position: &Position) -> Result<f64> {
        let market = self
            .markets
            .find_by_id(position.market_id)
            .await?
            .ok_or(CoreError::MarketNotFound(position.market_id))?;
        let current = amm::price(market.yes_shares, market.no_shares, position.side);
        Ok((current - position.avg_price()) * position.shares)
    }

    /// All of a user's positions with their unrealized PnL
    pub async fn portfolio(&self, user_id: &str) -> Result<Vec<PortfolioEntry>> {
        let positions = self.positions.list_by_user(user_id).await?;
        let mut entries = Vec::with_capacity(positions.len());
        for position in positions {
            let unrealized_pnl = self.unrealized_pnl(&position).await?;
            entries.push(PortfolioEntry {
                position,
                unrealized_pnl,
            });
        }
        Ok(entries)
    }

    /// Close `quantity` shares of a position, partially or fully.
    ///
    /// Only the owner may close. The market must still be open: once trading
    /// stops, resolution is the only settlement path. Positive realized PnL
    /// is credited with reason `position_closed`; losses reduce the position
    /// without a ledger entry. Closes of the same position are serialized,
    /// so concurrent calls cannot spend the same shares twice.
    pub async fn close_position(
        &self,
        position_id: Uuid,
        caller_id: &str,
        quantity: f64,
    ) -> Result<CloseReceipt> {
        let close_lock = self.lock_for(position_id);
        let _guard = close_lock.lock().await;

        let position = self
            .positions
            .find_by_id(position_id)
            .await?
            .ok_or(CoreError::PositionNotFound(position_id))?;
        if position.user_id != caller_id {
            return Err(CoreError::Forbidden);
        }
        if !quantity.is_finite() || quantity <= 0.0 || quantity > position.shares {
            return Err(CoreError::InvalidAmount);
        }

        let market = self
            .markets
            .find_by_id(position.market_id)
            .await?
            .ok_or(CoreError::MarketNotFound(position.market_id))?;
        if market.status != MarketStatus::Open {
            return Err(CoreError::MarketNotOpen);
        }

        let current = amm::price(market.yes_shares, market.no_shares, position.side);
        let realized_pnl = (current - position.avg_price()) * quantity;

        let remaining = position.shares - quantity;
        let remaining_basis = if position.shares > 0.0 {
            position.points_spent * (remaining / position.shares)
        } else {
            0.0
        };
        self.positions
            .update_shares(position_id, remaining, remaining_basis)
            .await?;

        let credited = if realized_pnl > 0.0 {
            if let Err(err) = self
                .ledger
                .credit(
                    caller_id,
                    realized_pnl,
                    LedgerReason::PositionClosed,
                    Some(LedgerRef::position(position_id)),
                )
                .await
            {
                // Restore the position so the unpaid gain is not lost.
                error!(
                    position_id = %position_id,
                    user_id = %caller_id,
                    error = %err,
                    "realized PnL credit failed, restoring position"
                );
                if let Err(restore_err) = self
                    .positions
                    .update_shares(position_id, position.shares, position.points_spent)
                    .await
                {
                    error!(
                        position_id = %position_id,
                        error = %restore_err,
                        "position restore failed"
                    );
                }
                return Err(err);
            }
            realized_pnl
        } else {
            0.0
        };

        info!(
            position_id = %position_id,
            user_id = %caller_id,
            quantity = quantity,
            realized_pnl = realized_pnl,
            "position closed"
        );

        Ok(CloseReceipt {
            position_id,
            quantity_closed: quantity,
            realized_pnl,
            credited,
        })
    }

    fn lock_for(&self, position_id: Uuid) -> Arc<Mutex<()>> {
        self.close_locks
            .entry(position_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }
}
