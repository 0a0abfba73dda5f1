//! Core domain types for the pricing and settlement kernel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::CoreError;

/// Market lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    /// Accepting trades
    Open,
    /// Trading halted, outcome not yet known
    Closed,
    /// Outcome fixed, payouts distributed
    Resolved,
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketStatus::Open => write!(f, "open"),
            MarketStatus::Closed => write!(f, "closed"),
            MarketStatus::Resolved => write!(f, "resolved"),
        }
    }
}

/// Outcome side of a binary market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Yes => write!(f, "yes"),
            Side::No => write!(f, "no"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yes" => Ok(Side::Yes),
            "no" => Ok(Side::No),
            _ => Err(CoreError::InvalidSide),
        }
    }
}

/// A binary-outcome market priced by the constant-product curve
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: Uuid,
    pub title: String,
    pub yes_shares: f64,
    pub no_shares: f64,
    /// Product of the seed reserves. Informative only: the live invariant is
    /// `yes_shares * no_shares`, preserved by every trade.
    pub liquidity_parameter: f64,
    pub status: MarketStatus,
    pub resolved_outcome: Option<Side>,
    pub close_at: Option<DateTime<Utc>>,
    pub creator_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Market {
    /// Create a market seeded with equal reserves on both sides
    pub fn new(
        title: impl Into<String>,
        creator_id: impl Into<String>,
        seed_liquidity: f64,
        close_at: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            yes_shares: seed_liquidity,
            no_shares: seed_liquidity,
            liquidity_parameter: seed_liquidity * seed_liquidity,
            status: MarketStatus::Open,
            resolved_outcome: None,
            close_at,
            creator_id: creator_id.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Instantaneous price of one side implied by current reserves
    pub fn price(&self, side: Side) -> f64 {
        crate::amm::price(self.yes_shares, self.no_shares, side)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.close_at, Some(close_at) if now >= close_at)
    }
}

/// A user's claim on outcome shares from a single trade.
///
/// One row per trade event: repeated bets on the same side create new
/// positions rather than netting into an existing one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub user_id: String,
    pub market_id: Uuid,
    pub side: Side,
    pub shares: f64,
    /// Cost basis in points
    pub points_spent: f64,
    pub created_at: DateTime<Utc>,
}

impl Position {
    pub fn new(
        user_id: impl Into<String>,
        market_id: Uuid,
        side: Side,
        shares: f64,
        points_spent: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            market_id,
            side,
            shares,
            points_spent,
            created_at: Utc::now(),
        }
    }

    /// Average entry price paid per share
    pub fn avg_price(&self) -> f64 {
        if self.shares > 0.0 {
            self.points_spent / self.shares
        } else {
            0.0
        }
    }
}

/// Why a ledger entry was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerReason {
    Bet,
    Payout,
    MonthlyGrant,
    Tip,
    TipReceived,
    Initial,
    PositionClosed,
}

impl fmt::Display for LedgerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LedgerReason::Bet => "bet",
            LedgerReason::Payout => "payout",
            LedgerReason::MonthlyGrant => "monthly_grant",
            LedgerReason::Tip => "tip",
            LedgerReason::TipReceived => "tip_received",
            LedgerReason::Initial => "initial",
            LedgerReason::PositionClosed => "position_closed",
        };
        write!(f, "{}", s)
    }
}

/// What a ledger entry refers back to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRef {
    pub kind: String,
    pub id: String,
}

impl LedgerRef {
    pub fn market(market_id: Uuid) -> Self {
        Self {
            kind: "market".to_string(),
            id: market_id.to_string(),
        }
    }

    pub fn position(position_id: Uuid) -> Self {
        Self {
            kind: "position".to_string(),
            id: position_id.to_string(),
        }
    }
}

/// Immutable record of a balance change.
///
/// `balance` is the post-entry snapshot; a user's current balance is the
/// balance of their most recent entry. Entries are never edited or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: String,
    pub delta: f64,
    pub balance: f64,
    pub reason: LedgerReason,
    pub reference: Option<LedgerRef>,
    pub created_at: DateTime<Utc>,
}

/// Snapshot pushed to realtime subscribers after every market mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDelta {
    pub market_id: Uuid,
    pub yes_shares: f64,
    pub no_shares: f64,
    pub price_yes: f64,
    pub price_no: f64,
    pub status: MarketStatus,
    pub timestamp: DateTime<Utc>,
    /// Monotonically increasing, scoped to the market
    pub sequence: u64,
}

/// Receipt returned to the caller after a filled trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeReceipt {
    pub position: Position,
    pub price_yes: f64,
    pub price_no: f64,
    pub new_balance: f64,
    pub sequence: u64,
}

/// One user's payout from a resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRecord {
    pub user_id: String,
    pub amount: f64,
}

/// Outcome of a resolution run.
///
/// Credit failures are isolated per user; `failed` lists the users whose
/// payout must be recovered through `MarketService::retry_payout`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub market_id: Uuid,
    pub outcome: Side,
    pub paid: Vec<PayoutRecord>,
    pub failed: Vec<PayoutRecord>,
    pub total_paid: f64,
}
