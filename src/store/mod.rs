//! Repository contracts between the kernel and durable storage
//!
//! The kernel never talks to a database directly; everything it needs from
//! persistence is expressed here. `memory` ships reference implementations
//! used by the test suite and by embedders that run without a database.

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    error::Result,
    types::{LedgerEntry, Market, MarketStatus, Position, Side},
};

pub mod memory;

pub use memory::{InMemoryLedgerStore, InMemoryMarketStore, InMemoryPositionStore};

/// Market persistence
#[async_trait]
pub trait MarketStore: Send + Sync {
    async fn find_by_id(&self, market_id: Uuid) -> Result<Option<Market>>;

    async fn insert(&self, market: Market) -> Result<()>;

    /// Overwrite both reserve pools. Only the lifecycle service calls this,
    /// and only while holding the market lock.
    async fn update_reserves(&self, market_id: Uuid, yes: f64, no: f64) -> Result<()>;

    async fn update_status(
        &self,
        market_id: Uuid,
        status: MarketStatus,
        resolved_outcome: Option<Side>,
    ) -> Result<()>;
}

/// Position persistence
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn insert(&self, position: Position) -> Result<()>;

    async fn find_by_id(&self, position_id: Uuid) -> Result<Option<Position>>;

    async fn list_by_market(&self, market_id: Uuid) -> Result<Vec<Position>>;

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Position>>;

    /// Used by position closing to shrink quantity and cost basis together
    async fn update_shares(
        &self,
        position_id: Uuid,
        shares: f64,
        points_spent: f64,
    ) -> Result<()>;
}

/// Ledger persistence. Entries are append-only; implementations must never
/// expose mutation of existing rows.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn append_entry(&self, entry: LedgerEntry) -> Result<()>;

    async fn latest_entry(&self, user_id: &str) -> Result<Option<LedgerEntry>>;

    /// All entries for a user, oldest first
    async fn list_entries(&self, user_id: &str) -> Result<Vec<LedgerEntry>>;
}
