//! In-memory store implementations
//!
//! Reference backends for tests and single-process embedding. Durable
//! deployments implement the same traits over their database of choice.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::{CoreError, Result},
    store::{LedgerStore, MarketStore, PositionStore},
    types::{LedgerEntry, Market, MarketStatus, Position, Side},
};

/// Markets keyed by id
#[derive(Default)]
pub struct InMemoryMarketStore {
    markets: DashMap<Uuid, Market>,
}

impl InMemoryMarketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MarketStore for InMemoryMarketStore {
    async fn find_by_id(&self, market_id: Uuid) -> Result<Option<Market>> {
        Ok(self.markets.get(&market_id).map(|m| m.value().clone()))
    }

    async fn insert(&self, market: Market) -> Result<()> {
        self.markets.insert(market.id, market);
        Ok(())
    }

    async fn update_reserves(&self, market_id: Uuid, yes: f64, no: f64) -> Result<()> {
        let mut market = self
            .markets
            .get_mut(&market_id)
            .ok_or(CoreError::MarketNotFound(market_id))?;
        market.yes_shares = yes;
        market.no_shares = no;
        market.updated_at = Utc::now();
        Ok(())
    }

    async fn update_status(
        &self,
        market_id: Uuid,
        status: MarketStatus,
        resolved_outcome: Option<Side>,
    ) -> Result<()> {
        let mut market = self
            .markets
            .get_mut(&market_id)
            .ok_or(CoreError::MarketNotFound(market_id))?;
        market.status = status;
        if resolved_outcome.is_some() {
            market.resolved_outcome = resolved_outcome;
        }
        market.updated_at = Utc::now();
        Ok(())
    }
}

/// Positions in insertion order, so market/user listings are deterministic
#[derive(Default)]
pub struct InMemoryPositionStore {
    positions: RwLock<Vec<Position>>,
}

impl InMemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionStore for InMemoryPositionStore {
    async fn insert(&self, position: Position) -> Result<()> {
        self.positions.write().await.push(position);
        Ok(())
    }

    async fn find_by_id(&self, position_id: Uuid) -> Result<Option<Position>> {
        let positions = self.positions.read().await;
        Ok(positions.iter().find(|p| p.id == position_id).cloned())
    }

    async fn list_by_market(&self, market_id: Uuid) -> Result<Vec<Position>> {
        let positions = self.positions.read().await;
        Ok(positions
            .iter()
            .filter(|p| p.market_id == market_id)
            .cloned()
            .collect())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Position>> {
        let positions = self.positions.read().await;
        Ok(positions
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_shares(
        &self,
        position_id: Uuid,
        shares: f64,
        points_spent: f64,
    ) -> Result<()> {
        let mut positions = self.positions.write().await;
        let position = positions
            .iter_mut()
            .find(|p| p.id == position_id)
            .ok_or(CoreError::PositionNotFound(position_id))?;
        position.shares = shares;
        position.points_spent = points_spent;
        Ok(())
    }
}

/// Per-user append-only entry lists
#[derive(Default)]
pub struct InMemoryLedgerStore {
    entries: RwLock<HashMap<String, Vec<LedgerEntry>>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn append_entry(&self, entry: LedgerEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.entry(entry.user_id.clone()).or_default().push(entry);
        Ok(())
    }

    async fn latest_entry(&self, user_id: &str) -> Result<Option<LedgerEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.get(user_id).and_then(|list| list.last().cloned()))
    }

    async fn list_entries(&self, user_id: &str) -> Result<Vec<LedgerEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.get(user_id).cloned().unwrap_or_default())
    }
}
