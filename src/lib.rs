//! Points prediction market core
//!
//! Pricing and settlement kernel for binary-outcome markets staked with an
//! internal points currency: constant-product pricing, the market lifecycle
//! state machine, an append-only points ledger, position accounting, and
//! per-market locking. Identity, durable storage, and the realtime transport
//! are collaborators behind the traits in `store`, `lock`, and `broadcast`.

pub mod amm;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod market_service;
pub mod positions;
pub mod store;
pub mod telemetry;
pub mod types;

// Re-export commonly used types
pub use broadcast::{BroadcastHub, DeltaBroadcaster, NullBroadcaster};
pub use config::CoreConfig;
pub use error::{CoreError, Result};
pub use ledger::PointsLedger;
pub use lock::{InMemoryLockProvider, LockConfig, LockHandle, LockProvider};
pub use market_service::{MarketService, MarketServiceConfig};
pub use positions::{CloseReceipt, PortfolioEntry, PositionTracker};
pub use store::{
    InMemoryLedgerStore, InMemoryMarketStore, InMemoryPositionStore, LedgerStore, MarketStore,
    PositionStore,
};
pub use types::{
    LedgerEntry, LedgerReason, LedgerRef, Market, MarketDelta, MarketStatus, PayoutRecord,
    Position, ResolutionReport, Side, TradeReceipt,
};

use std::sync::Arc;

/// Wired-together kernel, assembled from configuration.
///
/// Embedders hand in their store implementations; `in_memory` is the
/// all-reference-backend variant used by tests and single-process setups.
pub struct PointsMarket {
    pub market_service: Arc<MarketService>,
    pub position_tracker: Arc<PositionTracker>,
    pub ledger: Arc<PointsLedger>,
    pub broadcast_hub: Arc<BroadcastHub>,
}

impl PointsMarket {
    pub fn new(
        config: &CoreConfig,
        markets: Arc<dyn MarketStore>,
        positions: Arc<dyn PositionStore>,
        ledger_store: Arc<dyn LedgerStore>,
    ) -> Self {
        let ledger = Arc::new(PointsLedger::new(ledger_store));
        let broadcast_hub = Arc::new(BroadcastHub::new(config.broadcast.capacity));
        let locks = Arc::new(InMemoryLockProvider::new(config.lock_config()));

        let market_service = Arc::new(MarketService::new(
            config.market_service_config(),
            markets.clone(),
            positions.clone(),
            ledger.clone(),
            locks,
            broadcast_hub.clone(),
        ));
        let position_tracker = Arc::new(PositionTracker::new(positions, markets, ledger.clone()));

        Self {
            market_service,
            position_tracker,
            ledger,
            broadcast_hub,
        }
    }

    pub fn in_memory(config: &CoreConfig) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryMarketStore::new()),
            Arc::new(InMemoryPositionStore::new()),
            Arc::new(InMemoryLedgerStore::new()),
        )
    }
}
