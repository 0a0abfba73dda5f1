//! Append-only points ledger
//!
//! Single source of truth for user balances. Every balance change anywhere in
//! the system lands here as an immutable entry; corrections append a
//! compensating entry, nothing is ever edited or deleted. The read-modify-
//! write on "most recent balance" is serialized per user so concurrent
//! settlements against the same user never lose updates.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::{CoreError, Result},
    store::LedgerStore,
    types::{LedgerEntry, LedgerReason, LedgerRef},
};

pub struct PointsLedger {
    store: Arc<dyn LedgerStore>,
    user_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PointsLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            user_locks: DashMap::new(),
        }
    }

    /// Current balance: the snapshot on the user's most recent entry, or 0
    pub async fn balance(&self, user_id: &str) -> Result<f64> {
        Ok(self
            .store
            .latest_entry(user_id)
            .await?
            .map(|entry| entry.balance)
            .unwrap_or(0.0))
    }

    /// All entries for a user, oldest first
    pub async fn history(&self, user_id: &str) -> Result<Vec<LedgerEntry>> {
        self.store.list_entries(user_id).await
    }

    /// Add points to a user's balance. Returns the new balance.
    pub async fn credit(
        &self,
        user_id: &str,
        amount: f64,
        reason: LedgerReason,
        reference: Option<LedgerRef>,
    ) -> Result<f64> {
        validate_amount(amount)?;
        self.apply(user_id, amount, reason, reference).await
    }

    /// Remove points from a user's balance. Returns the new balance.
    ///
    /// Fails with `InsufficientBalance` and writes nothing when the balance
    /// would go negative.
    pub async fn debit(
        &self,
        user_id: &str,
        amount: f64,
        reason: LedgerReason,
        reference: Option<LedgerRef>,
    ) -> Result<f64> {
        validate_amount(amount)?;
        self.apply(user_id, -amount, reason, reference).await
    }

    async fn apply(
        &self,
        user_id: &str,
        delta: f64,
        reason: LedgerReason,
        reference: Option<LedgerRef>,
    ) -> Result<f64> {
        let user_lock = self.lock_for(user_id);
        let _guard = user_lock.lock().await;

        let current = self
            .store
            .latest_entry(user_id)
            .await?
            .map(|entry| entry.balance)
            .unwrap_or(0.0);
        let new_balance = current + delta;
        if new_balance < 0.0 {
            return Err(CoreError::InsufficientBalance {
                required: -delta,
                available: current,
            });
        }

        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            delta,
            balance: new_balance,
            reason,
            reference,
            created_at: Utc::now(),
        };
        self.store.append_entry(entry).await?;

        debug!(
            user_id = %user_id,
            delta = delta,
            balance = new_balance,
            reason = %reason,
            "ledger entry appended"
        );

        Ok(new_balance)
    }

    fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.user_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }
}

fn validate_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(CoreError::InvalidAmount);
    }
    Ok(())
}
