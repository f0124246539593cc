//! Credit-ledger contract.
//!
//! The debates module only needs check and deduct; the full ledger
//! (purchases, refunds, payment processing) lives elsewhere and depends
//! on this trait, not the other way around.

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use agora_core::{AgoraError, Result};

#[async_trait]
pub trait BillingService: Send + Sync {
    /// Non-blocking affordability check; does not reserve credits.
    /// Fails with `InsufficientCredits` carrying the shortfall.
    async fn check_credits(&self, user_id: &str, required: Decimal) -> Result<()>;

    /// Deduct credits after a completed operation.
    async fn deduct_credits(
        &self,
        user_id: &str,
        amount: Decimal,
        reason: &str,
        reference_id: Option<Uuid>,
    ) -> Result<()>;
}

/// In-memory ledger used by tests and the single-process CLI variant.
pub struct MemoryBilling {
    balances: RwLock<HashMap<String, Decimal>>,
    /// When set, every check passes and deductions only record spend.
    unlimited: bool,
}

impl MemoryBilling {
    /// Ledger that never rejects; spend is still tracked.
    pub fn unlimited() -> Self {
        Self {
            balances: RwLock::new(HashMap::new()),
            unlimited: true,
        }
    }

    /// Ledger with explicit per-user balances.
    pub fn new() -> Self {
        Self {
            balances: RwLock::new(HashMap::new()),
            unlimited: false,
        }
    }

    pub fn with_balance(self, user_id: &str, balance: Decimal) -> Self {
        self.balances.write().insert(user_id.to_string(), balance);
        self
    }

    pub fn balance(&self, user_id: &str) -> Decimal {
        self.balances
            .read()
            .get(user_id)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

impl Default for MemoryBilling {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BillingService for MemoryBilling {
    async fn check_credits(&self, user_id: &str, required: Decimal) -> Result<()> {
        if self.unlimited {
            return Ok(());
        }
        let available = self.balance(user_id);
        if available < required {
            return Err(AgoraError::InsufficientCredits {
                required,
                available,
                shortfall: required - available,
            });
        }
        Ok(())
    }

    async fn deduct_credits(
        &self,
        user_id: &str,
        amount: Decimal,
        reason: &str,
        reference_id: Option<Uuid>,
    ) -> Result<()> {
        if self.unlimited {
            debug!(user = user_id, %amount, reason, "recording spend (unlimited ledger)");
            let mut balances = self.balances.write();
            let entry = balances.entry(user_id.to_string()).or_default();
            *entry -= amount;
            return Ok(());
        }

        let mut balances = self.balances.write();
        let available = balances
            .get(user_id)
            .copied()
            .unwrap_or(Decimal::ZERO);
        if available < amount {
            return Err(AgoraError::InsufficientCredits {
                required: amount,
                available,
                shortfall: amount - available,
            });
        }
        balances.insert(user_id.to_string(), available - amount);
        debug!(user = user_id, %amount, reason, ?reference_id, "deducted credits");
        Ok(())
    }
}
