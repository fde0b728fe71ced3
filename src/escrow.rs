//! Escrow ledger for the house pool.
//!
//! Two counters: `total` funds held and `locked` reservations for unsettled
//! wagers. `free` is their difference and is never allowed to go negative.
//! Locked funds cannot be withdrawn, so every live reservation stays covered.

use crate::errors::{EngineError, EngineResult, EscrowError};

/// Pool accounting. All amounts in base currency units.
#[derive(Debug, Clone, Default)]
pub struct EscrowLedger {
    total: u64,
    locked: u64,
}

impl EscrowLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger seeded with an initial bankroll.
    pub fn with_bankroll(bankroll: u64) -> Self {
        Self {
            total: bankroll,
            locked: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn locked(&self) -> u64 {
        self.locked
    }

    /// Funds not reserved by any wager.
    pub fn free(&self) -> u64 {
        debug_assert!(self.locked <= self.total);
        self.total - self.locked
    }

    /// Add funds to the pool.
    pub fn deposit(&mut self, amount: u64) -> EngineResult<()> {
        self.total = self
            .total
            .checked_add(amount)
            .ok_or(EngineError::Overflow)?;
        Ok(())
    }

    /// Remove free funds from the pool.
    pub fn withdraw(&mut self, amount: u64) -> EngineResult<()> {
        let free = self.free();
        if amount > free {
            return Err(EscrowError::InsufficientFunds {
                requested: amount,
                free,
            }
            .into());
        }
        self.total -= amount;
        Ok(())
    }

    /// Reserve free funds for a wager's maximum payout.
    pub fn lock(&mut self, amount: u64) -> EngineResult<()> {
        let free = self.free();
        if amount > free {
            return Err(EscrowError::InsufficientFunds {
                requested: amount,
                free,
            }
            .into());
        }
        self.locked += amount;
        Ok(())
    }

    /// Release a reservation.
    ///
    /// Releasing more than is locked means the engine's bookkeeping is
    /// corrupt, which is unrecoverable; this panics rather than continuing
    /// with a broken ledger.
    pub fn unlock(&mut self, amount: u64) {
        assert!(
            amount <= self.locked,
            "escrow unlock of {} exceeds locked {}",
            amount,
            self.locked
        );
        self.locked -= amount;
    }
}
