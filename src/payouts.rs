//! Pending payout ledger.
//!
//! Settlement and refunds never block on the transfer leg: amounts owed are
//! credited here and drained by the payout worker. Failed deliveries back
//! off exponentially and are parked for manual handling once the attempt
//! budget is spent.

use crate::config::PayoutRetryConfig;
use crate::wager::WagerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Why a payout is owed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutKind {
    Win,
    Refund,
}

/// One payout owed to a player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPayout {
    pub wager_id: WagerId,
    pub player: String,
    pub amount: u64,
    pub kind: PayoutKind,
    pub retry_count: u32,
    /// Epoch milliseconds before which delivery should not be retried.
    pub next_retry_after: Option<u64>,
    /// Out of retry budget; excluded from automatic draining.
    pub parked: bool,
}

/// Ledger of undelivered payouts, keyed by wager. A wager finalizes exactly
/// once, so it can owe at most one payout.
pub struct PendingPayouts {
    entries: HashMap<u64, PendingPayout>,
    config: PayoutRetryConfig,
}

impl PendingPayouts {
    pub fn new(config: PayoutRetryConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
        }
    }

    /// Credit a payout owed to a player. Due immediately.
    pub fn credit(&mut self, wager_id: WagerId, player: &str, amount: u64, kind: PayoutKind) {
        let previous = self.entries.insert(
            wager_id.0,
            PendingPayout {
                wager_id,
                player: player.to_string(),
                amount,
                kind,
                retry_count: 0,
                next_retry_after: None,
                parked: false,
            },
        );
        debug_assert!(previous.is_none(), "wager {} credited twice", wager_id);
        info!(wager_id = wager_id.0, amount, kind = ?kind, "payout credited");
    }

    /// Entries ready for a delivery attempt, oldest wager first.
    pub fn due(&self, now_ms: u64) -> Vec<PendingPayout> {
        let mut ready: Vec<PendingPayout> = self
            .entries
            .values()
            .filter(|p| !p.parked && p.next_retry_after.map_or(true, |at| at <= now_ms))
            .cloned()
            .collect();
        ready.sort_by_key(|p| p.wager_id);
        ready
    }

    /// Remove a delivered payout from the ledger.
    pub fn record_delivery(&mut self, wager_id: WagerId) -> Option<PendingPayout> {
        let delivered = self.entries.remove(&wager_id.0);
        if let Some(ref payout) = delivered {
            debug!(
                wager_id = wager_id.0,
                amount = payout.amount,
                "payout delivered"
            );
        }
        delivered
    }

    /// Record a failed delivery attempt and reschedule or park the entry.
    pub fn record_failure(&mut self, wager_id: WagerId, now_ms: u64) {
        let Some(payout) = self.entries.get_mut(&wager_id.0) else {
            return;
        };

        payout.retry_count += 1;
        if payout.retry_count >= self.config.max_attempts {
            payout.parked = true;
            payout.next_retry_after = None;
            warn!(
                wager_id = wager_id.0,
                attempts = payout.retry_count,
                amount = payout.amount,
                "payout parked after exhausting retries"
            );
            return;
        }

        let shift = (payout.retry_count - 1).min(16);
        let delay = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << shift)
            .min(self.config.backoff_max_ms);
        payout.next_retry_after = Some(now_ms.saturating_add(delay));
        warn!(
            wager_id = wager_id.0,
            attempt = payout.retry_count,
            retry_in_ms = delay,
            "payout delivery failed, backing off"
        );
    }

    /// Entries that ran out of retries and need manual handling.
    pub fn parked(&self) -> Vec<PendingPayout> {
        let mut parked: Vec<PendingPayout> = self
            .entries
            .values()
            .filter(|p| p.parked)
            .cloned()
            .collect();
        parked.sort_by_key(|p| p.wager_id);
        parked
    }

    /// Total amount owed across all entries.
    pub fn total_owed(&self) -> u128 {
        self.entries.values().map(|p| p.amount as u128).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
