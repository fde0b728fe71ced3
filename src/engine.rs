//! Wager engine: placement, settlement and refunds.
//!
//! The engine is a synchronous, serialized state machine. Callers supply an
//! [`EngineContext`] carrying the current time and the entropy domain's
//! progress marker; the engine never reads clocks itself. Every operation
//! validates completely before touching state, so a rejected call leaves no
//! trace.

use crate::config::{CasinoConfig, ConfigError, FeeScheduleConfig, LimitsConfig};
use crate::errors::{
    EngineError, EngineResult, EscrowError, ProtocolError, ValidationError,
};
use crate::escrow::EscrowLedger;
use crate::feeds::FeeConverter;
use crate::odds::{self, OddsParams};
use crate::oracle::{EntropyRequest, EntropySource, RandomnessGateway, RequestToken};
use crate::payouts::{PayoutKind, PendingPayout, PendingPayouts};
use crate::wager::{GameKind, Selection, Wager, WagerId, WagerStatus, WagerStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

/// Ambient facts the engine needs but never observes itself.
#[derive(Debug, Clone, Copy)]
pub struct EngineContext {
    /// Current time, seconds.
    pub now: u64,
    /// Monotonic progress marker of the entropy domain. Fulfillments are
    /// only valid once it has advanced past the value seen at placement.
    pub marker: u64,
    /// Native gas price used for oracle fee estimation.
    pub gas_price: u64,
}

/// A request to place a wager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerRequest {
    pub player: String,
    pub kind: GameKind,
    pub selection: Selection,
    pub stake: u64,
    /// Funds attached to the request; must cover stake plus oracle fee.
    pub attached: u64,
}

impl WagerRequest {
    /// Build a request from a raw modulo, rejecting unsupported game classes.
    pub fn for_modulo(
        player: impl Into<String>,
        modulo: u64,
        selection: Selection,
        stake: u64,
        attached: u64,
    ) -> EngineResult<Self> {
        let kind = GameKind::from_modulo(modulo)
            .ok_or(ValidationError::UnsupportedModulo { modulo })?;
        Ok(Self {
            player: player.into(),
            kind,
            selection,
            stake,
            attached,
        })
    }
}

/// Receipt returned by a successful placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedWager {
    pub wager_id: WagerId,
    pub player: String,
    pub kind: GameKind,
    pub selection: Selection,
    pub request_token: RequestToken,
    pub stake: u64,
    pub reserved_payout: u64,
    pub oracle_fee: u64,
    /// Attached funds beyond stake and fee, returned to the caller.
    pub excess: u64,
    pub placed_at: u64,
}

/// Record emitted when a wager settles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub wager_id: WagerId,
    pub player: String,
    pub kind: GameKind,
    pub stake: u64,
    pub random_value: [u8; 32],
    pub outcome: u64,
    pub win: bool,
    pub payout: u64,
    pub settled_at: u64,
}

/// Record emitted when a wager is refunded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRecord {
    pub wager_id: WagerId,
    pub player: String,
    pub stake: u64,
    pub refunded_at: u64,
}

/// Running house statistics
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HouseStats {
    pub bet_count: u64,
    pub win_count: u64,
    pub refund_count: u64,
    pub total_wagered: u128,
    pub total_paid_out: u128,
    pub total_refunded: u128,
}

/// Per-wager salt bound to the placement facts.
///
/// Public so settlements can be recomputed and checked by anyone.
pub fn derive_salt(wager_id: WagerId, stake: u64, placed_at: u64, marker: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(wager_id.0.to_be_bytes());
    hasher.update(stake.to_be_bytes());
    hasher.update(placed_at.to_be_bytes());
    hasher.update(marker.to_be_bytes());
    hasher.finalize().into()
}

/// Outcome derivation: the oracle value is mixed with the wager salt and
/// reduced modulo the game class.
///
/// Public so settlements can be recomputed and checked by anyone.
pub fn derive_outcome(random_value: &[u8; 32], salt: &[u8; 32], modulo: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(random_value);
    hasher.update(salt);
    let digest = hasher.finalize();
    let mut head = [0u8; 16];
    head.copy_from_slice(&digest[..16]);
    (u128::from_be_bytes(head) % modulo as u128) as u64
}

/// The wagering engine.
pub struct WagerEngine {
    config: CasinoConfig,
    escrow: EscrowLedger,
    store: WagerStore,
    gateway: RandomnessGateway,
    payouts: PendingPayouts,
    fee_converter: FeeConverter,
    stats: HouseStats,
    entered: bool,
}

impl WagerEngine {
    pub fn new(
        config: CasinoConfig,
        fee_converter: FeeConverter,
        entropy_source: Arc<dyn EntropySource>,
    ) -> Self {
        let payouts = PendingPayouts::new(config.payouts.clone());
        Self {
            config,
            escrow: EscrowLedger::new(),
            store: WagerStore::new(),
            gateway: RandomnessGateway::new(entropy_source),
            payouts,
            fee_converter,
            stats: HouseStats::default(),
            entered: false,
        }
    }

    /// Runs a lifecycle operation under the reentrancy guard. The flag is
    /// cleared on every non-panicking exit path.
    fn with_guard<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> EngineResult<T>,
    ) -> EngineResult<T> {
        if self.entered {
            return Err(EngineError::ReentrantCall);
        }
        self.entered = true;
        let result = f(self);
        self.entered = false;
        result
    }

    /// Place a wager.
    ///
    /// Validation order: fee conversion, funding, stake bounds, selection
    /// legality, odds, escrow headroom. Only then is the entropy request
    /// issued and state committed.
    pub fn place_wager(
        &mut self,
        request: &WagerRequest,
        ctx: &EngineContext,
    ) -> EngineResult<PlacedWager> {
        self.with_guard(|eng| {
            let oracle_fee = eng.fee_converter.wager_currency_fee(
                ctx.gas_price,
                eng.config.oracle.compute_budget,
                ctx.now,
            )?;

            let required = request
                .stake
                .checked_add(oracle_fee)
                .ok_or(EngineError::Overflow)?;
            if request.attached < required {
                return Err(ValidationError::Underfunded {
                    attached: request.attached,
                    stake: request.stake,
                    fee: oracle_fee,
                }
                .into());
            }
            let excess = request.attached - required;

            let limits = &eng.config.limits;
            if request.stake < limits.min_stake || request.stake > limits.max_stake {
                return Err(ValidationError::StakeOutOfBounds {
                    stake: request.stake,
                    min: limits.min_stake,
                    max: limits.max_stake,
                }
                .into());
            }

            request.selection.validate_for(request.kind)?;

            let modulo = request.kind.modulo();
            let params = OddsParams::for_modulo(&eng.config, modulo);
            let reserved_payout = odds::win_amount(
                request.stake,
                modulo,
                request.selection.roll_edge(),
                request.selection.is_larger(),
                &params,
            )?;

            // The stake joins the pool before the reservation locks, so the
            // headroom it must fit is free plus the incoming stake.
            let new_total = eng
                .escrow
                .total()
                .checked_add(request.stake)
                .ok_or(EngineError::Overflow)?;
            let headroom = new_total - eng.escrow.locked();
            if reserved_payout > headroom {
                return Err(EscrowError::InsufficientFunds {
                    requested: reserved_payout,
                    free: headroom,
                }
                .into());
            }

            // All checks passed; the entropy request is the last fallible
            // step before state changes.
            let wager_id = eng.store.allocate_id();
            let entropy_request = EntropyRequest::single(&eng.config.oracle);
            let request_token = eng.gateway.request_for(wager_id, &entropy_request)?;

            eng.escrow.deposit(request.stake)?;
            eng.escrow.lock(reserved_payout)?;

            let salt = derive_salt(wager_id, request.stake, ctx.now, ctx.marker);
            eng.store.insert(Wager {
                id: wager_id,
                player: request.player.clone(),
                kind: request.kind,
                selection: request.selection,
                stake: request.stake,
                reserved_payout,
                oracle_fee,
                placed_at: ctx.now,
                placement_marker: ctx.marker,
                salt,
                request_token,
                status: WagerStatus::AwaitingRandomness,
                outcome: None,
                random_value: None,
                realized_payout: None,
                finalized_at: None,
            });

            eng.stats.bet_count += 1;
            eng.stats.total_wagered += request.stake as u128;

            info!(
                wager_id = wager_id.0,
                player = %request.player,
                kind = %request.kind,
                stake = request.stake,
                reserved = reserved_payout,
                token = request_token.0,
                "wager placed"
            );

            Ok(PlacedWager {
                wager_id,
                player: request.player.clone(),
                kind: request.kind,
                selection: request.selection,
                request_token,
                stake: request.stake,
                reserved_payout,
                oracle_fee,
                excess,
                placed_at: ctx.now,
            })
        })
    }

    /// Settle the wager correlated with a fulfillment token.
    ///
    /// Rejected fulfillments leave the wager awaiting: a later valid
    /// callback may still settle it, and the refund path stays open.
    pub fn fulfill(
        &mut self,
        token: RequestToken,
        random_value: [u8; 32],
        ctx: &EngineContext,
    ) -> EngineResult<SettlementRecord> {
        self.with_guard(|eng| {
            let wager_id = eng.gateway.resolve(token)?;
            let wager = eng.store.get(wager_id)?;

            if wager.status.is_terminal() {
                return Err(ProtocolError::AlreadyFinalized {
                    wager_id: wager_id.0,
                }
                .into());
            }

            let deadline = wager
                .placed_at
                .saturating_add(eng.config.timing.fulfillment_window_secs);
            if ctx.now >= deadline {
                return Err(ProtocolError::FulfillmentExpired {
                    wager_id: wager_id.0,
                }
                .into());
            }

            if ctx.marker <= wager.placement_marker {
                return Err(ProtocolError::StaleFulfillment {
                    wager_id: wager_id.0,
                }
                .into());
            }

            let kind = wager.kind;
            let selection = wager.selection;
            let stake = wager.stake;
            let reserved = wager.reserved_payout;
            let salt = wager.salt;
            let player = wager.player.clone();

            let outcome = derive_outcome(&random_value, &salt, kind.modulo());
            let win = selection.wins(outcome);
            let payout = if win { reserved } else { 0 };

            eng.escrow.unlock(reserved);
            if payout > 0 {
                // Covered: unlocking just freed at least this much.
                eng.escrow.withdraw(payout)?;
                eng.payouts.credit(wager_id, &player, payout, PayoutKind::Win);
            }

            let wager = eng.store.get_mut(wager_id)?;
            wager.status = WagerStatus::Settled;
            wager.outcome = Some(outcome);
            wager.random_value = Some(random_value);
            wager.realized_payout = Some(payout);
            wager.finalized_at = Some(ctx.now);

            if win {
                eng.stats.win_count += 1;
            }
            eng.stats.total_paid_out += payout as u128;

            info!(
                wager_id = wager_id.0,
                kind = %kind,
                outcome,
                win,
                payout,
                "wager settled"
            );

            Ok(SettlementRecord {
                wager_id,
                player,
                kind,
                stake,
                random_value,
                outcome,
                win,
                payout,
                settled_at: ctx.now,
            })
        })
    }

    /// Refund a wager whose randomness never arrived.
    ///
    /// Available to anyone once the cooldown since placement has elapsed.
    pub fn refund_wager(
        &mut self,
        wager_id: WagerId,
        ctx: &EngineContext,
    ) -> EngineResult<RefundRecord> {
        self.with_guard(|eng| {
            let wager = eng.store.get(wager_id)?;

            if wager.status.is_terminal() {
                return Err(ProtocolError::AlreadyFinalized {
                    wager_id: wager_id.0,
                }
                .into());
            }

            let available_at = wager
                .placed_at
                .saturating_add(eng.config.timing.refund_cooldown_secs);
            if ctx.now < available_at {
                return Err(ProtocolError::CooldownActive {
                    wager_id: wager_id.0,
                    available_at,
                }
                .into());
            }

            let stake = wager.stake;
            let reserved = wager.reserved_payout;
            let player = wager.player.clone();

            // The pool must still cover the stake once the reservation is
            // released. free + reserved cannot exceed total, so the sum
            // cannot wrap.
            let free_after_unlock = eng.escrow.free() + reserved;
            if stake > free_after_unlock {
                return Err(EscrowError::InsufficientFunds {
                    requested: stake,
                    free: free_after_unlock,
                }
                .into());
            }

            eng.escrow.unlock(reserved);
            eng.escrow.withdraw(stake)?;
            eng.payouts
                .credit(wager_id, &player, stake, PayoutKind::Refund);

            let wager = eng.store.get_mut(wager_id)?;
            wager.status = WagerStatus::Refunded;
            wager.realized_payout = Some(stake);
            wager.finalized_at = Some(ctx.now);

            eng.stats.refund_count += 1;
            eng.stats.total_refunded += stake as u128;

            info!(wager_id = wager_id.0, stake, "wager refunded");

            Ok(RefundRecord {
                wager_id,
                player,
                stake,
                refunded_at: ctx.now,
            })
        })
    }

    /// Refund every awaiting wager whose cooldown has elapsed.
    pub fn sweep_expired(&mut self, ctx: &EngineContext) -> Vec<RefundRecord> {
        let cutoff = ctx
            .now
            .saturating_sub(self.config.timing.refund_cooldown_secs);
        let expired = self.store.awaiting_placed_before(cutoff);

        let mut refunded = Vec::with_capacity(expired.len());
        for wager_id in expired {
            match self.refund_wager(wager_id, ctx) {
                Ok(record) => refunded.push(record),
                Err(err) => {
                    warn!(wager_id = wager_id.0, error = %err, "expiry refund failed");
                }
            }
        }
        refunded
    }

    /// Recompute a settlement from stored facts and compare.
    pub fn verify_settlement(&self, record: &SettlementRecord) -> EngineResult<bool> {
        let wager = self.store.get(record.wager_id)?;

        if wager.status != WagerStatus::Settled {
            return Ok(false);
        }

        let expected_salt =
            derive_salt(wager.id, wager.stake, wager.placed_at, wager.placement_marker);
        if expected_salt != wager.salt {
            return Ok(false);
        }

        if wager.random_value != Some(record.random_value) {
            return Ok(false);
        }

        let outcome = derive_outcome(&record.random_value, &wager.salt, wager.kind.modulo());
        if outcome != record.outcome || wager.outcome != Some(outcome) {
            return Ok(false);
        }

        let win = wager.selection.wins(outcome);
        if win != record.win {
            return Ok(false);
        }

        let expected_payout = if win { wager.reserved_payout } else { 0 };
        Ok(expected_payout == record.payout && wager.realized_payout == Some(record.payout))
    }

    /// Rebuild the settlement record of an already settled wager, if any.
    pub fn settled_record(&self, wager_id: WagerId) -> EngineResult<Option<SettlementRecord>> {
        let wager = self.store.get(wager_id)?;
        if wager.status != WagerStatus::Settled {
            return Ok(None);
        }
        let (random_value, outcome, payout, settled_at) = match (
            wager.random_value,
            wager.outcome,
            wager.realized_payout,
            wager.finalized_at,
        ) {
            (Some(r), Some(o), Some(p), Some(t)) => (r, o, p, t),
            _ => return Ok(None),
        };
        Ok(Some(SettlementRecord {
            wager_id: wager.id,
            player: wager.player.clone(),
            kind: wager.kind,
            stake: wager.stake,
            random_value,
            outcome,
            win: wager.selection.wins(outcome),
            payout,
            settled_at,
        }))
    }

    /// Books balance check: locked matches the live reservations exactly
    /// and never exceeds the pool.
    pub fn audit(&self) -> bool {
        let reserved: u128 = self
            .store
            .iter()
            .filter(|w| w.is_awaiting())
            .map(|w| w.reserved_payout as u128)
            .sum();
        reserved == self.escrow.locked() as u128 && self.escrow.locked() <= self.escrow.total()
    }

    // ---- bankroll and configuration administration ----

    pub fn deposit_bankroll(&mut self, amount: u64) -> EngineResult<()> {
        self.with_guard(|eng| eng.escrow.deposit(amount))
    }

    /// Withdraw free funds from the pool. Locked reservations stay covered.
    pub fn withdraw_bankroll(&mut self, amount: u64) -> EngineResult<()> {
        self.with_guard(|eng| eng.escrow.withdraw(amount))
    }

    /// Replace the stake and payout limits after validating the result.
    pub fn update_limits(&mut self, limits: LimitsConfig) -> Result<(), ConfigError> {
        let mut candidate = self.config.clone();
        candidate.limits = limits;
        candidate.validate()?;
        self.config = candidate;
        Ok(())
    }

    /// Replace the fee schedule after validating the result.
    pub fn update_fees(&mut self, fees: FeeScheduleConfig) -> Result<(), ConfigError> {
        let mut candidate = self.config.clone();
        candidate.fees = fees;
        candidate.validate()?;
        self.config = candidate;
        Ok(())
    }

    // ---- read surface ----

    pub fn config(&self) -> &CasinoConfig {
        &self.config
    }

    pub fn stats(&self) -> HouseStats {
        self.stats
    }

    pub fn escrow(&self) -> &EscrowLedger {
        &self.escrow
    }

    pub fn wager(&self, wager_id: WagerId) -> EngineResult<&Wager> {
        self.store.get(wager_id)
    }

    pub fn wager_count(&self) -> usize {
        self.store.len()
    }

    // ---- pending payout surface, drained by the payout worker ----

    pub fn due_payouts(&self, now_ms: u64) -> Vec<PendingPayout> {
        self.payouts.due(now_ms)
    }

    pub fn payout_delivered(&mut self, wager_id: WagerId) -> Option<PendingPayout> {
        self.payouts.record_delivery(wager_id)
    }

    pub fn payout_failed(&mut self, wager_id: WagerId, now_ms: u64) {
        self.payouts.record_failure(wager_id, now_ms)
    }

    pub fn parked_payouts(&self) -> Vec<PendingPayout> {
        self.payouts.parked()
    }

    pub fn total_payouts_owed(&self) -> u128 {
        self.payouts.total_owed()
    }
}
