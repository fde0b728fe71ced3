//! External feed integration.
//!
//! Placement fees are estimated in native units and converted into the wager
//! currency through a rate feed, gated by an optional liveness feed for the
//! upstream the rates come from.

use crate::errors::{EngineError, EngineResult, FeedError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// One round of data reported by an external feed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoundData {
    pub round_id: u64,
    pub answer: i128,
    pub started_at: u64,
    pub updated_at: u64,
    pub answered_in_round: u64,
}

/// Rate feed quoting wager-currency units per native unit, scaled by
/// `decimals`.
pub trait RateFeed: Send + Sync {
    fn latest_round(&self) -> RoundData;
    fn decimals(&self) -> u32;
}

/// Liveness feed for the upstream behind the rate feed. An answer of zero
/// means up; anything else means down. `started_at` is when the current
/// status began.
pub trait LivenessFeed: Send + Sync {
    fn latest_round(&self) -> RoundData;
}

/// Estimates the native-unit cost of delivering an oracle callback.
pub trait FeeEstimator: Send + Sync {
    fn native_fee(&self, gas_price: u64, callback_gas_limit: u64) -> u64;
}

/// Gas-proportional estimator with a fixed delivery overhead.
#[derive(Debug, Clone, Copy)]
pub struct LinearFeeEstimator {
    pub overhead_gas: u64,
}

impl FeeEstimator for LinearFeeEstimator {
    fn native_fee(&self, gas_price: u64, callback_gas_limit: u64) -> u64 {
        gas_price.saturating_mul(callback_gas_limit.saturating_add(self.overhead_gas))
    }
}

/// Converts native-unit callback costs into wager-currency fees.
///
/// Conversion only proceeds when the upstream is up, its recovery grace
/// period has elapsed, and the rate round is answered and positive.
pub struct FeeConverter {
    rate_feed: Arc<dyn RateFeed>,
    liveness_feed: Option<Arc<dyn LivenessFeed>>,
    estimator: Arc<dyn FeeEstimator>,
    recovery_grace_period_secs: u64,
}

impl FeeConverter {
    pub fn new(
        rate_feed: Arc<dyn RateFeed>,
        liveness_feed: Option<Arc<dyn LivenessFeed>>,
        estimator: Arc<dyn FeeEstimator>,
        recovery_grace_period_secs: u64,
    ) -> Self {
        Self {
            rate_feed,
            liveness_feed,
            estimator,
            recovery_grace_period_secs,
        }
    }

    /// Fee for one oracle callback, in wager-currency units.
    pub fn wager_currency_fee(
        &self,
        gas_price: u64,
        callback_gas_limit: u64,
        now: u64,
    ) -> EngineResult<u64> {
        if let Some(liveness) = &self.liveness_feed {
            let round = liveness.latest_round();
            if round.answer != 0 {
                return Err(FeedError::UpstreamDown.into());
            }
            let since_up = now.saturating_sub(round.started_at);
            if since_up <= self.recovery_grace_period_secs {
                let until = round.started_at.saturating_add(self.recovery_grace_period_secs);
                return Err(FeedError::GracePeriodActive { until }.into());
            }
        }

        let round = self.rate_feed.latest_round();
        if round.answered_in_round < round.round_id {
            return Err(FeedError::StaleRate {
                round_id: round.round_id,
            }
            .into());
        }
        if round.answer <= 0 {
            return Err(FeedError::InvalidRate {
                answer: round.answer,
            }
            .into());
        }

        let native = self.estimator.native_fee(gas_price, callback_gas_limit) as u128;
        let scale = 10u128
            .checked_pow(self.rate_feed.decimals())
            .ok_or(FeedError::InvalidRate {
                answer: round.answer,
            })?;
        let fee = native * round.answer as u128 / scale;
        u64::try_from(fee).map_err(|_| EngineError::Overflow)
    }
}

fn lock_round(round: &Mutex<RoundData>) -> MutexGuard<'_, RoundData> {
    match round.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Fixed-value rate feed for demos and tests.
pub struct StaticRateFeed {
    round: Mutex<RoundData>,
    decimals: u32,
}

impl StaticRateFeed {
    pub fn new(answer: i128, decimals: u32) -> Self {
        Self {
            round: Mutex::new(RoundData {
                round_id: 1,
                answer,
                started_at: 0,
                updated_at: 0,
                answered_in_round: 1,
            }),
            decimals,
        }
    }

    pub fn set_round(&self, round: RoundData) {
        *lock_round(&self.round) = round;
    }
}

impl RateFeed for StaticRateFeed {
    fn latest_round(&self) -> RoundData {
        *lock_round(&self.round)
    }

    fn decimals(&self) -> u32 {
        self.decimals
    }
}

/// Fixed-value liveness feed for demos and tests.
pub struct StaticLivenessFeed {
    round: Mutex<RoundData>,
}

impl StaticLivenessFeed {
    /// Reports the upstream as up since the given timestamp.
    pub fn up_since(started_at: u64) -> Self {
        Self {
            round: Mutex::new(RoundData {
                round_id: 1,
                answer: 0,
                started_at,
                updated_at: started_at,
                answered_in_round: 1,
            }),
        }
    }

    /// Reports the upstream as down.
    pub fn down() -> Self {
        Self {
            round: Mutex::new(RoundData {
                round_id: 1,
                answer: 1,
                started_at: 0,
                updated_at: 0,
                answered_in_round: 1,
            }),
        }
    }

    pub fn set_round(&self, round: RoundData) {
        *lock_round(&self.round) = round;
    }
}

impl LivenessFeed for StaticLivenessFeed {
    fn latest_round(&self) -> RoundData {
        *lock_round(&self.round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter(
        rate: StaticRateFeed,
        liveness: Option<StaticLivenessFeed>,
        grace: u64,
    ) -> FeeConverter {
        FeeConverter::new(
            Arc::new(rate),
            liveness.map(|l| Arc::new(l) as Arc<dyn LivenessFeed>),
            Arc::new(LinearFeeEstimator { overhead_gas: 0 }),
            grace,
        )
    }

    #[test]
    fn test_fee_scales_by_rate_and_decimals() {
        // 2.5 wager units per native unit at 8 decimals.
        let conv = converter(StaticRateFeed::new(250_000_000, 8), None, 0);
        let fee = conv.wager_currency_fee(10, 1_000, 100).unwrap();
        // native = 10_000, converted = 10_000 * 2.5
        assert_eq!(fee, 25_000);
    }

    #[test]
    fn test_estimator_overhead_is_charged() {
        let conv = FeeConverter::new(
            Arc::new(StaticRateFeed::new(1_000_000_000, 9)),
            None,
            Arc::new(LinearFeeEstimator { overhead_gas: 500 }),
            0,
        );
        let fee = conv.wager_currency_fee(2, 1_000, 100).unwrap();
        assert_eq!(fee, 3_000);
    }

    #[test]
    fn test_upstream_down_blocks_conversion() {
        let conv = converter(
            StaticRateFeed::new(1_000_000_000, 9),
            Some(StaticLivenessFeed::down()),
            0,
        );
        let err = conv.wager_currency_fee(1, 1, 100).unwrap_err();
        assert_eq!(err, FeedError::UpstreamDown.into());
    }

    #[test]
    fn test_grace_period_after_recovery() {
        let conv = converter(
            StaticRateFeed::new(1_000_000_000, 9),
            Some(StaticLivenessFeed::up_since(1_000)),
            3_600,
        );

        // Inside the grace period, including the boundary instant.
        assert!(matches!(
            conv.wager_currency_fee(1, 1, 1_000).unwrap_err(),
            EngineError::Feed(FeedError::GracePeriodActive { until: 4_600 })
        ));
        assert!(conv.wager_currency_fee(1, 1, 4_600).is_err());

        // One second past the grace period.
        assert!(conv.wager_currency_fee(1, 1, 4_601).is_ok());
    }

    #[test]
    fn test_unanswered_round_is_stale() {
        let rate = StaticRateFeed::new(1_000_000_000, 9);
        rate.set_round(RoundData {
            round_id: 5,
            answer: 1_000_000_000,
            started_at: 0,
            updated_at: 0,
            answered_in_round: 4,
        });
        let conv = converter(rate, None, 0);
        let err = conv.wager_currency_fee(1, 1, 100).unwrap_err();
        assert_eq!(err, FeedError::StaleRate { round_id: 5 }.into());
    }

    #[test]
    fn test_non_positive_answer_rejected() {
        for answer in [0i128, -42] {
            let rate = StaticRateFeed::new(answer, 9);
            let conv = converter(rate, None, 0);
            let err = conv.wager_currency_fee(1, 1, 100).unwrap_err();
            assert_eq!(err, FeedError::InvalidRate { answer }.into());
        }
    }

    #[test]
    fn test_oversized_decimals_rejected() {
        // 10^39 does not fit in the conversion scale.
        let conv = converter(StaticRateFeed::new(1, 39), None, 0);
        let err = conv.wager_currency_fee(1, 1, 100).unwrap_err();
        assert_eq!(err, FeedError::InvalidRate { answer: 1 }.into());
    }

    #[test]
    fn test_missing_liveness_feed_skips_gate() {
        let conv = converter(StaticRateFeed::new(1_000_000_000, 9), None, 3_600);
        assert!(conv.wager_currency_fee(1, 1, 0).is_ok());
    }
}
