//! Odds and payout computation.
//!
//! Pure functions over integer arithmetic. All intermediate products are
//! widened to u128 so no legal input can wrap; the only overflow surface is
//! the final profit cap, which is checked.

use crate::config::CasinoConfig;
use crate::errors::{EngineError, EngineResult, ValidationError};
use crate::wager::MAX_MASK_MODULO;

/// Parameters the payout formula needs, resolved for one game class.
#[derive(Debug, Clone, Copy)]
pub struct OddsParams {
    pub house_edge_percent: u64,
    pub wealth_tax_threshold: u64,
    pub wealth_tax_step_percent: u64,
    pub payout_granularity: u64,
    pub max_profit: u64,
}

impl OddsParams {
    /// Resolve the parameter set for a game class from configuration.
    pub fn for_modulo(config: &CasinoConfig, modulo: u64) -> Self {
        Self {
            house_edge_percent: config.house_edge_percent(modulo),
            wealth_tax_threshold: config.fees.wealth_tax_threshold,
            wealth_tax_step_percent: config.fees.wealth_tax_step_percent,
            payout_granularity: config.limits.payout_granularity,
            max_profit: config.limits.max_profit,
        }
    }
}

/// Number of winning outcomes selected by a bitmask.
pub fn pop_count(mask: u64) -> u32 {
    debug_assert!(
        mask < (1u64 << MAX_MASK_MODULO),
        "mask wider than the largest mask-class game"
    );
    mask.count_ones()
}

/// Total deduction percent for a stake: house edge plus wealth tax.
///
/// The tax adds one step per full multiple of the threshold in the stake.
/// A combined deduction that would consume the whole stake is rejected
/// rather than underflowing.
pub fn deduction_percent(stake: u64, params: &OddsParams) -> EngineResult<u64> {
    debug_assert!(params.wealth_tax_threshold > 0);

    let steps = (stake / params.wealth_tax_threshold) as u128;
    let total = params.house_edge_percent as u128 + steps * params.wealth_tax_step_percent as u128;
    if total >= 100 {
        return Err(ValidationError::ExcessiveDeduction {
            percent: total.min(u64::MAX as u128) as u64,
        }
        .into());
    }
    Ok(total as u64)
}

/// Full payout (stake included) reserved for a winning wager.
///
/// `roll_edge` is the number of winning outcomes for mask games, or the
/// threshold boundary for comparison games. `is_larger` only applies to
/// comparison games, where the strict inequality excludes the boundary
/// value itself and the winning side holds `modulo - 1 - roll_edge`
/// outcomes.
pub fn win_amount(
    stake: u64,
    modulo: u64,
    roll_edge: u64,
    is_larger: bool,
    params: &OddsParams,
) -> EngineResult<u64> {
    debug_assert!(params.payout_granularity > 0);

    if roll_edge == 0 || roll_edge > modulo {
        return Err(ValidationError::OutOfRangeOdds { roll_edge, modulo }.into());
    }

    let effective_roll_edge = if is_larger {
        (modulo - roll_edge).saturating_sub(1)
    } else {
        roll_edge
    };
    if effective_roll_edge == 0 {
        return Err(ValidationError::OutOfRangeOdds { roll_edge, modulo }.into());
    }

    let deduction = deduction_percent(stake, params)? as u128;

    let stake = stake as u128;
    let after_deduction = stake - stake * deduction / 100;
    let raw = after_deduction * modulo as u128 / effective_roll_edge as u128;

    let granularity = params.payout_granularity as u128;
    let rounded = raw / granularity * granularity;

    let cap = (stake as u64)
        .checked_add(params.max_profit)
        .ok_or(EngineError::Overflow)?;

    Ok(rounded.min(cap as u128) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn params() -> OddsParams {
        OddsParams::for_modulo(&CasinoConfig::default(), 2)
    }

    fn naive_pop_count(mask: u64) -> u32 {
        (0..64).filter(|bit| mask & (1u64 << bit) != 0).count() as u32
    }

    #[test]
    fn test_pop_count_matches_naive_scan() {
        let boundary = [
            0u64,
            1,
            0b10,
            0b11,
            (1 << 39),
            (1 << 40) - 1,
            0b1010_1010_1010,
        ];
        for mask in boundary {
            assert_eq!(pop_count(mask), naive_pop_count(mask), "mask {:#x}", mask);
        }

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let mask: u64 = rng.gen_range(0..(1u64 << 40));
            assert_eq!(pop_count(mask), naive_pop_count(mask), "mask {:#x}", mask);
        }
    }

    #[test]
    fn test_coin_flip_single_side_payout() {
        // 2% edge, no wealth tax at this stake: 100_000_000 -> 98_000_000,
        // doubled for a 1-in-2 pick.
        let payout = win_amount(100_000_000, 2, 1, false, &params()).unwrap();
        assert_eq!(payout, 196_000_000);
    }

    #[test]
    fn test_full_mask_returns_less_than_stake() {
        // Picking both sides always wins but the edge still applies.
        let payout = win_amount(100_000_000, 2, 2, false, &params()).unwrap();
        assert_eq!(payout, 98_000_000);
    }

    #[test]
    fn test_wealth_tax_steps_increase_deduction() {
        let p = params();
        // 250e9 stake crosses the 100e9 threshold twice: 2% edge + 2% tax.
        assert_eq!(deduction_percent(250_000_000_000, &p).unwrap(), 4);
        let payout = win_amount(250_000_000_000, 2, 1, false, &p).unwrap();
        assert_eq!(payout, 480_000_000_000);
    }

    #[test]
    fn test_excessive_deduction_rejected() {
        let p = OddsParams {
            house_edge_percent: 2,
            wealth_tax_threshold: 1_000,
            wealth_tax_step_percent: 1,
            payout_granularity: 1,
            max_profit: u64::MAX / 2,
        };
        let err = win_amount(100_000, 2, 1, false, &p).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::ExcessiveDeduction { .. })
        ));
    }

    #[test]
    fn test_out_of_range_roll_edges() {
        let p = params();
        assert!(win_amount(100_000_000, 2, 0, false, &p).is_err());
        assert!(win_amount(100_000_000, 2, 3, false, &p).is_err());
        // Larger-side threshold at the top of the range leaves no outcomes.
        assert!(win_amount(100_000_000, 100, 99, true, &p).is_err());
        // A boundary at the modulus itself leaves none either.
        let err = win_amount(100_000_000, 100, 100, true, &p).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::OutOfRangeOdds { .. })
        ));
    }

    #[test]
    fn test_larger_side_uses_complement_edge() {
        let p = OddsParams::for_modulo(&CasinoConfig::default(), 100);
        // 1% edge. Over 30 wins on 69 of 99 countable outcomes.
        let over = win_amount(1_000_000_000, 100, 30, true, &p).unwrap();
        let expected_over = 990_000_000u128 * 100 / 69;
        assert_eq!(over, (expected_over / 1_000_000 * 1_000_000) as u64);

        // Under 30 wins on 30 outcomes and pays more per unit.
        let under = win_amount(1_000_000_000, 100, 30, false, &p).unwrap();
        assert_eq!(under, 3_300_000_000);
        assert!(under > over);
    }

    #[test]
    fn test_payout_rounds_down_to_granularity() {
        let payout = win_amount(33_000_000, 2, 1, false, &params()).unwrap();
        // Raw 64_680_000 rounds down to the 1_000_000 granularity.
        assert_eq!(payout, 64_000_000);
    }

    #[test]
    fn test_payout_capped_at_stake_plus_max_profit() {
        let p = OddsParams::for_modulo(&CasinoConfig::default(), 100);
        // 1-in-100 shot at max stake would pay far beyond the cap.
        let payout = win_amount(1_000_000_000_000, 100, 1, false, &p).unwrap();
        assert_eq!(payout, 1_300_000_000_000);

        // The cap lands after rounding, so an unaligned stake caps at an
        // unaligned payout.
        let p = OddsParams::for_modulo(&CasinoConfig::default(), 2);
        let payout = win_amount(500_000_000_001, 2, 1, false, &p).unwrap();
        assert_eq!(payout, 800_000_000_001);
    }

    #[test]
    fn test_payout_never_exceeds_cap_across_random_inputs() {
        let config = CasinoConfig::default();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let modulo = [2u64, 6, 36, 37, 100][rng.gen_range(0..5)];
            let p = OddsParams::for_modulo(&config, modulo);
            let stake = rng.gen_range(config.limits.min_stake..=config.limits.max_stake);
            let roll_edge = rng.gen_range(1..=modulo);
            let is_larger = modulo > MAX_MASK_MODULO && rng.gen_bool(0.5);
            match win_amount(stake, modulo, roll_edge, is_larger, &p) {
                Ok(payout) => {
                    let cap = stake + config.limits.max_profit;
                    assert!(payout <= cap);
                    // The cap applies after rounding and need not be aligned.
                    assert!(payout == cap || payout % config.limits.payout_granularity == 0);
                }
                Err(EngineError::Validation(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
    }
}
