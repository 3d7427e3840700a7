//! Proportional trade sizing.
//!
//! Sizing is anchored to the source wallet's lifetime acquisition of a mint
//! rather than its live balance: transfers outside the monitored swap flow can
//! move the live balance, but lifetime accumulation is the only quantity that
//! can be verified purely from observed swap events.

use thiserror::Error;

use crate::positions::AssetPosition;

/// When the unsold remainder of the source's lifetime buy is within this
/// fraction of the observed sell, treat it as the source's final liquidation
/// and flush the controlled wallet's entire live balance instead of the
/// computed amount. Avoids unsellable dust from rounding drift between the
/// two wallets' independent trade histories.
pub const FINAL_EXIT_TOLERANCE: f64 = 0.01;

#[derive(Clone, Copy, Debug)]
pub struct SizingConfig {
    /// Fraction of the source's SOL spend mirrored on buys, e.g. 0.1 for 10%.
    pub trade_percentage: f64,
    /// Buys computing to less SOL than this are skipped.
    pub min_trade_sol: f64,
    pub slippage_pct: f64,
    /// SOL kept aside for transaction fees when checking affordability.
    pub fee_reserve_sol: f64,
}

/// A trade that was observed but will not be mirrored. Not a failure: skips
/// are logged and processing of the event ends normally.
#[derive(Debug, Error, PartialEq)]
pub enum SkipReason {
    #[error("computed spend {spend_sol:.6} SOL below minimum {min_sol:.6}")]
    BelowMinimum { spend_sol: f64, min_sol: f64 },
    #[error("balance {balance_sol:.6} SOL cannot cover {required_sol:.6}")]
    InsufficientBalance {
        balance_sol: f64,
        required_sol: f64,
    },
    #[error("no historical buys to size against")]
    NoBaseline,
    #[error("nothing left to sell after clamping")]
    NothingToSell,
}

/// Size a mirrored buy: fixed fraction of the source's SOL spend, floored at
/// the minimum and checked against the live SOL balance with slippage and fee
/// headroom. Returns the SOL amount to spend.
pub fn plan_buy(
    source_sol: f64,
    config: &SizingConfig,
    live_balance_sol: f64,
) -> Result<f64, SkipReason> {
    let spend = source_sol * config.trade_percentage;
    if !spend.is_finite() || spend < config.min_trade_sol {
        return Err(SkipReason::BelowMinimum {
            spend_sol: spend,
            min_sol: config.min_trade_sol,
        });
    }
    let required = spend * (1.0 + config.slippage_pct / 100.0) + config.fee_reserve_sol;
    if live_balance_sol < required {
        return Err(SkipReason::InsufficientBalance {
            balance_sol: live_balance_sol,
            required_sol: required,
        });
    }
    Ok(spend)
}

/// Size a mirrored sell. `position` must already include the source-side sell
/// being mirrored. Returns the token amount to sell.
///
/// The sell fraction is measured against the source's lifetime buys, then
/// applied to the controlled wallet's lifetime buys and clamped both to the
/// book's unsold remainder and to the live token balance. A source sell that
/// exhausts (within tolerance) its lifetime buy flushes the entire live
/// balance.
pub fn plan_sell(
    source_tokens: f64,
    position: &AssetPosition,
    live_balance_tokens: f64,
) -> Result<f64, SkipReason> {
    if position.source_bought <= 0.0 || position.controlled_bought <= 0.0 {
        return Err(SkipReason::NoBaseline);
    }
    if source_tokens <= 0.0 || !source_tokens.is_finite() {
        return Err(SkipReason::NothingToSell);
    }

    let sold_fraction = (position.source_sold / position.source_bought).min(1.0);
    if sold_fraction + FINAL_EXIT_TOLERANCE >= 1.0 {
        if live_balance_tokens <= 0.0 {
            return Err(SkipReason::NothingToSell);
        }
        return Ok(live_balance_tokens);
    }

    let sell_fraction = (source_tokens / position.source_bought).min(1.0);
    let raw = position.controlled_bought * sell_fraction;
    let clamped = raw
        .min(position.controlled_remaining())
        .min(live_balance_tokens);
    if clamped <= 0.0 {
        return Err(SkipReason::NothingToSell);
    }
    Ok(clamped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SizingConfig {
        SizingConfig {
            trade_percentage: 0.1,
            min_trade_sol: 0.01,
            slippage_pct: 1.0,
            fee_reserve_sol: 0.01,
        }
    }

    fn position(
        source_bought: f64,
        source_sold: f64,
        controlled_bought: f64,
        controlled_sold: f64,
    ) -> AssetPosition {
        AssetPosition {
            source_bought,
            source_sold,
            controlled_bought,
            controlled_sold,
            ..Default::default()
        }
    }

    #[test]
    fn buy_mirrors_fixed_fraction() {
        // Source spends 2 SOL at 10% -> 0.2 SOL mirrored.
        let spend = plan_buy(2.0, &config(), 10.0).unwrap();
        assert!((spend - 0.2).abs() < 1e-12);
    }

    #[test]
    fn buy_below_minimum_is_rejected() {
        // 0.05 * 0.1 = 0.005 < 0.01 minimum.
        let err = plan_buy(0.05, &config(), 10.0).unwrap_err();
        assert!(matches!(err, SkipReason::BelowMinimum { .. }));
    }

    #[test]
    fn buy_requires_headroom_for_slippage_and_fees() {
        // 0.2 spend needs 0.2 * 1.01 + 0.01 = 0.212 SOL.
        let err = plan_buy(2.0, &config(), 0.21).unwrap_err();
        assert!(matches!(err, SkipReason::InsufficientBalance { .. }));
        assert!(plan_buy(2.0, &config(), 0.213).is_ok());
    }

    #[test]
    fn sell_is_proportional_to_lifetime_buys() {
        // Source sells 50 of a lifetime 100 bought; controlled bought 10.
        let pos = position(100.0, 50.0, 10.0, 0.0);
        let amount = plan_sell(50.0, &pos, 100.0).unwrap();
        assert!((amount - 5.0).abs() < 1e-12);
    }

    #[test]
    fn sell_clamps_to_unsold_remainder_and_live_balance() {
        let pos = position(100.0, 50.0, 10.0, 8.0);
        // Book remainder is 2, live balance is plenty.
        assert_eq!(plan_sell(50.0, &pos, 100.0).unwrap(), 2.0);
        // Live balance is the tighter bound.
        let pos = position(100.0, 50.0, 10.0, 0.0);
        assert_eq!(plan_sell(50.0, &pos, 3.0).unwrap(), 3.0);
    }

    #[test]
    fn final_liquidation_flushes_entire_live_balance() {
        // Source has now sold 99.5% of its lifetime buy: within the 1%
        // tolerance of a full exit.
        let pos = position(100.0, 99.5, 10.0, 5.0);
        assert_eq!(plan_sell(49.5, &pos, 4.7).unwrap(), 4.7);
    }

    #[test]
    fn exact_full_exit_flushes_live_balance() {
        let pos = position(100.0, 100.0, 10.0, 9.0);
        assert_eq!(plan_sell(50.0, &pos, 1.2).unwrap(), 1.2);
    }

    #[test]
    fn sell_without_baseline_is_rejected() {
        let pos = position(0.0, 0.0, 10.0, 0.0);
        assert_eq!(plan_sell(10.0, &pos, 5.0).unwrap_err(), SkipReason::NoBaseline);
        let pos = position(100.0, 10.0, 0.0, 0.0);
        assert_eq!(plan_sell(10.0, &pos, 5.0).unwrap_err(), SkipReason::NoBaseline);
    }

    #[test]
    fn sell_with_no_holdings_is_rejected() {
        let pos = position(100.0, 10.0, 10.0, 10.0);
        assert_eq!(
            plan_sell(10.0, &pos, 0.0).unwrap_err(),
            SkipReason::NothingToSell
        );
    }
}
