use rust_decimal::Decimal;

use crate::config::StrategyParams;
use crate::types::{Direction, Mode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlTp {
    pub sl: Decimal,
    pub tp1: Decimal,
    pub tp2: Decimal,
}

/// Pure function. `entry` is the price the order is expected to fill at
/// (ask for BUY, bid for SELL); `pullback_extreme` comes from the setup.
pub fn compute_sl_tp(
    mode: Mode,
    direction: Direction,
    entry: Decimal,
    pullback_extreme: Decimal,
    atr: Decimal,
    params: &StrategyParams,
) -> SlTp {
    let buffer = params.sl_buffer_k * atr;
    let sl = match direction {
        Direction::Buy => pullback_extreme - buffer,
        Direction::Sell => pullback_extreme + buffer,
    };

    let sign = match direction {
        Direction::Buy => Decimal::ONE,
        Direction::Sell => -Decimal::ONE,
    };

    let (tp1, tp2) = match mode {
        Mode::Scalp => (
            entry + sign * params.tp1_atr_scalp * atr,
            entry + sign * params.tp2_atr_scalp * atr,
        ),
        Mode::Swing => {
            let r = (entry - sl).abs();
            (entry + sign * r, entry + sign * params.tp2_r_swing * r)
        }
    };

    SlTp { sl, tp1, tp2 }
}

/// `|tp1 - entry| < min_tp1_spread_mult * spread`: too tight relative to
/// spread to be worth taking.
pub fn tp1_too_tight(entry: Decimal, tp1: Decimal, spread: Decimal, params: &StrategyParams) -> bool {
    (tp1 - entry).abs() < params.min_tp1_spread_mult * spread
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn scalp_buy_targets_are_atr_multiples_above_entry() {
        let params = StrategyParams::default();
        let sltp = compute_sl_tp(Mode::Scalp, Direction::Buy, dec!(2012), dec!(2009.8), dec!(1.0), &params);
        assert_eq!(sltp.sl, dec!(2009.7));
        assert_eq!(sltp.tp1, dec!(2012.8));
        assert_eq!(sltp.tp2, dec!(2013.6));
    }

    #[test]
    fn swing_sell_targets_scale_with_r() {
        let params = StrategyParams::default();
        let sltp = compute_sl_tp(Mode::Swing, Direction::Sell, dec!(100), dec!(101), dec!(1.0), &params);
        // sl = pullback_extreme + buffer = 101 + 0.1 = 101.1; R = |100-101.1| = 1.1
        assert_eq!(sltp.sl, dec!(101.1));
        assert_eq!(sltp.tp1, dec!(98.9));
        assert_eq!(sltp.tp2, dec!(97.8));
    }

    #[test]
    fn tp1_sanity_rejects_targets_tighter_than_spread_multiple() {
        let params = StrategyParams::default();
        assert!(tp1_too_tight(dec!(100), dec!(100.1), dec!(0.2), &params));
        assert!(!tp1_too_tight(dec!(100), dec!(101), dec!(0.2), &params));
    }
}
