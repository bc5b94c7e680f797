use rust_decimal::Decimal;

use crate::config::StrategyParams;
use crate::types::{Bar, Direction, Setup, TouchType};

/// Pure: attempts to construct a new setup from the entry-tf bar that just
/// closed. `direction` is the trend direction already established by the
/// caller; this function only evaluates the chop, alignment, touch and
/// rejection-candle conditions.
pub fn attempt_setup(
    bar: &Bar,
    direction: Direction,
    ema20: Decimal,
    ema50: Decimal,
    atr: Decimal,
    params: &StrategyParams,
) -> Option<Setup> {
    if atr.is_zero() {
        return None;
    }

    let spread_atr = (ema20 - ema50).abs() / atr;
    if spread_atr < params.chop_min {
        return None;
    }

    let aligned = match direction {
        Direction::Buy => ema20 > ema50,
        Direction::Sell => ema20 < ema50,
    };
    if !aligned {
        return None;
    }

    let tol50 = params
        .tol_max
        .min(params.tol_base + params.tol_k * (spread_atr - params.chop_min).max(Decimal::ZERO))
        * atr;
    let fast_allowed = spread_atr >= params.fast_min;
    let tol20 = params.fast_tol * atr;

    let probe = match direction {
        Direction::Buy => bar.l,
        Direction::Sell => bar.h,
    };

    let touched50 = (probe - ema50).abs() <= tol50;
    let touched20 = fast_allowed && (probe - ema20).abs() <= tol20;

    let (touch_type, ref_ema) = if touched50 {
        (TouchType::Ema50, ema50)
    } else if touched20 {
        (TouchType::Ema20, ema20)
    } else {
        return None;
    };

    if !rejection_candle(bar, direction, params) {
        return None;
    }

    let pullback_extreme = match direction {
        Direction::Buy => bar.l,
        Direction::Sell => bar.h,
    };

    Some(Setup::new(direction, bar.t, pullback_extreme, touch_type, ref_ema))
}

fn rejection_candle(bar: &Bar, direction: Direction, params: &StrategyParams) -> bool {
    let range = bar.range();
    if range <= Decimal::ZERO {
        return false;
    }

    match direction {
        Direction::Buy => {
            if bar.c <= bar.o {
                return false;
            }
            let close_pct = (bar.c - bar.l) / range;
            let wick_pct = (bar.o.min(bar.c) - bar.l) / range;
            close_pct >= params.close_pct && wick_pct >= params.wick_pct
        }
        Direction::Sell => {
            if bar.c >= bar.o {
                return false;
            }
            let close_pct = (bar.h - bar.c) / range;
            let wick_pct = (bar.h - bar.o.max(bar.c)) / range;
            close_pct >= params.close_pct && wick_pct >= params.wick_pct
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params() -> StrategyParams {
        StrategyParams::default()
    }

    #[test]
    fn touches_ema50_and_accepts_strong_bullish_rejection_candle() {
        let bar = Bar {
            t: 0,
            o: dec!(2010.3),
            h: dec!(2010.5),
            l: dec!(2009.9),
            c: dec!(2010.4),
            v: dec!(1),
        };
        // close-low/range = 0.5/0.6 = 0.83 >= 0.6; wick = (2010.3-2009.9)/0.6 = 0.67 >= 0.3
        let setup = attempt_setup(&bar, Direction::Buy, dec!(2011), dec!(2009.5), dec!(1.0), &params());
        assert!(setup.is_some());
        let setup = setup.unwrap();
        assert_eq!(setup.touch_type, TouchType::Ema50);
        assert_eq!(setup.pullback_extreme, bar.l);
    }

    #[test]
    fn rejects_when_not_aligned_with_trend() {
        let bar = Bar {
            t: 0,
            o: dec!(2010.3),
            h: dec!(2010.5),
            l: dec!(2009.9),
            c: dec!(2010.4),
            v: dec!(1),
        };
        // EMA20 < EMA50 while direction is BUY: misaligned.
        let setup = attempt_setup(&bar, Direction::Buy, dec!(2009), dec!(2009.5), dec!(1.0), &params());
        assert!(setup.is_none());
    }

    #[test]
    fn rejects_when_no_touch_within_tolerance() {
        let bar = Bar {
            t: 0,
            o: dec!(2010.3),
            h: dec!(2010.5),
            l: dec!(2009.9),
            c: dec!(2010.4),
            v: dec!(1),
        };
        let setup = attempt_setup(&bar, Direction::Buy, dec!(2020), dec!(2000), dec!(0.5), &params());
        assert!(setup.is_none());
    }
}
