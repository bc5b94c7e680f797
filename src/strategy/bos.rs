use rust_decimal::Decimal;

use crate::config::StrategyParams;
use crate::indicators::highest;
use crate::indicators::lowest;
use crate::types::{Bar, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BosOutcome {
    pub triggered: bool,
    /// True when the current bar's range was too large relative to ATR and
    /// the check was skipped for this bar (never counts as a trigger).
    pub big_bar_skip: bool,
}

/// Pure function. `previous_closes` are the highs/lows of the bars strictly
/// preceding `current`, oldest-first; only the trailing `bos_lookback`
/// window is consulted.
pub fn bos_trigger(
    current: &Bar,
    previous_highs: &[Decimal],
    previous_lows: &[Decimal],
    direction: Direction,
    atr: Decimal,
    spread: Decimal,
    params: &StrategyParams,
) -> BosOutcome {
    if current.range() > params.big_k * atr {
        return BosOutcome {
            triggered: false,
            big_bar_skip: true,
        };
    }

    let margin = spread.max(params.atr_margin_k * atr);

    let triggered = match direction {
        Direction::Buy => match highest(previous_highs, params.bos_lookback) {
            Some(hh) => current.c > hh + margin,
            None => false,
        },
        Direction::Sell => match lowest(previous_lows, params.bos_lookback) {
            Some(ll) => current.c < ll - margin,
            None => false,
        },
    };

    BosOutcome {
        triggered,
        big_bar_skip: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(c: Decimal, o: Decimal, h: Decimal, l: Decimal) -> Bar {
        Bar { t: 0, o, h, l, c, v: dec!(1) }
    }

    fn params() -> StrategyParams {
        StrategyParams::default()
    }

    #[test]
    fn triggers_buy_when_close_exceeds_highest_high_plus_margin() {
        let highs = vec![dec!(2008), dec!(2009), dec!(2010), dec!(2011), dec!(2011.5), dec!(2009), dec!(2010), dec!(2011)];
        let lows = vec![dec!(2000); 8];
        let current = bar(dec!(2012), dec!(2011.9), dec!(2012.1), dec!(2011.8));
        let outcome = bos_trigger(&current, &highs, &lows, Direction::Buy, dec!(1.0), dec!(0.1), &params());
        assert!(outcome.triggered);
        assert!(!outcome.big_bar_skip);
    }

    #[test]
    fn does_not_trigger_without_sufficient_margin() {
        let highs = vec![dec!(2008), dec!(2009), dec!(2010), dec!(2011), dec!(2012.05), dec!(2009), dec!(2010), dec!(2011)];
        let lows = vec![dec!(2000); 8];
        let current = bar(dec!(2012.10), dec!(2011.9), dec!(2012.2), dec!(2011.8));
        let outcome = bos_trigger(&current, &highs, &lows, Direction::Buy, dec!(1.0), dec!(0.1), &params());
        assert!(!outcome.triggered);
    }

    #[test]
    fn big_bar_range_exactly_at_cap_is_not_skipped() {
        let highs = vec![dec!(2008); 8];
        let lows = vec![dec!(2000); 8];
        let params = params();
        // range == big_k * atr exactly: strict '>' means NOT skipped.
        let range = params.big_k * dec!(1.0);
        let current = bar(dec!(2100), dec!(2100) - range, dec!(2100), dec!(2100) - range);
        let outcome = bos_trigger(&current, &highs, &lows, Direction::Buy, dec!(1.0), dec!(0.1), &params);
        assert!(!outcome.big_bar_skip);
    }
}
