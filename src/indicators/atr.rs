use rust_decimal::Decimal;

use super::Indicator;

/// Wilder-smoothed ATR (`alpha = 1/period`) over true ranges, seeded by the
/// SMA of the first `period` TRs. The true range of the very first bar fed
/// in (no previous close) is simply `high - low`.
#[derive(Debug, Clone)]
pub struct ATR {
    period: usize,
    prev_close: Option<Decimal>,
    true_ranges: Vec<Decimal>,
    value: Option<Decimal>,
}

impl ATR {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            true_ranges: Vec::with_capacity(period),
            value: None,
        }
    }

    pub fn update(&mut self, high: Decimal, low: Decimal, close: Decimal) -> Option<Decimal> {
        let tr = self.true_range(high, low, close);
        self.prev_close = Some(close);

        self.true_ranges.push(tr);

        if self.true_ranges.len() < self.period {
            return None;
        }

        if self.true_ranges.len() == self.period && self.value.is_none() {
            let sum: Decimal = self.true_ranges.iter().sum();
            self.value = Some(sum / Decimal::from(self.period as u32));
        } else if let Some(prev_atr) = self.value {
            let period_dec = Decimal::from(self.period as u32);
            let new_atr = (prev_atr * (period_dec - Decimal::ONE) + tr) / period_dec;
            self.value = Some(new_atr);
        }

        self.value
    }

    fn true_range(&self, high: Decimal, low: Decimal, close: Decimal) -> Decimal {
        let hl = high - low;

        match self.prev_close {
            Some(prev_close) => {
                let hc = (high - prev_close).abs();
                let lc = (low - prev_close).abs();
                hl.max(hc).max(lc)
            }
            None => hl,
        }
    }

    pub fn value(&self) -> Option<Decimal> {
        self.value
    }
}

impl Indicator for ATR {
    fn name(&self) -> &'static str {
        "ATR"
    }

    fn is_ready(&self) -> bool {
        self.value.is_some()
    }

    fn reset(&mut self) {
        self.prev_close = None;
        self.true_ranges.clear();
        self.value = None;
    }
}

/// Input triplet for a closed bar's high/low/close, in chronological order.
pub type Hlc = (Decimal, Decimal, Decimal);

/// The last value of the Wilder ATR series over `bars`. `None` when
/// `bars.len() < period`.
pub fn atr(bars: &[Hlc], period: usize) -> Option<Decimal> {
    if bars.len() < period {
        return None;
    }
    let mut a = ATR::new(period);
    let mut last = None;
    for (h, l, c) in bars {
        last = a.update(*h, *l, *c);
    }
    last
}

/// Full ATR series over `bars`, in input order.
pub fn atr_series(bars: &[Hlc], period: usize) -> Vec<Decimal> {
    let mut a = ATR::new(period);
    bars.iter()
        .filter_map(|(h, l, c)| a.update(*h, *l, *c))
        .collect()
}

/// Current ATR divided by the SMA of ATR over `window` trailing values of the
/// ATR series.
pub fn atr_ratio(bars: &[Hlc], period: usize, window: usize) -> Option<Decimal> {
    let series = atr_series(bars, period);
    if series.is_empty() {
        return None;
    }
    let current = *series.last()?;
    let avg = super::sma(&series, window)?;
    if avg.is_zero() {
        return None;
    }
    Some(current / avg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn first_bar_true_range_is_high_minus_low() {
        let bars = vec![(dec!(10), dec!(8), dec!(9))];
        let mut a = ATR::new(1);
        assert_eq!(a.update(dec!(10), dec!(8), dec!(9)), Some(dec!(2)));
        let _ = bars;
    }

    #[test]
    fn missing_below_period() {
        let bars = vec![(dec!(10), dec!(8), dec!(9))];
        assert_eq!(atr(&bars, 2), None);
    }
}
