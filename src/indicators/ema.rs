use rust_decimal::Decimal;

use super::Indicator;

/// Streaming EMA, seeded by the SMA of the first `period` values and
/// smoothed thereafter with `k = 2/(period+1)`.
#[derive(Debug, Clone)]
pub struct EMA {
    period: usize,
    multiplier: Decimal,
    value: Option<Decimal>,
    count: usize,
    sum: Decimal,
}

impl EMA {
    pub fn new(period: usize) -> Self {
        let multiplier = Decimal::from(2) / Decimal::from(period as u32 + 1);
        Self {
            period,
            multiplier,
            value: None,
            count: 0,
            sum: Decimal::ZERO,
        }
    }

    pub fn update(&mut self, price: Decimal) -> Option<Decimal> {
        self.count += 1;

        if self.count < self.period {
            self.sum += price;
            return None;
        } else if self.count == self.period {
            self.sum += price;
            let sma = self.sum / Decimal::from(self.period as u32);
            self.value = Some(sma);
            return self.value;
        }

        if let Some(prev_ema) = self.value {
            let new_ema = (price - prev_ema) * self.multiplier + prev_ema;
            self.value = Some(new_ema);
        }

        self.value
    }

    pub fn value(&self) -> Option<Decimal> {
        self.value
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for EMA {
    fn name(&self) -> &'static str {
        "EMA"
    }

    fn is_ready(&self) -> bool {
        self.value.is_some()
    }

    fn reset(&mut self) {
        self.value = None;
        self.count = 0;
        self.sum = Decimal::ZERO;
    }
}

/// Full EMA series over `prices`, in input order. Empty once `prices.len() <
/// period`.
pub fn ema_series(prices: &[Decimal], period: usize) -> Vec<Decimal> {
    let mut ema = EMA::new(period);
    prices.iter().filter_map(|p| ema.update(*p)).collect()
}

/// The last value of the EMA series. `None` when `prices.len() < period`.
pub fn ema(prices: &[Decimal], period: usize) -> Option<Decimal> {
    if prices.len() < period {
        return None;
    }
    let mut e = EMA::new(period);
    let mut last = None;
    for p in prices {
        last = e.update(*p);
    }
    last
}

/// `(EMA[-1] - EMA[-1-k]) / (k * ATR)`. Sign agrees with trend direction.
pub fn ema_slope(prices: &[Decimal], period: usize, k: usize, atr: Decimal) -> Option<Decimal> {
    if atr.is_zero() || k == 0 {
        return None;
    }
    let series = ema_series(prices, period);
    if series.len() < k + 1 {
        return None;
    }
    let last = series[series.len() - 1];
    let kth_back = series[series.len() - 1 - k];
    Some((last - kth_back) / (Decimal::from(k as u64) * atr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn ema_missing_below_period() {
        let prices = vec![dec!(1), dec!(2)];
        assert_eq!(ema(&prices, 3), None);
    }

    #[test]
    fn ema_seeded_by_sma_of_first_n() {
        let prices = vec![dec!(10), dec!(20), dec!(30)];
        // period == len: seed value is exactly the SMA.
        assert_eq!(ema(&prices, 3), Some(dec!(20)));
    }

    #[test]
    fn ema_is_order_preserving_and_pure() {
        let prices = vec![dec!(10), dec!(20), dec!(30), dec!(25), dec!(40)];
        let a = ema(&prices, 3);
        let b = ema(&prices, 3);
        assert_eq!(a, b);
    }
}
