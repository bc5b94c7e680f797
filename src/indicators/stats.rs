use rust_decimal::Decimal;

pub fn sma(values: &[Decimal], period: usize) -> Option<Decimal> {
    if values.len() < period {
        return None;
    }
    let sum: Decimal = values.iter().rev().take(period).sum();
    Some(sum / Decimal::from(period as u32))
}

pub fn highest(values: &[Decimal], period: usize) -> Option<Decimal> {
    if values.len() < period {
        return None;
    }
    values.iter().rev().take(period).max().copied()
}

pub fn lowest(values: &[Decimal], period: usize) -> Option<Decimal> {
    if values.len() < period {
        return None;
    }
    values.iter().rev().take(period).min().copied()
}

fn stddev(values: &[Decimal], period: usize) -> Option<Decimal> {
    if values.len() < period {
        return None;
    }
    let mean = sma(values, period)?;
    let variance: Decimal = values
        .iter()
        .rev()
        .take(period)
        .map(|v| {
            let diff = *v - mean;
            diff * diff
        })
        .sum::<Decimal>()
        / Decimal::from(period as u32);

    Some(sqrt_decimal(variance))
}

fn sqrt_decimal(value: Decimal) -> Decimal {
    if value.is_zero() || value.is_sign_negative() {
        return Decimal::ZERO;
    }

    let mut guess = value / Decimal::from(2);
    let epsilon = Decimal::new(1, 10);

    for _ in 0..50 {
        let new_guess = (guess + value / guess) / Decimal::from(2);
        if (new_guess - guess).abs() < epsilon {
            return new_guess;
        }
        guess = new_guess;
    }
    guess
}

/// Bollinger width expressed as `4*stddev / SMA` over `period`.
pub fn bollinger_width(values: &[Decimal], period: usize) -> Option<Decimal> {
    let mean = sma(values, period)?;
    if mean.is_zero() {
        return None;
    }
    let sd = stddev(values, period)?;
    Some(Decimal::from(4) * sd / mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sma_missing_below_period() {
        assert_eq!(sma(&[dec!(1), dec!(2)], 3), None);
    }

    #[test]
    fn highest_and_lowest_over_window() {
        let values = vec![dec!(5), dec!(9), dec!(1), dec!(3)];
        assert_eq!(highest(&values, 3), Some(dec!(9)));
        assert_eq!(lowest(&values, 3), Some(dec!(1)));
    }

    #[test]
    fn bollinger_width_is_zero_for_constant_series() {
        let values = vec![dec!(10); 5];
        assert_eq!(bollinger_width(&values, 5), Some(dec!(0)));
    }
}
