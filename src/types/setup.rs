use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::bar::Direction;

/// Which mode a setup/position/signal belongs to. Distinct timeframes and
/// parameter sets: scalp runs off M5/M15, swing off H1/H4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Scalp,
    Swing,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Scalp => "SCALP",
            Mode::Swing => "SWING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TouchType {
    Ema50,
    Ema20,
}

/// A latent precondition state on a timeframe, awaiting a BOS trigger.
///
/// Exactly one active setup exists per mode at a time (enforced by `runtime`,
/// not here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setup {
    pub active: bool,
    pub direction: Direction,
    pub created_at: i64,
    pub pullback_extreme: Decimal,
    pub touch_type: TouchType,
    pub ref_ema: Decimal,
}

impl Setup {
    pub fn new(
        direction: Direction,
        created_at: i64,
        pullback_extreme: Decimal,
        touch_type: TouchType,
        ref_ema: Decimal,
    ) -> Self {
        Self {
            active: true,
            direction,
            created_at,
            pullback_extreme,
            touch_type,
            ref_ema,
        }
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Bars closed since this setup was created, given the tf's bar count
    /// strictly after `created_at`.
    pub fn age_bars(&self, closed_bar_times: &[i64]) -> usize {
        closed_bar_times
            .iter()
            .filter(|t| **t > self.created_at)
            .count()
    }

    /// Tracks the deepest retracement: non-increasing for BUY, non-decreasing
    /// for SELL. Returns true if the extreme moved.
    pub fn update_pullback_extreme(&mut self, candidate: Decimal) -> bool {
        let moved = match self.direction {
            Direction::Buy => candidate < self.pullback_extreme,
            Direction::Sell => candidate > self.pullback_extreme,
        };
        if moved {
            self.pullback_extreme = candidate;
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn pullback_extreme_monotonic_for_buy() {
        let mut s = Setup::new(Direction::Buy, 0, dec!(100), TouchType::Ema50, dec!(100));
        assert!(s.update_pullback_extreme(dec!(99)));
        assert_eq!(s.pullback_extreme, dec!(99));
        // A shallower low does not move a BUY setup's extreme.
        assert!(!s.update_pullback_extreme(dec!(99.5)));
        assert_eq!(s.pullback_extreme, dec!(99));
    }

    #[test]
    fn pullback_extreme_monotonic_for_sell() {
        let mut s = Setup::new(Direction::Sell, 0, dec!(100), TouchType::Ema50, dec!(100));
        assert!(s.update_pullback_extreme(dec!(101)));
        assert!(!s.update_pullback_extreme(dec!(100.5)));
        assert_eq!(s.pullback_extreme, dec!(101));
    }
}
