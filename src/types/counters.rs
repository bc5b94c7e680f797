use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Resets at the UTC day boundary. `trades_count` counts newly opened
/// positions only, never adopted or re-entered remainders.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DailyCounters {
    pub realized_pnl: Decimal,
    pub trades_count: u32,
    pub consecutive_losses: u32,
    pub start_equity: Decimal,
}

impl DailyCounters {
    pub fn new(start_equity: Decimal) -> Self {
        Self {
            realized_pnl: Decimal::ZERO,
            trades_count: 0,
            consecutive_losses: 0,
            start_equity,
        }
    }

    pub fn record_new_trade(&mut self) {
        self.trades_count += 1;
    }

    /// Adds `delta` to realized PnL; bumps or resets the consecutive-loss
    /// streak based on the strict sign of `delta`.
    pub fn update_pnl(&mut self, delta: Decimal) {
        self.realized_pnl += delta;
        if delta < Decimal::ZERO {
            self.consecutive_losses += 1;
        } else {
            self.consecutive_losses = 0;
        }
    }

    pub fn reset(&mut self, equity: Decimal) {
        self.realized_pnl = Decimal::ZERO;
        self.trades_count = 0;
        self.consecutive_losses = 0;
        self.start_equity = equity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn consecutive_losses_reset_on_first_nonnegative_pnl() {
        let mut c = DailyCounters::new(dec!(1000));
        c.update_pnl(dec!(-5));
        c.update_pnl(dec!(-3));
        assert_eq!(c.consecutive_losses, 2);
        c.update_pnl(dec!(0));
        assert_eq!(c.consecutive_losses, 0);
    }

    #[test]
    fn reset_clears_all_counters() {
        let mut c = DailyCounters::new(dec!(1000));
        c.update_pnl(dec!(-5));
        c.record_new_trade();
        c.reset(dec!(1200));
        assert_eq!(c.realized_pnl, Decimal::ZERO);
        assert_eq!(c.trades_count, 0);
        assert_eq!(c.consecutive_losses, 0);
        assert_eq!(c.start_equity, dec!(1200));
    }
}
