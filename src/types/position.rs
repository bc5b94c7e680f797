use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::bar::Direction;
use super::setup::Mode;

/// Distinguishes positions opened by the strategy engine from ones
/// reconstructed at startup from the broker's own position list.
///
/// Kept as a distinct variant (not a stringly-typed `"UNKNOWN"`) so
/// `tradesCount` bookkeeping and replace-semantics are exhaustively matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionMode {
    Scalp,
    Swing,
    Adopted,
}

impl PositionMode {
    pub fn from_strategy_mode(mode: Mode) -> Self {
        match mode {
            Mode::Scalp => PositionMode::Scalp,
            Mode::Swing => PositionMode::Swing,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PositionInvariantError {
    #[error("position size must be >= 1, got {0}")]
    SizeTooSmall(u64),
    #[error("stop loss {sl} is not on the protective side of entry {entry} for {direction}")]
    StopLossWrongSide {
        sl: Decimal,
        entry: Decimal,
        direction: Direction,
    },
    #[error("take profit {tp} is not on the profitable side of entry {entry} for {direction}")]
    TakeProfitWrongSide {
        tp: Decimal,
        entry: Decimal,
        direction: Direction,
    },
    #[error("tp1 must be closer to entry than tp2")]
    Tp1NotCloserThanTp2,
}

/// Created exclusively by the strategy engine or adopted at startup; mutated
/// only by the position manager and reconciler; destroyed only after a
/// confirmed terminal event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub mode: PositionMode,
    pub direction: Direction,
    pub size: u64,
    pub entry: Decimal,
    pub sl: Decimal,
    pub tp1: Decimal,
    pub tp2: Decimal,
    pub tp1_done: bool,
    pub deal_id: String,
    pub deal_reference: Option<String>,
    pub opened_at: i64,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mode: PositionMode,
        direction: Direction,
        size: u64,
        entry: Decimal,
        sl: Decimal,
        tp1: Decimal,
        tp2: Decimal,
        deal_id: String,
        deal_reference: Option<String>,
        opened_at: i64,
    ) -> Result<Self, PositionInvariantError> {
        let p = Self {
            mode,
            direction,
            size,
            entry,
            sl,
            tp1,
            tp2,
            tp1_done: false,
            deal_id,
            deal_reference,
            opened_at,
        };
        p.validate()?;
        Ok(p)
    }

    pub fn validate(&self) -> Result<(), PositionInvariantError> {
        if self.size < 1 {
            return Err(PositionInvariantError::SizeTooSmall(self.size));
        }
        let sl_ok = match self.direction {
            Direction::Buy => self.sl < self.entry,
            Direction::Sell => self.sl > self.entry,
        };
        if !sl_ok {
            return Err(PositionInvariantError::StopLossWrongSide {
                sl: self.sl,
                entry: self.entry,
                direction: self.direction,
            });
        }
        for tp in [self.tp1, self.tp2] {
            let tp_ok = match self.direction {
                Direction::Buy => tp > self.entry,
                Direction::Sell => tp < self.entry,
            };
            if !tp_ok {
                return Err(PositionInvariantError::TakeProfitWrongSide {
                    tp,
                    entry: self.entry,
                    direction: self.direction,
                });
            }
        }
        let d1 = (self.tp1 - self.entry).abs();
        let d2 = (self.tp2 - self.entry).abs();
        if d1 >= d2 {
            return Err(PositionInvariantError::Tp1NotCloserThanTp2);
        }
        Ok(())
    }

    /// Exit price that closes this position: bid for BUY, ask for SELL.
    pub fn exit_price(&self, bid: Decimal, ask: Decimal) -> Decimal {
        match self.direction {
            Direction::Buy => bid,
            Direction::Sell => ask,
        }
    }

    pub fn sl_hit(&self, exit: Decimal) -> bool {
        match self.direction {
            Direction::Buy => exit <= self.sl,
            Direction::Sell => exit >= self.sl,
        }
    }

    pub fn tp1_hit(&self, exit: Decimal) -> bool {
        match self.direction {
            Direction::Buy => exit >= self.tp1,
            Direction::Sell => exit <= self.tp1,
        }
    }

    pub fn tp2_hit(&self, exit: Decimal) -> bool {
        match self.direction {
            Direction::Buy => exit >= self.tp2,
            Direction::Sell => exit <= self.tp2,
        }
    }

    /// Directional PnL fallback: `(exit - entry) * size`, signed by direction.
    pub fn directional_pnl(&self, exit: Decimal, size: u64) -> Decimal {
        let diff = match self.direction {
            Direction::Buy => exit - self.entry,
            Direction::Sell => self.entry - exit,
        };
        diff * Decimal::from(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn buy() -> Position {
        Position::new(
            PositionMode::Scalp,
            Direction::Buy,
            4,
            dec!(2010),
            dec!(2008),
            dec!(2012),
            dec!(2014),
            "D1".into(),
            None,
            0,
        )
        .unwrap()
    }

    #[test]
    fn rejects_bad_stop_loss_side() {
        let err = Position::new(
            PositionMode::Scalp,
            Direction::Buy,
            1,
            dec!(2010),
            dec!(2011),
            dec!(2012),
            dec!(2014),
            "D1".into(),
            None,
            0,
        )
        .unwrap_err();
        assert!(matches!(err, PositionInvariantError::StopLossWrongSide { .. }));
    }

    #[test]
    fn directional_pnl_signed_by_direction() {
        let p = buy();
        assert_eq!(p.directional_pnl(dec!(2012), 4), dec!(8));
    }

    #[test]
    fn sl_and_tp_hit_thresholds_for_buy() {
        let p = buy();
        assert!(p.sl_hit(dec!(2008)));
        assert!(!p.sl_hit(dec!(2008.01)));
        assert!(p.tp1_hit(dec!(2012)));
        assert!(p.tp2_hit(dec!(2014)));
    }
}
