use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cushion applied to the "is this bar closed yet" wall-clock check.
pub const CLOSE_CUSHION_MS: i64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
        }
    }

    /// Δ(tf): fixed period of this timeframe, in milliseconds.
    pub fn period_ms(&self) -> i64 {
        match self {
            Timeframe::M1 => 60_000,
            Timeframe::M5 => 5 * 60_000,
            Timeframe::M15 => 15 * 60_000,
            Timeframe::H1 => 60 * 60_000,
            Timeframe::H4 => 4 * 60 * 60_000,
        }
    }

    /// Retention cap: enough bars for a 200-period EMA plus live context.
    pub fn retention_cap(&self) -> usize {
        match self {
            Timeframe::M1 => 300,
            Timeframe::M5 => 600,
            Timeframe::M15 => 600,
            Timeframe::H1 => 400,
            Timeframe::H4 => 300,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A closed OHLC bar. `t` is the bar-open time in epoch milliseconds.
///
/// Invariant (enforced by `store`, not here): within a timeframe sequence,
/// `t` is strictly increasing and every stored bar is closed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub t: i64,
    pub o: Decimal,
    pub h: Decimal,
    pub l: Decimal,
    pub c: Decimal,
    pub v: Decimal,
}

impl Bar {
    pub fn open_time(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.t).unwrap()
    }

    pub fn range(&self) -> Decimal {
        self.h - self.l
    }

    pub fn body(&self) -> Decimal {
        (self.c - self.o).abs()
    }

    pub fn is_bullish(&self) -> bool {
        self.c > self.o
    }

    pub fn is_bearish(&self) -> bool {
        self.c < self.o
    }

    /// True iff this bar, opened at `self.t`, is closed by wall-clock `now`.
    pub fn is_closed_at(t: i64, tf: Timeframe, now_ms: i64) -> bool {
        now_ms - t >= tf.period_ms() - CLOSE_CUSHION_MS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Market tradability status reported by the brokerage for the epic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
    Tradeable,
    Closed,
    EditsOnly,
    Offline,
    Suspended,
}

impl MarketStatus {
    pub fn is_tradeable(&self) -> bool {
        matches!(self, MarketStatus::Tradeable)
    }
}

/// Current bid/ask quote for the epic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub status: MarketStatus,
}

impl Quote {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn bar_is_closed_respects_cushion() {
        let t = 1_000_000_i64;
        let tf = Timeframe::M5;
        // Exactly at the period boundary minus cushion: closed.
        assert!(Bar::is_closed_at(t, tf, t + tf.period_ms() - CLOSE_CUSHION_MS));
        // One ms before the cushion boundary: not yet closed.
        assert!(!Bar::is_closed_at(t, tf, t + tf.period_ms() - CLOSE_CUSHION_MS - 1));
    }

    #[test]
    fn quote_mid_and_spread() {
        let q = Quote {
            bid: dec!(100.0),
            ask: dec!(100.2),
            status: MarketStatus::Tradeable,
        };
        assert_eq!(q.mid(), dec!(100.1));
        assert_eq!(q.spread(), dec!(0.2));
    }
}
