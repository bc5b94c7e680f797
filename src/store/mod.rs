use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::broker::{BrokerClient, BrokerError};
use crate::types::{Bar, Timeframe};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Per-timeframe ordered sequence of closed bars, with incremental fetch
/// and in-progress-bar detection. Arrival order equals `t` order; no
/// duplicate `t`; the in-progress bar is never stored.
pub struct CandleStore {
    broker: Arc<dyn BrokerClient>,
    epic: String,
    bars: RwLock<HashMap<Timeframe, Vec<Bar>>>,
    last_closed_at: RwLock<HashMap<Timeframe, i64>>,
}

fn resolution_for(tf: Timeframe) -> &'static str {
    match tf {
        Timeframe::M1 => "MINUTE",
        Timeframe::M5 => "MINUTE_5",
        Timeframe::M15 => "MINUTE_15",
        Timeframe::H1 => "HOUR",
        Timeframe::H4 => "HOUR_4",
    }
}

impl CandleStore {
    pub fn new(broker: Arc<dyn BrokerClient>, epic: String) -> Self {
        Self {
            broker,
            epic,
            bars: RwLock::new(HashMap::new()),
            last_closed_at: RwLock::new(HashMap::new()),
        }
    }

    fn drop_in_progress(mut bars: Vec<Bar>, tf: Timeframe, now_ms: i64) -> Vec<Bar> {
        bars.sort_by_key(|b| b.t);
        if let Some(last) = bars.last() {
            if !Bar::is_closed_at(last.t, tf, now_ms) {
                bars.pop();
            }
        }
        bars
    }

    /// Fetches `max+1` most recent bars, drops the trailing in-progress bar,
    /// sorts by `t`, and seeds the store plus `lastClosedAt[tf]`.
    pub async fn load_history(
        &self,
        tf: Timeframe,
        max: u32,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        let raw = self
            .broker
            .get_candles(&self.epic, resolution_for(tf), max + 1)
            .await?;
        let bars: Vec<Bar> = raw
            .into_iter()
            .map(|c| Bar {
                t: c.t,
                o: c.o,
                h: c.h,
                l: c.l,
                c: c.c,
                v: c.v,
            })
            .collect();
        let mut closed = Self::drop_in_progress(bars, tf, now_ms);
        let cap = tf.retention_cap();
        if closed.len() > cap {
            let excess = closed.len() - cap;
            closed.drain(0..excess);
        }

        let last_t = closed.last().map(|b| b.t);
        self.bars.write().await.insert(tf, closed);
        if let Some(t) = last_t {
            self.last_closed_at.write().await.insert(tf, t);
        }
        Ok(())
    }

    /// Fetches a small trailing window, drops the in-progress bar, appends
    /// only bars strictly newer than `lastClosedAt[tf]`, trims to the
    /// retention cap, and returns whether at least one new bar was appended.
    pub async fn update(&self, tf: Timeframe, now_ms: i64) -> Result<bool, StoreError> {
        const WINDOW: u32 = 7;
        let raw = self
            .broker
            .get_candles(&self.epic, resolution_for(tf), WINDOW)
            .await?;
        let fetched: Vec<Bar> = raw
            .into_iter()
            .map(|c| Bar {
                t: c.t,
                o: c.o,
                h: c.h,
                l: c.l,
                c: c.c,
                v: c.v,
            })
            .collect();
        let closed = Self::drop_in_progress(fetched, tf, now_ms);

        let watermark = self.last_closed_at.read().await.get(&tf).copied().unwrap_or(i64::MIN);
        let mut new_bars: Vec<Bar> = closed.into_iter().filter(|b| b.t > watermark).collect();
        new_bars.sort_by_key(|b| b.t);

        if new_bars.is_empty() {
            return Ok(false);
        }

        let mut bars = self.bars.write().await;
        let entry = bars.entry(tf).or_default();
        entry.extend(new_bars.iter().cloned());

        let cap = tf.retention_cap();
        if entry.len() > cap {
            let excess = entry.len() - cap;
            entry.drain(0..excess);
        }

        if let Some(last) = new_bars.last() {
            self.last_closed_at.write().await.insert(tf, last.t);
        }

        Ok(true)
    }

    /// Read-only snapshot of the current sequence for `tf`.
    pub async fn get(&self, tf: Timeframe) -> Vec<Bar> {
        self.bars.read().await.get(&tf).cloned().unwrap_or_default()
    }

    pub async fn closes(&self, tf: Timeframe) -> Vec<rust_decimal::Decimal> {
        self.get(tf).await.iter().map(|b| b.c).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerCandle, BrokerPrice, CreatePositionRequest, DealConfirmation, RemotePosition, SessionTokens, ActivityEvent};
    use crate::types::MarketStatus;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex as StdMutex;

    struct FakeBroker {
        candles: StdMutex<Vec<BrokerCandle>>,
    }

    #[async_trait]
    impl BrokerClient for FakeBroker {
        async fn create_session(&self) -> Result<SessionTokens, BrokerError> {
            unimplemented!()
        }
        async fn get_candles(&self, _epic: &str, _resolution: &str, max: u32) -> Result<Vec<BrokerCandle>, BrokerError> {
            let all = self.candles.lock().unwrap().clone();
            let take = (max as usize).min(all.len());
            Ok(all[all.len() - take..].to_vec())
        }
        async fn get_price(&self, _epic: &str) -> Result<BrokerPrice, BrokerError> {
            Ok(BrokerPrice { bid: dec!(1), ask: dec!(1), status: MarketStatus::Tradeable })
        }
        async fn create_position(&self, _req: CreatePositionRequest) -> Result<String, BrokerError> {
            unimplemented!()
        }
        async fn confirm(&self, _deal_reference: &str) -> Result<DealConfirmation, BrokerError> {
            unimplemented!()
        }
        async fn close_position(&self, _deal_id: &str) -> Result<String, BrokerError> {
            unimplemented!()
        }
        async fn update_position(&self, _deal_id: &str, _sl: Option<rust_decimal::Decimal>, _tp: Option<rust_decimal::Decimal>) -> Result<(), BrokerError> {
            unimplemented!()
        }
        async fn get_positions(&self) -> Result<Vec<RemotePosition>, BrokerError> {
            unimplemented!()
        }
        async fn get_position(&self, _deal_id: &str) -> Result<Option<RemotePosition>, BrokerError> {
            unimplemented!()
        }
        async fn get_activity(&self, _from_ts: i64) -> Result<Vec<ActivityEvent>, BrokerError> {
            unimplemented!()
        }
        async fn decimal_places(&self, _epic: &str) -> Result<u32, BrokerError> {
            Ok(4)
        }
        async fn refresh_session(&self) -> Result<(), BrokerError> {
            unimplemented!()
        }
    }

    fn candle(t: i64) -> BrokerCandle {
        BrokerCandle { t, o: dec!(1), h: dec!(1.1), l: dec!(0.9), c: dec!(1.05), v: dec!(10) }
    }

    #[tokio::test]
    async fn load_history_drops_in_progress_bar() {
        let tf = Timeframe::M5;
        let period = tf.period_ms();
        let bars = vec![candle(0), candle(period), candle(2 * period)];
        let broker: Arc<dyn BrokerClient> = Arc::new(FakeBroker { candles: StdMutex::new(bars) });
        let store = CandleStore::new(broker, "TEST".into());

        // "now" lands inside the third bar's period: it must be dropped.
        let now = 2 * period + 1000;
        store.load_history(tf, 10, now).await.unwrap();
        let got = store.get(tf).await;
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].t, 0);
        assert_eq!(got[1].t, period);
    }

    #[tokio::test]
    async fn update_after_load_history_with_unchanged_remote_appends_nothing() {
        let tf = Timeframe::M5;
        let period = tf.period_ms();
        let bars = vec![candle(0), candle(period), candle(2 * period)];
        let broker: Arc<dyn BrokerClient> = Arc::new(FakeBroker { candles: StdMutex::new(bars) });
        let store = CandleStore::new(broker, "TEST".into());
        let now = 2 * period + 1000;
        store.load_history(tf, 10, now).await.unwrap();

        let appended = store.update(tf, now).await.unwrap();
        assert!(!appended);
        assert_eq!(store.get(tf).await.len(), 2);
    }

    #[tokio::test]
    async fn update_appends_strictly_increasing_new_closes() {
        let tf = Timeframe::M1;
        let period = tf.period_ms();
        let bars = vec![candle(0), candle(period), candle(2 * period), candle(3 * period)];
        let broker: Arc<dyn BrokerClient> = Arc::new(FakeBroker { candles: StdMutex::new(bars) });
        let store = CandleStore::new(broker, "TEST".into());
        let now = period + 1000;
        store.load_history(tf, 10, now).await.unwrap();
        assert_eq!(store.get(tf).await.len(), 1);

        let now2 = 3 * period + 1000;
        let appended = store.update(tf, now2).await.unwrap();
        assert!(appended);
        let got = store.get(tf).await;
        for w in got.windows(2) {
            assert!(w[0].t < w[1].t);
        }
    }
}
