use std::sync::Arc;

use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::types::{Bar, Mode, Signal, Timeframe};

/// Every adapter is loss-tolerant: a disabled or failing sink is logged and
/// treated as success from the caller's perspective. The decision path must
/// never await persistence directly — callers should `tokio::spawn` these
/// calls rather than inlining them in the hot path.
pub struct PersistenceAdapters {
    pool: Option<SqlitePool>,
    quote_buffer: Mutex<Vec<QuoteTick>>,
}

#[derive(Debug, Clone)]
pub struct QuoteTick {
    pub epic: String,
    pub ts: i64,
    pub bid: Decimal,
    pub ask: Decimal,
    pub status: String,
}

impl PersistenceAdapters {
    pub async fn connect(database_url: Option<&str>) -> Arc<Self> {
        let pool = match database_url {
            Some(url) => match SqlitePoolOptions::new().max_connections(5).connect(url).await {
                Ok(pool) => {
                    if let Err(e) = run_migrations(&pool).await {
                        error!("persistence: migration failed, disabling sink: {}", e);
                        None
                    } else {
                        Some(pool)
                    }
                }
                Err(e) => {
                    error!("persistence: connect failed, disabling sink: {}", e);
                    None
                }
            },
            None => None,
        };

        Arc::new(Self {
            pool,
            quote_buffer: Mutex::new(Vec::new()),
        })
    }

    pub fn disabled() -> Arc<Self> {
        Arc::new(Self {
            pool: None,
            quote_buffer: Mutex::new(Vec::new()),
        })
    }

    /// `(epic, tf, ts)` is a composite unique key absorbing retries.
    pub async fn insert_candle(&self, epic: &str, tf: Timeframe, bar: &Bar) {
        let Some(pool) = &self.pool else { return };
        let result = sqlx::query(
            "INSERT INTO candles (epic, tf, ts, o, h, l, c, v) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(epic, tf, ts) DO NOTHING",
        )
        .bind(epic)
        .bind(tf.as_str())
        .bind(bar.t)
        .bind(bar.o.to_string())
        .bind(bar.h.to_string())
        .bind(bar.l.to_string())
        .bind(bar.c.to_string())
        .bind(bar.v.to_string())
        .execute(pool)
        .await;

        if let Err(e) = result {
            warn!("persistence: insert_candle failed (swallowed): {}", e);
        }
    }

    pub async fn insert_signal(&self, epic: &str, signal: &Signal) {
        let Some(pool) = &self.pool else { return };
        let reasons = serde_json::to_string(&signal.reasons).unwrap_or_default();
        let features = serde_json::to_string(&signal.features).unwrap_or_default();
        let id = uuid::Uuid::new_v4().to_string();
        let result = sqlx::query(
            "INSERT INTO signals (id, epic, ts, mode, action, reasons, features, model_version, model_score)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(epic)
        .bind(signal.ts)
        .bind(signal.mode.as_str())
        .bind(signal.action.as_str())
        .bind(reasons)
        .bind(features)
        .bind(&signal.model_version)
        .bind(signal.model_score)
        .execute(pool)
        .await;

        if let Err(e) = result {
            warn!("persistence: insert_signal failed (swallowed): {}", e);
        }
    }

    /// Records the champion's (or challenger's) shadow prediction alongside
    /// the signal it was computed for.
    pub async fn insert_prediction(
        &self,
        signal_id: &str,
        model_version: &str,
        p_win: f64,
        acted: bool,
        shadow: bool,
        ts: i64,
    ) {
        let Some(pool) = &self.pool else { return };
        let id = uuid::Uuid::new_v4().to_string();
        let result = sqlx::query(
            "INSERT INTO predictions (id, signal_id, model_id, p_win, acted, shadow, ts)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(signal_id)
        .bind(model_version)
        .bind(p_win)
        .bind(acted)
        .bind(shadow)
        .bind(ts)
        .execute(pool)
        .await;

        if let Err(e) = result {
            warn!("persistence: insert_prediction failed (swallowed): {}", e);
        }
    }

    /// `dealId` is the unique key for trades, absorbing reconciler retries.
    pub async fn upsert_trade(
        &self,
        deal_id: &str,
        epic: &str,
        direction: &str,
        size: u64,
        entry: Decimal,
        close_reason: Option<&str>,
        status: &str,
    ) {
        let Some(pool) = &self.pool else { return };
        let result = sqlx::query(
            "INSERT INTO trades (deal_id, epic, direction, size, entry, close_reason, status)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(deal_id) DO UPDATE SET close_reason = excluded.close_reason, status = excluded.status",
        )
        .bind(deal_id)
        .bind(epic)
        .bind(direction)
        .bind(size as i64)
        .bind(entry.to_string())
        .bind(close_reason)
        .bind(status)
        .execute(pool)
        .await;

        if let Err(e) = result {
            warn!("persistence: upsert_trade failed (swallowed): {}", e);
        }
    }

    /// Quote ticks are buffered in memory and flushed as one batch per
    /// scheduler interval rather than inserted one at a time.
    pub async fn buffer_quote(&self, tick: QuoteTick) {
        self.quote_buffer.lock().await.push(tick);
    }

    pub async fn flush_quotes(&self) {
        let Some(pool) = &self.pool else {
            self.quote_buffer.lock().await.clear();
            return;
        };
        let batch: Vec<QuoteTick> = std::mem::take(&mut *self.quote_buffer.lock().await);
        for tick in batch {
            let result = sqlx::query(
                "INSERT INTO quotes (epic, ts, bid, ask, spread, status) VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(epic, ts) DO NOTHING",
            )
            .bind(&tick.epic)
            .bind(tick.ts)
            .bind(tick.bid.to_string())
            .bind(tick.ask.to_string())
            .bind((tick.ask - tick.bid).to_string())
            .bind(&tick.status)
            .execute(pool)
            .await;

            if let Err(e) = result {
                warn!("persistence: flush_quotes failed (swallowed): {}", e);
            }
        }
    }
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS candles (
            epic TEXT NOT NULL,
            tf TEXT NOT NULL,
            ts INTEGER NOT NULL,
            o TEXT NOT NULL,
            h TEXT NOT NULL,
            l TEXT NOT NULL,
            c TEXT NOT NULL,
            v TEXT NOT NULL,
            UNIQUE(epic, tf, ts)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS signals (
            id TEXT PRIMARY KEY,
            epic TEXT NOT NULL,
            ts INTEGER NOT NULL,
            mode TEXT NOT NULL,
            action TEXT NOT NULL,
            reasons TEXT NOT NULL,
            features TEXT NOT NULL,
            model_version TEXT,
            model_score REAL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS predictions (
            id TEXT PRIMARY KEY,
            signal_id TEXT NOT NULL,
            model_id TEXT NOT NULL,
            p_win REAL NOT NULL,
            acted INTEGER NOT NULL,
            shadow INTEGER NOT NULL,
            ts INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS trades (
            deal_id TEXT PRIMARY KEY,
            epic TEXT NOT NULL,
            direction TEXT NOT NULL,
            size INTEGER NOT NULL,
            entry TEXT NOT NULL,
            close_reason TEXT,
            status TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS quotes (
            epic TEXT NOT NULL,
            ts INTEGER NOT NULL,
            bid TEXT NOT NULL,
            ask TEXT NOT NULL,
            spread TEXT NOT NULL,
            status TEXT NOT NULL,
            UNIQUE(epic, ts)
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_sink_swallows_every_write() {
        let sink = PersistenceAdapters::disabled();
        sink.insert_candle(
            "EURUSD",
            Timeframe::M5,
            &Bar {
                t: 0,
                o: Decimal::ONE,
                h: Decimal::ONE,
                l: Decimal::ONE,
                c: Decimal::ONE,
                v: Decimal::ONE,
            },
        )
        .await;
        sink.buffer_quote(QuoteTick {
            epic: "EURUSD".into(),
            ts: 0,
            bid: Decimal::ONE,
            ask: Decimal::ONE,
            status: "TRADEABLE".into(),
        })
        .await;
        sink.flush_quotes().await;
        // No panic, nothing to assert beyond "this never blocks or errors".
    }

    #[test]
    fn mode_as_str_round_trips_into_signal_rows() {
        assert_eq!(Mode::Scalp.as_str(), "SCALP");
        assert_eq!(Mode::Swing.as_str(), "SWING");
    }

    #[allow(dead_code)]
    fn unused_row_helper(row: &sqlx::sqlite::SqliteRow) -> i64 {
        row.get::<i64, _>(0)
    }
}
