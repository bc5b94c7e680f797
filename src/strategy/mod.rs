pub mod bos;
pub mod order;
pub mod setup;

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::broker::{BrokerClient, CreatePositionRequest, PrecisionCache};
use crate::config::StrategyParamsManager;
use crate::indicators::{atr, atr_ratio, ema, ema_slope, rsi};
use crate::ml::MlGate;
use crate::notifications::{AlertType, NotificationManager};
use crate::persistence::PersistenceAdapters;
use crate::runtime::RuntimeState;
use crate::store::CandleStore;
use crate::types::{Direction, FeatureMap, Mode, Position, PositionMode, Signal, SignalAction, Timeframe};

const EMA_FAST: usize = 20;
const EMA_MID: usize = 50;
const EMA_TREND: usize = 200;
const ATR_PERIOD: usize = 14;
const RSI_PERIOD: usize = 14;
const SLOPE_LOOKBACK: usize = 5;

fn entry_tf(mode: Mode) -> Timeframe {
    match mode {
        Mode::Scalp => Timeframe::M5,
        Mode::Swing => Timeframe::H1,
    }
}

fn context_tf(mode: Mode) -> Timeframe {
    match mode {
        Mode::Scalp => Timeframe::M15,
        Mode::Swing => Timeframe::H4,
    }
}

/// Wires together the candle store, runtime state, hot-swappable params,
/// broker, ML gate, notifications and persistence into the entry gate
/// chain. One `StrategyEngine` serves both modes; which mode is evaluated
/// is a parameter of `evaluate`, driven by the scheduler on each new close.
pub struct StrategyEngine {
    store: Arc<CandleStore>,
    runtime: Arc<RuntimeState>,
    config: Arc<StrategyParamsManager>,
    broker: Arc<dyn BrokerClient>,
    ml: Arc<MlGate>,
    notifications: Arc<NotificationManager>,
    persistence: Arc<PersistenceAdapters>,
    precision: Arc<PrecisionCache>,
    epic: String,
}

impl StrategyEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<CandleStore>,
        runtime: Arc<RuntimeState>,
        config: Arc<StrategyParamsManager>,
        broker: Arc<dyn BrokerClient>,
        ml: Arc<MlGate>,
        notifications: Arc<NotificationManager>,
        persistence: Arc<PersistenceAdapters>,
        precision: Arc<PrecisionCache>,
        epic: String,
    ) -> Self {
        Self {
            store,
            runtime,
            config,
            broker,
            ml,
            notifications,
            persistence,
            precision,
            epic,
        }
    }

    /// Runs the full gate chain once for `mode`, emitting exactly one signal
    /// record regardless of outcome.
    pub async fn evaluate(&self, mode: Mode, now_ms: i64) -> Signal {
        let params = self.config.get().await;
        let mut features = FeatureMap::new();

        // 1. Risk gate.
        let risk = self.runtime.risk_ok(&params).await;
        if !risk.ok {
            return self
                .finish(
                    mode,
                    now_ms,
                    SignalAction::SkipRisk,
                    features,
                    &[("trades_count", risk.trades_count.to_string())],
                )
                .await;
        }

        // 2. Market status (new entries only — position management is
        // handled independently by the position manager and keeps running
        // regardless of this gate).
        let quote = match self.broker.get_price(&self.epic).await {
            Ok(q) => q,
            Err(e) => {
                warn!("strategy: get_price failed, skipping evaluation: {}", e);
                return self.finish(mode, now_ms, SignalAction::SkipMarketClosed, features, &[]).await;
            }
        };
        if !quote.status.is_tradeable() {
            return self.finish(mode, now_ms, SignalAction::SkipMarketClosed, features, &[]).await;
        }
        let spread = quote.spread();
        features.insert("spread".to_string(), decimal_to_f64(spread));

        let entry_tf = entry_tf(mode);
        let ctx_tf = context_tf(mode);
        let entry_bars = self.store.get(entry_tf).await;
        let entry_closes: Vec<Decimal> = entry_bars.iter().map(|b| b.c).collect();
        let entry_hlc: Vec<_> = entry_bars.iter().map(|b| (b.h, b.l, b.c)).collect();

        let Some(atr_entry) = atr(&entry_hlc, ATR_PERIOD) else {
            return self.finish(mode, now_ms, SignalAction::SkipChop, features, &[("reason", "atr_unavailable".into())]).await;
        };
        features.insert("atr".to_string(), decimal_to_f64(atr_entry));

        // 3. Dynamic spread gate, applied uniformly to both modes.
        let spread_cap = params.spread_max.min(params.spread_min.max(params.k_spread * atr_entry));
        if spread > spread_cap {
            return self.finish(mode, now_ms, SignalAction::SkipSpread, features, &[("spread_cap", spread_cap.to_string())]).await;
        }

        // 4. Trend filter on the context tf.
        let ctx_bars = self.store.get(ctx_tf).await;
        let ctx_closes: Vec<Decimal> = ctx_bars.iter().map(|b| b.c).collect();
        let Some(ctx_ema200) = ema(&ctx_closes, EMA_TREND) else {
            return self.finish(mode, now_ms, SignalAction::SkipTrend, features, &[("reason", "ctx_ema200_unavailable".into())]).await;
        };
        let Some(ctx_close) = ctx_closes.last().copied() else {
            return self.finish(mode, now_ms, SignalAction::SkipTrend, features, &[]).await;
        };
        let trend = if ctx_close > ctx_ema200 {
            Some(Direction::Buy)
        } else if ctx_close < ctx_ema200 {
            Some(Direction::Sell)
        } else {
            None
        };
        let Some(trend) = trend else {
            return self.finish(mode, now_ms, SignalAction::SkipTrend, features, &[]).await;
        };

        // 5. Chop filter on the entry tf.
        let Some(ema20) = ema(&entry_closes, EMA_FAST) else {
            return self.finish(mode, now_ms, SignalAction::SkipChop, features, &[]).await;
        };
        let Some(ema50) = ema(&entry_closes, EMA_MID) else {
            return self.finish(mode, now_ms, SignalAction::SkipChop, features, &[]).await;
        };
        let chop_ratio = (ema20 - ema50).abs() / atr_entry;
        features.insert("chop_ratio".to_string(), decimal_to_f64(chop_ratio));
        if chop_ratio < params.chop_min {
            return self.finish(mode, now_ms, SignalAction::SkipChop, features, &[]).await;
        }

        // 6. Setup state: if none active, attempt to create one and stop.
        let existing = self.runtime.active_setup(mode).await;
        let Some(mut current_setup) = existing else {
            let Some(last_bar) = entry_bars.last() else {
                return self.finish(mode, now_ms, SignalAction::SkipChop, features, &[]).await;
            };
            if let Some(new_setup) = setup::attempt_setup(last_bar, trend, ema20, ema50, atr_entry, &params) {
                self.runtime.set_setup(mode, new_setup).await;
            }
            return self.finish(mode, now_ms, SignalAction::Watching, features, &[]).await;
        };

        // 7. Setup still valid.
        if trend != current_setup.direction {
            self.runtime.clear_setup(mode).await;
            self.notifications
                .notify(AlertType::TrendFlip { epic: self.epic.clone(), mode: mode.as_str().to_string() })
                .await;
            return self.finish(mode, now_ms, SignalAction::SkipTrendFlip, features, &[]).await;
        }
        let aligned = match current_setup.direction {
            Direction::Buy => ema20 > ema50,
            Direction::Sell => ema20 < ema50,
        };
        if !aligned {
            self.runtime.clear_setup(mode).await;
            return self.finish(mode, now_ms, SignalAction::SkipEmaAlignment, features, &[]).await;
        }
        let current_price = entry_closes.last().copied().unwrap_or_default();
        let broken = match current_setup.direction {
            Direction::Buy => current_price < ema50 - params.invalidation_k * atr_entry,
            Direction::Sell => current_price > ema50 + params.invalidation_k * atr_entry,
        };
        if broken {
            self.runtime.clear_setup(mode).await;
            return self.finish(mode, now_ms, SignalAction::SkipMeanBreak, features, &[]).await;
        }
        let bar_times: Vec<i64> = entry_bars.iter().map(|b| b.t).collect();
        if current_setup.age_bars(&bar_times) > params.expiry_bars {
            self.runtime.clear_setup(mode).await;
            return self.finish(mode, now_ms, SignalAction::SkipExpired, features, &[]).await;
        }

        // 8. Update pullback extreme.
        if let Some(last_bar) = entry_bars.last() {
            let candidate = match current_setup.direction {
                Direction::Buy => last_bar.l,
                Direction::Sell => last_bar.h,
            };
            current_setup.update_pullback_extreme(candidate);
            self.runtime.set_setup(mode, current_setup.clone()).await;
        }

        // 9/10. H1 macro + M15 strength: scalp-only intermediate confirmations
        // (swing's entry tf is already H1, with H4 as context — there is no
        // intermediate frame to consult).
        if mode == Mode::Scalp {
            let h1_bars = self.store.get(Timeframe::H1).await;
            let h1_closes: Vec<Decimal> = h1_bars.iter().map(|b| b.c).collect();
            let (Some(h1_ema200), Some(h1_rsi), Some(h1_close)) =
                (ema(&h1_closes, EMA_TREND), rsi(&h1_closes, RSI_PERIOD), h1_closes.last().copied())
            else {
                return self.finish(mode, now_ms, SignalAction::SkipH1Macro, features, &[]).await;
            };
            let side_ok = match current_setup.direction {
                Direction::Buy => h1_close > h1_ema200,
                Direction::Sell => h1_close < h1_ema200,
            };
            let rsi_ok = h1_rsi >= params.oversold && h1_rsi <= params.overbought;
            if !side_ok || !rsi_ok {
                return self.finish(mode, now_ms, SignalAction::SkipH1Macro, features, &[]).await;
            }

            let m15_bars = self.store.get(Timeframe::M15).await;
            let m15_closes: Vec<Decimal> = m15_bars.iter().map(|b| b.c).collect();
            let m15_hlc: Vec<_> = m15_bars.iter().map(|b| (b.h, b.l, b.c)).collect();
            let (Some(m15_ema200), Some(m15_atr), Some(m15_close)) =
                (ema(&m15_closes, EMA_TREND), atr(&m15_hlc, ATR_PERIOD), m15_closes.last().copied())
            else {
                return self.finish(mode, now_ms, SignalAction::SkipM15Strength, features, &[]).await;
            };
            if m15_atr.is_zero() {
                return self.finish(mode, now_ms, SignalAction::SkipM15Strength, features, &[]).await;
            }
            let strength = (m15_close - m15_ema200).abs() / m15_atr;
            features.insert("m15_strength".to_string(), decimal_to_f64(strength));
            let slope = ema_slope(&m15_closes, EMA_TREND, SLOPE_LOOKBACK, m15_atr);
            let slope_ok = match (slope, current_setup.direction) {
                (Some(s), Direction::Buy) => s > Decimal::ZERO,
                (Some(s), Direction::Sell) => s < Decimal::ZERO,
                (None, _) => false,
            };
            if strength < params.m15_strength_min || !slope_ok {
                return self.finish(mode, now_ms, SignalAction::SkipM15Strength, features, &[]).await;
            }
        }

        // 11. BOS trigger.
        let Some(current_bar) = entry_bars.last().copied() else {
            return self.finish(mode, now_ms, SignalAction::Watching, features, &[]).await;
        };
        let history = &entry_bars[..entry_bars.len().saturating_sub(1)];
        let prev_highs: Vec<Decimal> = history.iter().map(|b| b.h).collect();
        let prev_lows: Vec<Decimal> = history.iter().map(|b| b.l).collect();
        let bos = bos::bos_trigger(&current_bar, &prev_highs, &prev_lows, current_setup.direction, atr_entry, spread, &params);
        if !bos.triggered {
            return self.finish(mode, now_ms, SignalAction::Watching, features, &[]).await;
        }

        // 12. RSI gate.
        let Some(entry_rsi) = rsi(&entry_closes, RSI_PERIOD) else {
            return self.finish(mode, now_ms, SignalAction::SkipRsi, features, &[]).await;
        };
        features.insert("rsi".to_string(), decimal_to_f64(entry_rsi));
        let rsi_ok = match current_setup.direction {
            Direction::Buy => entry_rsi >= params.rsi_buy_min,
            Direction::Sell => entry_rsi <= params.rsi_sell_max,
        };
        if !rsi_ok {
            return self.finish(mode, now_ms, SignalAction::SkipRsi, features, &[]).await;
        }

        // 13. ATR-ratio gate.
        let atr_r = atr_ratio(&entry_hlc, ATR_PERIOD, params.atr_ratio_window);
        features.insert("atr_ratio".to_string(), atr_r.map(decimal_to_f64).unwrap_or(0.0));
        let atr_ratio_ok = atr_entry >= params.atr_abs_min && atr_r.map(|r| r >= params.atr_ratio_min).unwrap_or(false);
        if !atr_ratio_ok {
            return self.finish(mode, now_ms, SignalAction::SkipAtrRatio, features, &[]).await;
        }

        // 14. Body gate.
        if current_bar.body() < params.body_k * atr_entry {
            return self.finish(mode, now_ms, SignalAction::SkipBody, features, &[]).await;
        }

        // 15. M1 micro-confirm. Insufficient history blocks rather than
        // passing through.
        let m1_closes: Vec<Decimal> = self.store.closes(Timeframe::M1).await;
        let (Some(m1_ema20), Some(m1_ema50), Some(m1_close)) =
            (ema(&m1_closes, EMA_FAST), ema(&m1_closes, EMA_MID), m1_closes.last().copied())
        else {
            return self.finish(mode, now_ms, SignalAction::SkipM1, features, &[]).await;
        };
        let m1_ok = match current_setup.direction {
            Direction::Buy => m1_ema20 > m1_ema50 && m1_close > m1_ema20,
            Direction::Sell => m1_ema20 < m1_ema50 && m1_close < m1_ema20,
        };
        if !m1_ok {
            return self.finish(mode, now_ms, SignalAction::SkipM1, features, &[]).await;
        }

        // 16. ML gate (champion only blocks; challenger is shadow-scored).
        let mut ml_version = None;
        let mut ml_score = None;
        if let Some(prediction) = self.ml.champion_score(&features).await {
            ml_version = Some(prediction.version.clone());
            ml_score = Some(prediction.score);
            let ml_ok = match current_setup.direction {
                Direction::Buy => prediction.score >= params.buy_threshold,
                Direction::Sell => prediction.score <= params.sell_threshold,
            };
            if !ml_ok {
                let mut signal = self.finish(mode, now_ms, SignalAction::SkipMl, features.clone(), &[]).await;
                signal.model_version = ml_version.clone();
                signal.model_score = ml_score;
                return signal;
            }
        }
        if let Some(shadow) = self.ml.challenger_score(&features).await {
            self.persistence
                .insert_prediction(&format!("{}-{}", self.epic, now_ms), &shadow.version, shadow.score, false, true, now_ms)
                .await;
        }

        // 17. Order issue. Deactivate setup regardless of outcome.
        self.runtime.clear_setup(mode).await;

        let entry_price = match current_setup.direction {
            Direction::Buy => quote.ask,
            Direction::Sell => quote.bid,
        };
        let sltp = order::compute_sl_tp(mode, current_setup.direction, entry_price, current_setup.pullback_extreme, atr_entry, &params);

        if order::tp1_too_tight(entry_price, sltp.tp1, spread, &params) {
            let mut signal = self.finish(mode, now_ms, SignalAction::Candidate, features, &[("reason", "tp1_too_tight".into())]).await;
            signal.model_version = ml_version;
            signal.model_score = ml_score;
            return signal;
        }

        match self.issue_order(mode, current_setup.direction, entry_price, sltp, params.position_size, now_ms).await {
            Ok(()) => {
                let mut signal = self.finish(mode, now_ms, SignalAction::Exec, features, &[]).await;
                signal.model_version = ml_version;
                signal.model_score = ml_score;
                signal
            }
            Err(e) => {
                warn!("strategy: order issue failed, leaving candidate unresolved: {}", e);
                let mut signal = self.finish(mode, now_ms, SignalAction::Candidate, features, &[("reason", "order_failed".into())]).await;
                signal.model_version = ml_version;
                signal.model_score = ml_score;
                signal
            }
        }
    }

    async fn issue_order(
        &self,
        mode: Mode,
        direction: Direction,
        entry_price: Decimal,
        sltp: order::SlTp,
        size: u64,
        now_ms: i64,
    ) -> anyhow::Result<()> {
        let places = self.precision.get_or_fetch(&self.broker, &self.epic).await?;
        let sl = crate::broker::round_for_epic(sltp.sl, places);
        let tp2 = crate::broker::round_for_epic(sltp.tp2, places);

        let deal_reference = self
            .broker
            .create_position(CreatePositionRequest {
                epic: self.epic.clone(),
                direction,
                size,
                stop_level: sl,
                profit_level: tp2,
            })
            .await?;

        let confirmation = self.broker.confirm(&deal_reference).await?;
        let deal_id = confirmation.deal_id.ok_or_else(|| anyhow::anyhow!("confirmed deal carried no dealId"))?;

        let position = Position::new(
            PositionMode::from_strategy_mode(mode),
            direction,
            size,
            entry_price,
            sl,
            sltp.tp1,
            tp2,
            deal_id,
            Some(deal_reference),
            now_ms,
        )?;

        self.runtime.add_position(position.clone()).await;
        self.notifications
            .notify(AlertType::PositionOpened {
                epic: self.epic.clone(),
                direction: direction.as_str().to_string(),
                size: size.to_string(),
                entry: entry_price.to_string(),
            })
            .await;
        info!("strategy: opened {} {} size={} entry={}", self.epic, direction, size, entry_price);
        Ok(())
    }

    async fn finish(
        &self,
        mode: Mode,
        ts: i64,
        action: SignalAction,
        features: FeatureMap,
        extra_reasons: &[(&str, String)],
    ) -> Signal {
        let mut signal = Signal::new(ts, mode, action).with_features(features);
        for (k, v) in extra_reasons {
            signal = signal.with_reason(*k, v.clone());
        }
        self.persistence.insert_signal(&self.epic, &signal).await;
        signal
    }
}

fn decimal_to_f64(d: Decimal) -> f64 {
    f64::from_str(&d.to_string()).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_and_context_tf_mapping_matches_spec_table() {
        assert_eq!(entry_tf(Mode::Scalp), Timeframe::M5);
        assert_eq!(context_tf(Mode::Scalp), Timeframe::M15);
        assert_eq!(entry_tf(Mode::Swing), Timeframe::H1);
        assert_eq!(context_tf(Mode::Swing), Timeframe::H4);
    }

    #[test]
    fn decimal_to_f64_round_trips_typical_prices() {
        use rust_decimal_macros::dec;
        assert!((decimal_to_f64(dec!(1.2345)) - 1.2345).abs() < 1e-9);
    }
}
