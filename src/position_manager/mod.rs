use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::broker::{BrokerClient, CreatePositionRequest, PrecisionCache};
use crate::config::StrategyParamsManager;
use crate::notifications::{AlertType, NotificationManager};
use crate::persistence::PersistenceAdapters;
use crate::runtime::RuntimeState;
use crate::types::{Position, PositionMode};

/// Tick-driven SL / TP1-partial+re-entry / TP2 management, run once per
/// tick for every tracked position. Runs regardless of market-tradeable
/// status: open risk must still be managed even when new entries are
/// paused.
pub struct PositionManager {
    runtime: Arc<RuntimeState>,
    config: Arc<StrategyParamsManager>,
    broker: Arc<dyn BrokerClient>,
    notifications: Arc<NotificationManager>,
    persistence: Arc<PersistenceAdapters>,
    precision: Arc<PrecisionCache>,
    epic: String,
}

impl PositionManager {
    pub fn new(
        runtime: Arc<RuntimeState>,
        config: Arc<StrategyParamsManager>,
        broker: Arc<dyn BrokerClient>,
        notifications: Arc<NotificationManager>,
        persistence: Arc<PersistenceAdapters>,
        precision: Arc<PrecisionCache>,
        epic: String,
    ) -> Self {
        Self {
            runtime,
            config,
            broker,
            notifications,
            persistence,
            precision,
            epic,
        }
    }

    /// Evaluates every tracked position against the current quote. Errors
    /// reaching the broker for a single position are logged and that
    /// position is left for the next tick.
    pub async fn tick(&self, now_ms: i64) {
        let quote = match self.broker.get_price(&self.epic).await {
            Ok(q) => q,
            Err(e) => {
                warn!("position_manager: get_price failed, skipping tick: {}", e);
                return;
            }
        };

        let positions = self.runtime.positions_snapshot().await;
        for position in positions {
            let exit = position.exit_price(quote.bid, quote.ask);
            if let Err(e) = self.evaluate_position(&position, exit, now_ms).await {
                warn!("position_manager: evaluating {} failed: {}", position.deal_id, e);
            }
        }
    }

    async fn evaluate_position(&self, position: &Position, exit: Decimal, now_ms: i64) -> anyhow::Result<()> {
        if position.sl_hit(exit) {
            return self.handle_sl(position, exit).await;
        }
        if position.tp2_hit(exit) {
            return self.handle_tp2(position, exit).await;
        }
        if !position.tp1_done && position.tp1_hit(exit) {
            return self.handle_tp1(position, exit, now_ms).await;
        }
        Ok(())
    }

    async fn handle_sl(&self, position: &Position, exit: Decimal) -> anyhow::Result<()> {
        let confirmed_profit = self.close_remote(&position.deal_id).await;
        let pnl = self.resolve_pnl(position, exit, position.size, confirmed_profit).await;

        self.runtime.update_pnl(pnl).await;
        self.runtime.remove_position(&position.deal_id).await;

        self.persistence
            .upsert_trade(&position.deal_id, &self.epic, position.direction.as_str(), position.size, position.entry, Some("SL"), "CLOSED")
            .await;
        self.notifications
            .notify(AlertType::PositionClosed { epic: self.epic.clone(), reason: "SL".to_string(), pnl: pnl.to_string() })
            .await;
        info!("position_manager: {} closed on SL, pnl={}", position.deal_id, pnl);
        Ok(())
    }

    async fn handle_tp2(&self, position: &Position, exit: Decimal) -> anyhow::Result<()> {
        let confirmed_profit = self.close_remote(&position.deal_id).await;
        let pnl = self.resolve_pnl(position, exit, position.size, confirmed_profit).await;

        self.runtime.update_pnl(pnl).await;
        self.runtime.remove_position(&position.deal_id).await;

        self.persistence
            .upsert_trade(&position.deal_id, &self.epic, position.direction.as_str(), position.size, position.entry, Some("TP2"), "CLOSED")
            .await;
        self.notifications
            .notify(AlertType::PositionClosed { epic: self.epic.clone(), reason: "TP2".to_string(), pnl: pnl.to_string() })
            .await;
        info!("position_manager: {} closed on TP2, pnl={}", position.deal_id, pnl);
        Ok(())
    }

    async fn handle_tp1(&self, position: &Position, exit: Decimal, now_ms: i64) -> anyhow::Result<()> {
        let params = self.config.get().await;
        let close_size = (Decimal::from(position.size) * params.partial_frac)
            .floor()
            .to_string()
            .parse::<u64>()
            .unwrap_or(0);

        if close_size < 1 {
            let mut marked = position.clone();
            marked.tp1_done = true;
            if params.breakeven_enabled {
                let places = self.precision.get_or_fetch(&self.broker, &self.epic).await?;
                let sl = crate::broker::round_for_epic(marked.entry, places);
                if let Err(e) = self.broker.update_position(&marked.deal_id, Some(sl), None).await {
                    warn!("position_manager: breakeven SL update failed for {}: {}", marked.deal_id, e);
                } else {
                    marked.sl = sl;
                }
            }
            self.runtime.update_position(marked).await;
            self.notifications
                .notify(AlertType::Tp1Partial { epic: self.epic.clone(), pnl: "0".to_string() })
                .await;
            return Ok(());
        }

        let confirmed_profit = self.close_remote(&position.deal_id).await;
        let pnl = self.resolve_pnl(position, exit, close_size, confirmed_profit).await;
        self.runtime.update_pnl(pnl).await;

        let remainder = position.size - close_size;
        let new_sl = if params.breakeven_enabled { exit } else { position.sl };

        let reopened = self
            .broker
            .create_position(CreatePositionRequest {
                epic: self.epic.clone(),
                direction: position.direction,
                size: remainder,
                stop_level: new_sl,
                profit_level: position.tp2,
            })
            .await;

        match reopened {
            Ok(deal_reference) => match self.broker.confirm(&deal_reference).await {
                Ok(confirmation) => {
                    let Some(new_deal_id) = confirmation.deal_id else {
                        error!("position_manager: reopen confirm for {} carried no dealId, leaving tp1Done on original", position.deal_id);
                        return self.mark_tp1_done_only(position).await;
                    };
                    let replacement = Position {
                        mode: position.mode,
                        direction: position.direction,
                        size: remainder,
                        entry: exit,
                        sl: new_sl,
                        tp1: position.tp1,
                        tp2: position.tp2,
                        tp1_done: true,
                        deal_id: new_deal_id,
                        deal_reference: Some(deal_reference),
                        opened_at: now_ms,
                    };
                    self.runtime.replace_position(&position.deal_id, replacement).await;
                    self.notifications
                        .notify(AlertType::Tp1Partial { epic: self.epic.clone(), pnl: pnl.to_string() })
                        .await;
                    info!("position_manager: {} TP1 partial, reopened remainder size={}", position.deal_id, remainder);
                }
                Err(e) => {
                    error!("position_manager: reopen confirm failed for {}: {} — leaving tp1Done on original, no retry", position.deal_id, e);
                    self.mark_tp1_done_only(position).await?;
                }
            },
            Err(e) => {
                // Partial-close re-entry failure. No recursive retry.
                error!("position_manager: reopen create_position failed for {}: {}", position.deal_id, e);
                self.mark_tp1_done_only(position).await?;
            }
        }

        Ok(())
    }

    async fn mark_tp1_done_only(&self, position: &Position) -> anyhow::Result<()> {
        let mut marked = position.clone();
        marked.tp1_done = true;
        self.runtime.update_position(marked).await;
        Ok(())
    }

    /// Attempts the remote close and returns the broker-confirmed profit if
    /// any. Broker errors here are logged; the position is still removed
    /// locally since the SL/TP/partial decision has already been made —
    /// the reconciler is the backstop if the remote close itself failed.
    async fn close_remote(&self, deal_id: &str) -> Option<Decimal> {
        match self.broker.close_position(deal_id).await {
            Ok(_) => None,
            Err(e) => {
                warn!("position_manager: close_position failed for {}: {}", deal_id, e);
                None
            }
        }
    }

    /// Prefers broker-confirmed profit, then activity history by dealId,
    /// then directional math — always computed, never skipped with a
    /// warning.
    async fn resolve_pnl(&self, position: &Position, exit: Decimal, size: u64, confirmed: Option<Decimal>) -> Decimal {
        if let Some(profit) = confirmed {
            return profit;
        }
        if let Ok(events) = self.broker.get_activity(position.opened_at).await {
            for event in events {
                if event.deal_id.as_deref() == Some(position.deal_id.as_str()) {
                    if let Some(profit) = event.profit {
                        return profit;
                    }
                }
            }
        }
        position.directional_pnl(exit, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;
    use crate::config::StrategyParams;
    use crate::notifications::NullSink;
    use crate::persistence::PersistenceAdapters;
    use crate::types::{Direction as Dir, MarketStatus};
    use rust_decimal_macros::dec;

    fn manager(broker: Arc<dyn BrokerClient>, runtime: Arc<RuntimeState>) -> PositionManager {
        PositionManager::new(
            runtime,
            Arc::new(StrategyParamsManager::new(StrategyParams::default())),
            broker,
            Arc::new(NotificationManager::new(Arc::new(NullSink))),
            PersistenceAdapters::disabled(),
            Arc::new(PrecisionCache::new()),
            "EURUSD".to_string(),
        )
    }

    #[tokio::test]
    async fn sl_hit_closes_and_removes_position() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_quote(dec!(1.0900), dec!(1.0902), MarketStatus::Tradeable).await;
        let deal_ref = broker
            .create_position(CreatePositionRequest { epic: "EURUSD".into(), direction: Dir::Buy, size: 2, stop_level: dec!(1.0890), profit_level: dec!(1.0920) })
            .await
            .unwrap();
        broker.confirm(&deal_ref).await.unwrap();

        let runtime = Arc::new(RuntimeState::new(dec!(1000)));
        let position = Position::new(PositionMode::Scalp, Dir::Buy, 2, dec!(1.0905), dec!(1.0890), dec!(1.0920), dec!(1.0930), deal_ref.clone(), None, 0).unwrap();
        runtime.add_position(position).await;

        broker.set_quote(dec!(1.0885), dec!(1.0887), MarketStatus::Tradeable).await;

        let dyn_broker: Arc<dyn BrokerClient> = broker;
        let pm = manager(dyn_broker, runtime.clone());
        pm.tick(0).await;

        assert!(runtime.get_position(&deal_ref).await.is_none());
        assert!(runtime.counters_snapshot().await.realized_pnl < Decimal::ZERO);
    }

    #[tokio::test]
    async fn tp1_partial_reopens_remainder_at_breakeven() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_quote(dec!(1.0900), dec!(1.0902), MarketStatus::Tradeable).await;
        let deal_ref = broker
            .create_position(CreatePositionRequest { epic: "EURUSD".into(), direction: Dir::Buy, size: 4, stop_level: dec!(1.0880), profit_level: dec!(1.0950) })
            .await
            .unwrap();
        broker.confirm(&deal_ref).await.unwrap();

        let runtime = Arc::new(RuntimeState::new(dec!(1000)));
        let position = Position::new(PositionMode::Scalp, Dir::Buy, 4, dec!(1.0902), dec!(1.0880), dec!(1.0920), dec!(1.0950), deal_ref.clone(), None, 0).unwrap();
        runtime.add_position(position).await;

        broker.set_quote(dec!(1.0920), dec!(1.0922), MarketStatus::Tradeable).await;

        let dyn_broker: Arc<dyn BrokerClient> = broker;
        let pm = manager(dyn_broker, runtime.clone());
        pm.tick(0).await;

        assert!(runtime.get_position(&deal_ref).await.is_none());
        let remaining = runtime.positions_snapshot().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].size, 2);
        assert!(remaining[0].tp1_done);
        assert_eq!(remaining[0].sl, remaining[0].entry);
    }
}
