use std::collections::HashMap;

use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::config::StrategyParams;
use crate::types::{DailyCounters, Mode, Position, Setup};

/// Single owner of process-global mutable state: daily counters, current
/// setups (one per mode), and tracked positions. Exposes only operations,
/// never raw field access, so every mutation goes through an invariant.
pub struct RuntimeState {
    counters: RwLock<DailyCounters>,
    setups: RwLock<HashMap<Mode, Setup>>,
    positions: RwLock<HashMap<String, Position>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskAssessment {
    pub ok: bool,
    pub trades_count: u32,
    pub max_trades: u32,
    pub realized_pnl_blocked: bool,
    pub consec_losses_blocked: bool,
}

impl RuntimeState {
    pub fn new(start_equity: Decimal) -> Self {
        Self {
            counters: RwLock::new(DailyCounters::new(start_equity)),
            setups: RwLock::new(HashMap::new()),
            positions: RwLock::new(HashMap::new()),
        }
    }

    /// `tradesCount < maxTrades ∧ realizedPnl > -dailyLossLimit ∧
    /// consecutiveLosses < maxConsec`.
    pub async fn risk_ok(&self, params: &StrategyParams) -> RiskAssessment {
        let counters = self.counters.read().await;
        let realized_pnl_blocked = counters.realized_pnl <= -params.daily_loss_limit;
        let consec_losses_blocked = counters.consecutive_losses >= params.max_consec_losses;
        let trades_blocked = counters.trades_count >= params.max_trades;
        RiskAssessment {
            ok: !trades_blocked && !realized_pnl_blocked && !consec_losses_blocked,
            trades_count: counters.trades_count,
            max_trades: params.max_trades,
            realized_pnl_blocked,
            consec_losses_blocked,
        }
    }

    /// A newly opened position: increments `tradesCount`.
    pub async fn add_position(&self, position: Position) {
        let mut counters = self.counters.write().await;
        counters.record_new_trade();
        drop(counters);
        self.positions.write().await.insert(position.deal_id.clone(), position);
    }

    /// A position reconstructed at startup from the broker's own list:
    /// does not count toward `tradesCount`.
    pub async fn adopt_position(&self, position: Position) {
        self.positions.write().await.insert(position.deal_id.clone(), position);
    }

    /// Swaps a position for its partial-close follower, preserving
    /// `tradesCount` (no new trade opened).
    pub async fn replace_position(&self, old_deal_id: &str, new_position: Position) {
        let mut positions = self.positions.write().await;
        positions.remove(old_deal_id);
        positions.insert(new_position.deal_id.clone(), new_position);
    }

    pub async fn remove_position(&self, deal_id: &str) -> Option<Position> {
        self.positions.write().await.remove(deal_id)
    }

    pub async fn get_position(&self, deal_id: &str) -> Option<Position> {
        self.positions.read().await.get(deal_id).cloned()
    }

    pub async fn positions_snapshot(&self) -> Vec<Position> {
        self.positions.read().await.values().cloned().collect()
    }

    pub async fn update_position(&self, position: Position) {
        self.positions.write().await.insert(position.deal_id.clone(), position);
    }

    /// Adds `delta` to realized PnL and updates the consecutive-loss streak
    /// by the strict sign of `delta`.
    pub async fn update_pnl(&self, delta: Decimal) {
        self.counters.write().await.update_pnl(delta);
    }

    pub async fn counters_snapshot(&self) -> DailyCounters {
        *self.counters.read().await
    }

    pub async fn active_setup(&self, mode: Mode) -> Option<Setup> {
        self.setups.read().await.get(&mode).cloned()
    }

    pub async fn set_setup(&self, mode: Mode, setup: Setup) {
        self.setups.write().await.insert(mode, setup);
    }

    pub async fn clear_setup(&self, mode: Mode) {
        self.setups.write().await.remove(&mode);
    }

    /// UTC day boundary: zeros counters, clears every setup, records the
    /// new `startEquity`.
    pub async fn daily_reset(&self, equity: Decimal) {
        self.counters.write().await.reset(equity);
        self.setups.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params() -> StrategyParams {
        StrategyParams {
            max_trades: 2,
            daily_loss_limit: dec!(100),
            max_consec_losses: 2,
            ..StrategyParams::default()
        }
    }

    #[tokio::test]
    async fn risk_ok_blocks_on_max_trades() {
        let state = RuntimeState::new(dec!(1000));
        let p = params();
        assert!(state.risk_ok(&p).await.ok);
        for i in 0..2 {
            let pos = test_position(&format!("D{i}"));
            state.add_position(pos).await;
        }
        assert!(!state.risk_ok(&p).await.ok);
    }

    #[tokio::test]
    async fn adopt_and_replace_do_not_increment_trades_count() {
        let state = RuntimeState::new(dec!(1000));
        state.adopt_position(test_position("D1")).await;
        assert_eq!(state.counters_snapshot().await.trades_count, 0);

        state.replace_position("D1", test_position("D2")).await;
        assert_eq!(state.counters_snapshot().await.trades_count, 0);
        assert!(state.get_position("D1").await.is_none());
        assert!(state.get_position("D2").await.is_some());
    }

    #[tokio::test]
    async fn daily_reset_clears_setups_and_counters() {
        let state = RuntimeState::new(dec!(1000));
        state.add_position(test_position("D1")).await;
        state.update_pnl(dec!(-10)).await;
        state
            .set_setup(
                Mode::Scalp,
                Setup::new(crate::types::Direction::Buy, 0, dec!(1), crate::types::TouchType::Ema50, dec!(1)),
            )
            .await;

        state.daily_reset(dec!(1200)).await;

        assert_eq!(state.counters_snapshot().await.trades_count, 0);
        assert_eq!(state.counters_snapshot().await.start_equity, dec!(1200));
        assert!(state.active_setup(Mode::Scalp).await.is_none());
    }

    fn test_position(deal_id: &str) -> Position {
        Position::new(
            crate::types::PositionMode::Scalp,
            crate::types::Direction::Buy,
            1,
            dec!(100),
            dec!(98),
            dec!(102),
            dec!(104),
            deal_id.to_string(),
            None,
            0,
        )
        .unwrap()
    }
}
