use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::broker::{ActivityEventType, BrokerClient};
use crate::config::StrategyParamsManager;
use crate::notifications::{AlertType, NotificationManager};
use crate::runtime::RuntimeState;

/// Cross-checks tracked positions against the broker's own list on a slow
/// cadence, tolerating the list endpoint's known staleness with a
/// miss-threshold before trusting a direct single-position lookup.
pub struct Reconciler {
    runtime: Arc<RuntimeState>,
    config: Arc<StrategyParamsManager>,
    broker: Arc<dyn BrokerClient>,
    notifications: Arc<NotificationManager>,
    epic: String,
    miss_counters: Mutex<HashMap<String, u32>>,
}

impl Reconciler {
    pub fn new(
        runtime: Arc<RuntimeState>,
        config: Arc<StrategyParamsManager>,
        broker: Arc<dyn BrokerClient>,
        notifications: Arc<NotificationManager>,
        epic: String,
    ) -> Self {
        Self {
            runtime,
            config,
            broker,
            notifications,
            epic,
            miss_counters: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(&self) {
        let remote = match self.broker.get_positions().await {
            Ok(list) => list,
            Err(e) => {
                warn!("reconciler: get_positions failed, skipping cycle (treated as transient): {}", e);
                return;
            }
        };
        let remote_ids: std::collections::HashSet<String> = remote.iter().map(|p| p.deal_id.clone()).collect();

        let params = self.config.get().await;
        let tracked = self.runtime.positions_snapshot().await;
        let mut counters = self.miss_counters.lock().await;

        for position in &tracked {
            if remote_ids.contains(&position.deal_id) {
                counters.remove(&position.deal_id);
                continue;
            }

            let miss = counters.entry(position.deal_id.clone()).or_insert(0);
            *miss += 1;

            if *miss < params.reconcile_miss_threshold {
                continue;
            }

            // At threshold: verify directly before taking any destructive
            // local action. List staleness alone is never ground truth.
            match self.broker.get_position(&position.deal_id).await {
                Ok(Some(_)) => {
                    // Direct fetch disagrees with the list: transient list
                    // inconsistency, not a real miss.
                    counters.remove(&position.deal_id);
                }
                Ok(None) => {
                    drop_confirmed_missing(self, position, &mut counters).await;
                }
                Err(e) => {
                    warn!("reconciler: direct fetch for {} failed, deferring to next cycle: {}", position.deal_id, e);
                }
            }
        }

        // Garbage-collect miss counters for dealIds no longer tracked at all
        // (closed by the position manager, or never existed).
        let tracked_ids: std::collections::HashSet<String> = tracked.iter().map(|p| p.deal_id.clone()).collect();
        counters.retain(|deal_id, _| tracked_ids.contains(deal_id));
    }
}

async fn drop_confirmed_missing(
    reconciler: &Reconciler,
    position: &crate::types::Position,
    counters: &mut HashMap<String, u32>,
) {
    // Never remove a position that was replaced or re-added after this
    // snapshot was taken — idempotent by dealId: if it's already gone from
    // `runtime`, this is a no-op.
    let still_tracked = reconciler.runtime.get_position(&position.deal_id).await.is_some();
    if !still_tracked {
        counters.remove(&position.deal_id);
        return;
    }

    let pnl = recover_pnl(reconciler, position).await;
    if let Some(pnl) = pnl {
        reconciler.runtime.update_pnl(pnl).await;
    }
    reconciler.runtime.remove_position(&position.deal_id).await;
    counters.remove(&position.deal_id);

    reconciler
        .notifications
        .notify(AlertType::BrokerClosedRecovered {
            epic: reconciler.epic.clone(),
            deal_id: position.deal_id.clone(),
            pnl: pnl.map(|p| p.to_string()).unwrap_or_else(|| "unknown".to_string()),
        })
        .await;
    info!("reconciler: {} confirmed closed by broker, pnl={:?}", position.deal_id, pnl);
}

/// Recovers realized PnL from the activity history: filters by `dealId` and
/// a close-type event after `openedAt`. Returns `None` if no such event is
/// found (the directional-math fallback lives in `position_manager`, which
/// owns PnL accounting for ticks the engine itself closed).
async fn recover_pnl(reconciler: &Reconciler, position: &crate::types::Position) -> Option<Decimal> {
    let events = reconciler.broker.get_activity(position.opened_at).await.ok()?;
    events
        .into_iter()
        .find(|e| e.event_type == ActivityEventType::PositionClosed && e.deal_id.as_deref() == Some(position.deal_id.as_str()))
        .and_then(|e| e.profit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{ActivityEvent, BrokerCandle, BrokerError, BrokerPrice, CreatePositionRequest, DealConfirmation, RemotePosition, SessionTokens};
    use crate::config::StrategyParams;
    use crate::notifications::NullSink;
    use crate::types::{Direction, Position, PositionMode};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use tokio::sync::RwLock as TokioRwLock;

    struct ScriptedBroker {
        positions: TokioRwLock<Vec<RemotePosition>>,
        direct_lookup: TokioRwLock<Option<RemotePosition>>,
        activity: TokioRwLock<Vec<ActivityEvent>>,
    }

    #[async_trait]
    impl BrokerClient for ScriptedBroker {
        async fn create_session(&self) -> Result<SessionTokens, BrokerError> {
            unimplemented!()
        }
        async fn get_candles(&self, _epic: &str, _resolution: &str, _max: u32) -> Result<Vec<BrokerCandle>, BrokerError> {
            unimplemented!()
        }
        async fn get_price(&self, _epic: &str) -> Result<BrokerPrice, BrokerError> {
            unimplemented!()
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
        async fn update_position(&self, _deal_id: &str, _sl: Option<Decimal>, _tp: Option<Decimal>) -> Result<(), BrokerError> {
            unimplemented!()
        }
        async fn get_positions(&self) -> Result<Vec<RemotePosition>, BrokerError> {
            Ok(self.positions.read().await.clone())
        }
        async fn get_position(&self, deal_id: &str) -> Result<Option<RemotePosition>, BrokerError> {
            let direct = self.direct_lookup.read().await.clone();
            Ok(direct.filter(|p| p.deal_id == deal_id))
        }
        async fn get_activity(&self, _from_ts: i64) -> Result<Vec<ActivityEvent>, BrokerError> {
            Ok(self.activity.read().await.clone())
        }
        async fn decimal_places(&self, _epic: &str) -> Result<u32, BrokerError> {
            Ok(4)
        }
        async fn refresh_session(&self) -> Result<(), BrokerError> {
            unimplemented!()
        }
    }

    fn test_position(deal_id: &str) -> Position {
        Position::new(PositionMode::Scalp, Direction::Buy, 1, dec!(100), dec!(98), dec!(102), dec!(104), deal_id.to_string(), None, 0).unwrap()
    }

    #[tokio::test]
    async fn false_miss_resets_counter_when_position_reappears() {
        let broker = Arc::new(ScriptedBroker {
            positions: TokioRwLock::new(Vec::new()),
            direct_lookup: TokioRwLock::new(None),
            activity: TokioRwLock::new(Vec::new()),
        });
        let runtime = Arc::new(RuntimeState::new(dec!(1000)));
        runtime.add_position(test_position("D1")).await;

        let reconciler = Reconciler::new(
            runtime.clone(),
            Arc::new(StrategyParamsManager::new(StrategyParams { reconcile_miss_threshold: 3, ..StrategyParams::default() })),
            broker.clone() as Arc<dyn BrokerClient>,
            Arc::new(NotificationManager::new(Arc::new(NullSink))),
            "EURUSD".to_string(),
        );

        reconciler.run().await;
        reconciler.run().await;
        assert!(runtime.get_position("D1").await.is_some());

        *broker.positions.write().await = vec![RemotePosition { deal_id: "D1".into(), direction: Direction::Buy, size: 1, level: dec!(100), stop_level: None, limit_level: None }];
        reconciler.run().await;
        assert!(runtime.get_position("D1").await.is_some());
        assert_eq!(*reconciler.miss_counters.lock().await.get("D1").unwrap_or(&0), 0);
    }

    #[tokio::test]
    async fn confirmed_missing_recovers_pnl_and_removes_position() {
        let broker = Arc::new(ScriptedBroker {
            positions: TokioRwLock::new(Vec::new()),
            direct_lookup: TokioRwLock::new(None),
            activity: TokioRwLock::new(vec![ActivityEvent {
                deal_id: Some("D2".to_string()),
                event_type: ActivityEventType::PositionClosed,
                profit: Some(dec!(-3.2)),
                ts: 100,
            }]),
        });
        let runtime = Arc::new(RuntimeState::new(dec!(1000)));
        runtime.add_position(test_position("D2")).await;

        let reconciler = Reconciler::new(
            runtime.clone(),
            Arc::new(StrategyParamsManager::new(StrategyParams { reconcile_miss_threshold: 3, ..StrategyParams::default() })),
            broker as Arc<dyn BrokerClient>,
            Arc::new(NotificationManager::new(Arc::new(NullSink))),
            "EURUSD".to_string(),
        );

        for _ in 0..3 {
            reconciler.run().await;
        }

        assert!(runtime.get_position("D2").await.is_none());
        assert_eq!(runtime.counters_snapshot().await.realized_pnl, dec!(-3.2));
    }
}
