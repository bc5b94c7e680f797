use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tracing::info;

use super::runtime::StrategyParams;

#[derive(Debug, Clone, Serialize)]
pub enum ConfigChangeEvent {
    StrategyParamsUpdated,
}

/// Hot-swap wrapper around `StrategyParams`, mirroring the risk/executor
/// config manager pattern: validated updates, rollback on failure, and a
/// broadcast of change events for anything that wants to react live.
pub struct StrategyParamsManager {
    params: Arc<RwLock<StrategyParams>>,
    change_tx: broadcast::Sender<ConfigChangeEvent>,
}

impl StrategyParamsManager {
    pub fn new(initial: StrategyParams) -> Self {
        let (change_tx, _) = broadcast::channel(32);
        Self {
            params: Arc::new(RwLock::new(initial)),
            change_tx,
        }
    }

    pub async fn get(&self) -> StrategyParams {
        self.params.read().await.clone()
    }

    pub async fn update(&self, new_params: StrategyParams) -> Result<(), String> {
        new_params.validate().map_err(|errors| errors.join(", "))?;

        let mut params = self.params.write().await;
        *params = new_params;
        drop(params);

        info!("strategy params updated");
        let _ = self.change_tx.send(ConfigChangeEvent::StrategyParamsUpdated);
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.change_tx.subscribe()
    }

    pub fn params_arc(&self) -> Arc<RwLock<StrategyParams>> {
        Arc::clone(&self.params)
    }
}

impl Clone for StrategyParamsManager {
    fn clone(&self) -> Self {
        Self {
            params: Arc::clone(&self.params),
            change_tx: self.change_tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_invalid_update_and_keeps_previous() {
        let manager = StrategyParamsManager::new(StrategyParams::default());
        let mut bad = manager.get().await;
        bad.max_trades = 0;

        let err = manager.update(bad).await.unwrap_err();
        assert!(err.contains("max_trades"));
        assert_eq!(manager.get().await.max_trades, StrategyParams::default().max_trades);
    }

    #[tokio::test]
    async fn accepts_valid_update() {
        let manager = StrategyParamsManager::new(StrategyParams::default());
        let mut next = manager.get().await;
        next.max_trades = 10;
        manager.update(next).await.unwrap();
        assert_eq!(manager.get().await.max_trades, 10);
    }
}
