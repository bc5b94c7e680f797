use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ActivityEvent, BrokerCandle, BrokerClient, BrokerError, BrokerPrice, CreatePositionRequest,
    DealConfirmation, DealStatus, RemotePosition, SessionTokens,
};
use crate::types::MarketStatus;

/// Simulated broker for exercising the full engine without a real
/// brokerage connection. Fills every order immediately at the quoted price,
/// confirms on the first poll, and serves a fixed quote unless one is
/// injected with `set_quote`. This is test/integration infrastructure, not a
/// backtester: it still runs the real scheduler, store, and strategy engine.
pub struct PaperBroker {
    quote: RwLock<BrokerPrice>,
    positions: RwLock<HashMap<String, RemotePosition>>,
    next_id: AtomicU64,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self {
            quote: RwLock::new(BrokerPrice {
                bid: dec!(1.0000),
                ask: dec!(1.0002),
                status: MarketStatus::Tradeable,
            }),
            positions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn set_quote(&self, bid: Decimal, ask: Decimal, status: MarketStatus) {
        *self.quote.write().await = BrokerPrice { bid, ask, status };
    }

    fn next_deal_id(&self) -> String {
        format!("PAPER-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn create_session(&self) -> Result<SessionTokens, BrokerError> {
        Ok(SessionTokens {
            cst: Uuid::new_v4().to_string(),
            security_token: Uuid::new_v4().to_string(),
            account_id: "PAPER".to_string(),
        })
    }

    async fn get_candles(
        &self,
        _epic: &str,
        _resolution: &str,
        _max: u32,
    ) -> Result<Vec<BrokerCandle>, BrokerError> {
        Ok(Vec::new())
    }

    async fn get_price(&self, _epic: &str) -> Result<BrokerPrice, BrokerError> {
        Ok(*self.quote.read().await)
    }

    async fn create_position(&self, req: CreatePositionRequest) -> Result<String, BrokerError> {
        let deal_id = self.next_deal_id();
        let quote = *self.quote.read().await;
        let level = match req.direction {
            crate::types::Direction::Buy => quote.ask,
            crate::types::Direction::Sell => quote.bid,
        };
        self.positions.write().await.insert(
            deal_id.clone(),
            RemotePosition {
                deal_id: deal_id.clone(),
                direction: req.direction,
                size: req.size,
                level,
                stop_level: Some(req.stop_level),
                limit_level: Some(req.profit_level),
            },
        );
        Ok(deal_id)
    }

    async fn confirm(&self, deal_reference: &str) -> Result<DealConfirmation, BrokerError> {
        let exists = self.positions.read().await.contains_key(deal_reference);
        if !exists {
            return Err(BrokerError::Rejected {
                status: "UNKNOWN_DEAL_REFERENCE".to_string(),
            });
        }
        Ok(DealConfirmation {
            deal_status: DealStatus::Accepted,
            deal_id: Some(deal_reference.to_string()),
            profit: None,
        })
    }

    async fn close_position(&self, deal_id: &str) -> Result<String, BrokerError> {
        self.positions
            .write()
            .await
            .remove(deal_id)
            .ok_or(BrokerError::NotFound)?;
        Ok(deal_id.to_string())
    }

    async fn update_position(
        &self,
        deal_id: &str,
        stop_level: Option<Decimal>,
        profit_level: Option<Decimal>,
    ) -> Result<(), BrokerError> {
        let mut positions = self.positions.write().await;
        let position = positions.get_mut(deal_id).ok_or(BrokerError::NotFound)?;
        if let Some(sl) = stop_level {
            position.stop_level = Some(sl);
        }
        if let Some(tp) = profit_level {
            position.limit_level = Some(tp);
        }
        Ok(())
    }

    async fn get_positions(&self) -> Result<Vec<RemotePosition>, BrokerError> {
        Ok(self.positions.read().await.values().cloned().collect())
    }

    async fn get_position(&self, deal_id: &str) -> Result<Option<RemotePosition>, BrokerError> {
        Ok(self.positions.read().await.get(deal_id).cloned())
    }

    async fn get_activity(&self, _from_ts: i64) -> Result<Vec<ActivityEvent>, BrokerError> {
        Ok(Vec::new())
    }

    async fn decimal_places(&self, _epic: &str) -> Result<u32, BrokerError> {
        Ok(4)
    }

    async fn refresh_session(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    #[tokio::test]
    async fn create_and_confirm_roundtrip() {
        let broker = PaperBroker::new();
        let deal_ref = broker
            .create_position(CreatePositionRequest {
                epic: "EURUSD".into(),
                direction: Direction::Buy,
                size: 1,
                stop_level: dec!(0.99),
                profit_level: dec!(1.05),
            })
            .await
            .unwrap();
        let confirmation = broker.confirm(&deal_ref).await.unwrap();
        assert_eq!(confirmation.deal_status, DealStatus::Accepted);
        assert_eq!(broker.get_positions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn close_position_removes_it() {
        let broker = PaperBroker::new();
        let deal_ref = broker
            .create_position(CreatePositionRequest {
                epic: "EURUSD".into(),
                direction: Direction::Sell,
                size: 2,
                stop_level: dec!(1.01),
                profit_level: dec!(0.95),
            })
            .await
            .unwrap();
        broker.close_position(&deal_ref).await.unwrap();
        assert!(broker.get_position(&deal_ref).await.unwrap().is_none());
    }
}
