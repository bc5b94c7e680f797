pub mod capital;
pub mod paper;
pub mod precision;

pub use capital::CapitalClient;
pub use paper::PaperBroker;
pub use precision::{round_for_epic, PrecisionCache};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Direction, MarketStatus};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("transient broker I/O error: {0}")]
    Transient(String),
    #[error("deal confirmation timed out after {attempts} attempts")]
    ConfirmTimeout { attempts: u32 },
    #[error("deal rejected: {status}")]
    Rejected { status: String },
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("position not found")]
    NotFound,
}

impl BrokerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Transient(_))
    }
}

#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub cst: String,
    pub security_token: String,
    pub account_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerCandle {
    pub t: i64,
    pub o: Decimal,
    pub h: Decimal,
    pub l: Decimal,
    pub c: Decimal,
    pub v: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BrokerPrice {
    pub bid: Decimal,
    pub ask: Decimal,
    pub status: MarketStatus,
}

#[derive(Debug, Clone)]
pub struct CreatePositionRequest {
    pub epic: String,
    pub direction: Direction,
    pub size: u64,
    pub stop_level: Decimal,
    pub profit_level: Decimal,
}

#[derive(Debug, Clone)]
pub struct DealConfirmation {
    pub deal_status: DealStatus,
    pub deal_id: Option<String>,
    pub profit: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealStatus {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct RemotePosition {
    pub deal_id: String,
    pub direction: Direction,
    pub size: u64,
    pub level: Decimal,
    pub stop_level: Option<Decimal>,
    pub limit_level: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct ActivityEvent {
    pub deal_id: Option<String>,
    pub event_type: ActivityEventType,
    pub profit: Option<Decimal>,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityEventType {
    PositionClosed,
    Other,
}

/// The only external collaborator the engine's decision path depends on.
/// Every call carries an implicit per-call timeout; implementations must
/// return promptly on cancellation.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn create_session(&self) -> Result<SessionTokens, BrokerError>;

    async fn get_candles(
        &self,
        epic: &str,
        resolution: &str,
        max: u32,
    ) -> Result<Vec<BrokerCandle>, BrokerError>;

    async fn get_price(&self, epic: &str) -> Result<BrokerPrice, BrokerError>;

    async fn create_position(
        &self,
        req: CreatePositionRequest,
    ) -> Result<String, BrokerError>;

    async fn confirm(&self, deal_reference: &str) -> Result<DealConfirmation, BrokerError>;

    async fn close_position(&self, deal_id: &str) -> Result<String, BrokerError>;

    async fn update_position(
        &self,
        deal_id: &str,
        stop_level: Option<Decimal>,
        profit_level: Option<Decimal>,
    ) -> Result<(), BrokerError>;

    async fn get_positions(&self) -> Result<Vec<RemotePosition>, BrokerError>;

    async fn get_position(&self, deal_id: &str) -> Result<Option<RemotePosition>, BrokerError>;

    async fn get_activity(&self, from_ts: i64) -> Result<Vec<ActivityEvent>, BrokerError>;

    async fn decimal_places(&self, epic: &str) -> Result<u32, BrokerError>;

    /// Re-authenticates and swaps the cached session tokens. Called on a
    /// fixed cadence so a long-lived process never runs past token expiry.
    async fn refresh_session(&self) -> Result<(), BrokerError>;
}
