use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{
    ActivityEvent, ActivityEventType, BrokerCandle, BrokerClient, BrokerError, BrokerPrice,
    CreatePositionRequest, DealConfirmation, DealStatus, RemotePosition, SessionTokens,
};
use crate::types::{Direction, MarketStatus};

/// REST client for a Capital.com-style CFD brokerage: session-token auth
/// (`CST` + `X-SECURITY-TOKEN`, not HMAC-signed requests), a two-phase
/// create/confirm deal flow, and a list-based positions endpoint that can
/// lag behind reality.
pub struct CapitalClient {
    http: Client,
    base_url: String,
    api_key: String,
    identifier: String,
    password: String,
    timeout: Duration,
    confirm_max_attempts: u32,
    confirm_poll_interval: Duration,
    session: RwLock<Option<SessionTokens>>,
}

impl CapitalClient {
    pub fn new(
        base_url: String,
        api_key: String,
        identifier: String,
        password: String,
        timeout: Duration,
        confirm_max_attempts: u32,
        confirm_poll_interval: Duration,
    ) -> Self {
        Self {
            http: Client::builder().timeout(timeout).build().expect("http client"),
            base_url,
            api_key,
            identifier,
            password,
            timeout,
            confirm_max_attempts,
            confirm_poll_interval,
            session: RwLock::new(None),
        }
    }

    async fn ensure_session(&self) -> Result<SessionTokens, BrokerError> {
        if let Some(tokens) = self.session.read().await.clone() {
            return Ok(tokens);
        }
        let tokens = self.create_session().await?;
        *self.session.write().await = Some(tokens.clone());
        Ok(tokens)
    }

    /// Switches the active account without dropping CST/security tokens.
    pub async fn switch_account(&self, account_id: &str) -> Result<(), BrokerError> {
        let tokens = self.ensure_session().await?;
        let resp = self
            .http
            .put(format!("{}/session", self.base_url))
            .header("CST", &tokens.cst)
            .header("X-SECURITY-TOKEN", &tokens.security_token)
            .json(&serde_json::json!({ "accountId": account_id }))
            .send()
            .await
            .map_err(|e| BrokerError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BrokerError::Transient(format!(
                "switch account failed: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    fn auth_headers(
        req: reqwest::RequestBuilder,
        tokens: &SessionTokens,
    ) -> reqwest::RequestBuilder {
        req.header("CST", &tokens.cst)
            .header("X-SECURITY-TOKEN", &tokens.security_token)
    }
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(rename = "accountId")]
    account_id: String,
}

#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct CandlePrice {
    bid: Decimal,
    ask: Decimal,
}

#[derive(Debug, Deserialize)]
struct CandleResponseItem {
    #[serde(rename = "snapshotTimeUTC")]
    snapshot_time: String,
    #[serde(rename = "openPrice")]
    open: CandlePrice,
    #[serde(rename = "highPrice")]
    high: CandlePrice,
    #[serde(rename = "lowPrice")]
    low: CandlePrice,
    #[serde(rename = "closePrice")]
    close: CandlePrice,
    #[serde(rename = "lastTradedVolume")]
    volume: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct CandleResponse {
    prices: Vec<CandleResponseItem>,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde(rename = "marketStatus")]
    market_status: String,
    bid: Decimal,
    offer: Decimal,
}

#[derive(Debug, Deserialize)]
struct CreatePositionResponse {
    #[serde(rename = "dealReference")]
    deal_reference: String,
}

#[derive(Debug, Deserialize)]
struct ConfirmResponse {
    #[serde(rename = "dealStatus")]
    deal_status: String,
    #[serde(rename = "dealId")]
    deal_id: Option<String>,
    profit: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct PositionsResponse {
    positions: Vec<PositionWrapper>,
}

#[derive(Debug, Deserialize)]
struct PositionWrapper {
    position: PositionBody,
}

#[derive(Debug, Deserialize)]
struct PositionBody {
    #[serde(rename = "dealId")]
    deal_id: String,
    direction: String,
    size: Decimal,
    level: Decimal,
    #[serde(rename = "stopLevel")]
    stop_level: Option<Decimal>,
    #[serde(rename = "limitLevel")]
    limit_level: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct ActivityResponse {
    activities: Vec<ActivityItem>,
}

#[derive(Debug, Deserialize)]
struct ActivityItem {
    #[serde(rename = "dealId")]
    deal_id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    date: Option<String>,
    details: Option<ActivityDetails>,
    profit: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct ActivityDetails {
    profit: Option<Decimal>,
}

fn parse_market_status(s: &str) -> MarketStatus {
    match s {
        "TRADEABLE" => MarketStatus::Tradeable,
        "CLOSED" => MarketStatus::Closed,
        "EDITS_ONLY" => MarketStatus::EditsOnly,
        "OFFLINE" => MarketStatus::Offline,
        _ => MarketStatus::Suspended,
    }
}

fn parse_time_to_epoch_ms(s: &str) -> i64 {
    // Broker returns "YYYY-MM-DDTHH:MM:SS" in UTC, no offset suffix.
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| naive.and_utc().timestamp_millis())
        .unwrap_or(0)
}

#[async_trait]
impl BrokerClient for CapitalClient {
    async fn create_session(&self) -> Result<SessionTokens, BrokerError> {
        let resp = self
            .http
            .post(format!("{}/session", self.base_url))
            .header("X-CAP-API-KEY", &self.api_key)
            .json(&SessionRequest {
                identifier: &self.identifier,
                password: &self.password,
            })
            .send()
            .await
            .map_err(|e| BrokerError::Transient(e.to_string()))?;

        if resp.status() == StatusCode::UNAUTHORIZED || resp.status() == StatusCode::FORBIDDEN {
            return Err(BrokerError::AuthFailed(format!("status {}", resp.status())));
        }
        if !resp.status().is_success() {
            return Err(BrokerError::Transient(format!("session create: {}", resp.status())));
        }

        let cst = header_value(&resp, "CST").ok_or_else(|| {
            BrokerError::AuthFailed("missing CST header in session response".to_string())
        })?;
        let security_token = header_value(&resp, "X-SECURITY-TOKEN").ok_or_else(|| {
            BrokerError::AuthFailed("missing X-SECURITY-TOKEN header in session response".to_string())
        })?;

        let body: SessionResponse = resp
            .json()
            .await
            .map_err(|e| BrokerError::Transient(e.to_string()))?;

        Ok(SessionTokens {
            cst,
            security_token,
            account_id: body.account_id,
        })
    }

    async fn get_candles(
        &self,
        epic: &str,
        resolution: &str,
        max: u32,
    ) -> Result<Vec<BrokerCandle>, BrokerError> {
        let tokens = self.ensure_session().await?;
        let url = format!(
            "{}/prices/{}?resolution={}&max={}",
            self.base_url, epic, resolution, max
        );
        let req = Self::auth_headers(self.http.get(url), &tokens);
        let resp = req.send().await.map_err(|e| BrokerError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BrokerError::Transient(format!("get_candles: {}", resp.status())));
        }
        let body: CandleResponse = resp.json().await.map_err(|e| BrokerError::Transient(e.to_string()))?;

        let mut out: Vec<BrokerCandle> = body
            .prices
            .into_iter()
            .map(|item| BrokerCandle {
                t: parse_time_to_epoch_ms(&item.snapshot_time),
                o: (item.open.bid + item.open.ask) / Decimal::TWO,
                h: (item.high.bid + item.high.ask) / Decimal::TWO,
                l: (item.low.bid + item.low.ask) / Decimal::TWO,
                c: (item.close.bid + item.close.ask) / Decimal::TWO,
                v: item.volume.unwrap_or(Decimal::ZERO),
            })
            .collect();
        out.sort_by_key(|c| c.t);
        Ok(out)
    }

    async fn get_price(&self, epic: &str) -> Result<BrokerPrice, BrokerError> {
        let tokens = self.ensure_session().await?;
        let url = format!("{}/markets/{}", self.base_url, epic);
        let req = Self::auth_headers(self.http.get(url), &tokens);
        let resp = req.send().await.map_err(|e| BrokerError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BrokerError::Transient(format!("get_price: {}", resp.status())));
        }
        let body: PriceResponse = resp.json().await.map_err(|e| BrokerError::Transient(e.to_string()))?;
        Ok(BrokerPrice {
            bid: body.bid,
            ask: body.offer,
            status: parse_market_status(&body.market_status),
        })
    }

    async fn create_position(&self, req: CreatePositionRequest) -> Result<String, BrokerError> {
        let tokens = self.ensure_session().await?;
        let direction = match req.direction {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        };
        let url = format!("{}/positions", self.base_url);
        let builder = Self::auth_headers(self.http.post(url), &tokens).json(&serde_json::json!({
            "epic": req.epic,
            "direction": direction,
            "size": req.size,
            "stopLevel": req.stop_level,
            "profitLevel": req.profit_level,
        }));
        let resp = builder.send().await.map_err(|e| BrokerError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BrokerError::Transient(format!("create_position: {}", resp.status())));
        }
        let body: CreatePositionResponse = resp.json().await.map_err(|e| BrokerError::Transient(e.to_string()))?;
        Ok(body.deal_reference)
    }

    async fn confirm(&self, deal_reference: &str) -> Result<DealConfirmation, BrokerError> {
        let tokens = self.ensure_session().await?;
        for attempt in 1..=self.confirm_max_attempts {
            let url = format!("{}/confirms/{}", self.base_url, deal_reference);
            let req = Self::auth_headers(self.http.get(url), &tokens);
            let resp = req.send().await.map_err(|e| BrokerError::Transient(e.to_string()))?;
            if !resp.status().is_success() {
                debug!("confirm poll attempt {attempt}: http {}", resp.status());
                tokio::time::sleep(self.confirm_poll_interval).await;
                continue;
            }
            let body: ConfirmResponse = resp.json().await.map_err(|e| BrokerError::Transient(e.to_string()))?;
            match body.deal_status.as_str() {
                "ACCEPTED" => {
                    return Ok(DealConfirmation {
                        deal_status: DealStatus::Accepted,
                        deal_id: body.deal_id,
                        profit: body.profit,
                    });
                }
                other => {
                    warn!("deal {} rejected: {}", deal_reference, other);
                    return Err(BrokerError::Rejected { status: other.to_string() });
                }
            }
        }
        Err(BrokerError::ConfirmTimeout {
            attempts: self.confirm_max_attempts,
        })
    }

    async fn close_position(&self, deal_id: &str) -> Result<String, BrokerError> {
        let tokens = self.ensure_session().await?;
        let url = format!("{}/positions/{}", self.base_url, deal_id);
        let req = Self::auth_headers(self.http.delete(url), &tokens);
        let resp = req.send().await.map_err(|e| BrokerError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BrokerError::Transient(format!("close_position: {}", resp.status())));
        }
        let body: CreatePositionResponse = resp.json().await.map_err(|e| BrokerError::Transient(e.to_string()))?;
        Ok(body.deal_reference)
    }

    async fn update_position(
        &self,
        deal_id: &str,
        stop_level: Option<Decimal>,
        profit_level: Option<Decimal>,
    ) -> Result<(), BrokerError> {
        let tokens = self.ensure_session().await?;
        let url = format!("{}/positions/{}", self.base_url, deal_id);
        let builder = Self::auth_headers(self.http.put(url), &tokens).json(&serde_json::json!({
            "stopLevel": stop_level,
            "profitLevel": profit_level,
        }));
        let resp = builder.send().await.map_err(|e| BrokerError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BrokerError::Transient(format!("update_position: {}", resp.status())));
        }
        Ok(())
    }

    async fn get_positions(&self) -> Result<Vec<RemotePosition>, BrokerError> {
        let tokens = self.ensure_session().await?;
        let url = format!("{}/positions", self.base_url);
        let req = Self::auth_headers(self.http.get(url), &tokens);
        let resp = req.send().await.map_err(|e| BrokerError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BrokerError::Transient(format!("get_positions: {}", resp.status())));
        }
        let body: PositionsResponse = resp.json().await.map_err(|e| BrokerError::Transient(e.to_string()))?;
        Ok(body
            .positions
            .into_iter()
            .map(|p| remote_position_from_body(p.position))
            .collect())
    }

    async fn get_position(&self, deal_id: &str) -> Result<Option<RemotePosition>, BrokerError> {
        let tokens = self.ensure_session().await?;
        let url = format!("{}/positions/{}", self.base_url, deal_id);
        let req = Self::auth_headers(self.http.get(url), &tokens);
        let resp = req.send().await.map_err(|e| BrokerError::Transient(e.to_string()))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(BrokerError::Transient(format!("get_position: {}", resp.status())));
        }
        let body: PositionWrapper = resp.json().await.map_err(|e| BrokerError::Transient(e.to_string()))?;
        Ok(Some(remote_position_from_body(body.position)))
    }

    async fn get_activity(&self, from_ts: i64) -> Result<Vec<ActivityEvent>, BrokerError> {
        let tokens = self.ensure_session().await?;
        let url = format!("{}/history/activity?from={}", self.base_url, from_ts);
        let req = Self::auth_headers(self.http.get(url), &tokens);
        let resp = req.send().await.map_err(|e| BrokerError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BrokerError::Transient(format!("get_activity: {}", resp.status())));
        }
        let body: ActivityResponse = resp.json().await.map_err(|e| BrokerError::Transient(e.to_string()))?;
        Ok(body
            .activities
            .into_iter()
            .map(|a| ActivityEvent {
                deal_id: a.deal_id,
                event_type: match a.kind.as_deref() {
                    Some("POSITION_CLOSED") => ActivityEventType::PositionClosed,
                    _ => ActivityEventType::Other,
                },
                profit: a.profit.or_else(|| a.details.and_then(|d| d.profit)),
                ts: a.date.as_deref().map(parse_time_to_epoch_ms).unwrap_or(0),
            })
            .collect())
    }

    async fn decimal_places(&self, epic: &str) -> Result<u32, BrokerError> {
        let tokens = self.ensure_session().await?;
        let url = format!("{}/markets/{}", self.base_url, epic);
        let req = Self::auth_headers(self.http.get(url), &tokens);
        let resp = req.send().await.map_err(|e| BrokerError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BrokerError::Transient(format!("decimal_places: {}", resp.status())));
        }
        #[derive(Deserialize)]
        struct Snapshot {
            #[serde(rename = "decimalPlacesFactor")]
            decimal_places_factor: Option<u32>,
        }
        #[derive(Deserialize)]
        struct MarketInfo {
            snapshot: Snapshot,
        }
        let body: MarketInfo = resp.json().await.map_err(|e| BrokerError::Transient(e.to_string()))?;
        Ok(body.snapshot.decimal_places_factor.unwrap_or(4))
    }

    async fn refresh_session(&self) -> Result<(), BrokerError> {
        let tokens = self.create_session().await?;
        *self.session.write().await = Some(tokens);
        Ok(())
    }
}

fn remote_position_from_body(body: PositionBody) -> RemotePosition {
    RemotePosition {
        deal_id: body.deal_id,
        direction: if body.direction == "BUY" {
            Direction::Buy
        } else {
            Direction::Sell
        },
        size: decimal_to_u64(body.size),
        level: body.level,
        stop_level: body.stop_level,
        limit_level: body.limit_level,
    }
}

fn decimal_to_u64(d: Decimal) -> u64 {
    d.trunc().to_string().parse().unwrap_or(0)
}

fn header_value(resp: &reqwest::Response, name: &str) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
