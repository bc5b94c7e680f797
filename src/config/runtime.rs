use std::env;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Immutable bootstrap configuration, sourced from the process environment
/// once at startup. Credentials, the traded epic, and poll cadences never
/// change without a restart.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub api_key: String,
    pub identifier: String,
    pub password: String,
    pub base_url: String,
    pub epic: String,
    pub demo: bool,
    pub timezone: String,
    pub webhook_url: Option<String>,
    pub persistence_url: Option<String>,
    pub champion_path: Option<String>,
    pub challenger_path: Option<String>,
    pub tick_interval: Duration,
    pub reconcile_interval: Duration,
    pub status_interval: Duration,
    pub session_refresh_interval: Duration,
    pub broker_timeout: Duration,
    pub confirm_max_attempts: u32,
    pub confirm_poll_interval: Duration,
}

impl EngineConfig {
    /// Loads from the process environment (after `.env` has been applied by
    /// the caller via `dotenvy`). Missing required variables are a startup
    /// fatal, surfaced as `anyhow::Error`.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = require_env("CAPITAL_API_KEY")?;
        let identifier = require_env("CAPITAL_IDENTIFIER")?;
        let password = require_env("CAPITAL_PASSWORD")?;
        let epic = require_env("CAPITAL_EPIC")?;
        let demo = env::var("CAPITAL_DEMO")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        let base_url = env::var("CAPITAL_BASE_URL").unwrap_or_else(|_| {
            if demo {
                "https://demo-api-capital.backend-capital.com/api/v1".to_string()
            } else {
                "https://api-capital.backend-capital.com/api/v1".to_string()
            }
        });

        Ok(Self {
            api_key,
            identifier,
            password,
            base_url,
            epic,
            demo,
            timezone: env::var("ENGINE_TIMEZONE").unwrap_or_else(|_| "UTC".to_string()),
            webhook_url: env::var("NOTIFY_WEBHOOK_URL").ok(),
            persistence_url: env::var("DATABASE_URL").ok(),
            champion_path: env::var("ML_CHAMPION_PATH").ok(),
            challenger_path: env::var("ML_CHALLENGER_PATH").ok(),
            tick_interval: env_secs("TICK_INTERVAL_SECS", 5),
            reconcile_interval: env_secs("RECONCILE_INTERVAL_SECS", 60),
            status_interval: env_secs("STATUS_INTERVAL_SECS", 30),
            session_refresh_interval: env_secs("SESSION_REFRESH_INTERVAL_SECS", 9 * 60),
            broker_timeout: env_secs("BROKER_TIMEOUT_SECS", 10),
            confirm_max_attempts: env_u32("CONFIRM_MAX_ATTEMPTS", 10),
            confirm_poll_interval: env_secs("CONFIRM_POLL_INTERVAL_SECS", 1),
        })
    }
}

fn require_env(name: &str) -> anyhow::Result<String> {
    env::var(name).map_err(|_| anyhow::anyhow!("missing required env var {name}"))
}

fn env_secs(name: &str, default: u64) -> Duration {
    let v = env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default);
    Duration::from_secs(v)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(default)
}

/// Hot-swappable strategy tunables. Adjustable at runtime via
/// `StrategyParamsManager` without restarting the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyParams {
    pub swing_enabled: bool,

    // Risk gate
    pub max_trades: u32,
    pub daily_loss_limit: Decimal,
    pub max_consec_losses: u32,

    // Spread gate
    pub spread_min: Decimal,
    pub spread_max: Decimal,
    pub k_spread: Decimal,

    // Chop / setup creation
    pub chop_min: Decimal,
    pub tol_base: Decimal,
    pub tol_k: Decimal,
    pub tol_max: Decimal,
    pub fast_min: Decimal,
    pub fast_tol: Decimal,
    pub close_pct: Decimal,
    pub wick_pct: Decimal,

    // Setup validity
    pub invalidation_k: Decimal,
    pub expiry_bars: usize,

    // H1 macro / M15 strength confirmation
    pub oversold: Decimal,
    pub overbought: Decimal,
    pub m15_strength_min: Decimal,

    // BOS trigger
    pub bos_lookback: usize,
    pub big_k: Decimal,
    pub atr_margin_k: Decimal,

    // Post-BOS gates
    pub rsi_buy_min: Decimal,
    pub rsi_sell_max: Decimal,
    pub atr_abs_min: Decimal,
    pub atr_ratio_min: Decimal,
    pub atr_ratio_window: usize,
    pub body_k: Decimal,

    // ML gate
    pub buy_threshold: f64,
    pub sell_threshold: f64,

    // SL/TP
    pub sl_buffer_k: Decimal,
    pub tp1_atr_scalp: Decimal,
    pub tp2_atr_scalp: Decimal,
    pub tp2_r_swing: Decimal,
    pub min_tp1_spread_mult: Decimal,

    // Position manager
    pub partial_frac: Decimal,
    pub breakeven_enabled: bool,

    // Reconciler
    pub reconcile_miss_threshold: u32,

    // Fixed per-epic unit size consumed when an order is issued.
    pub position_size: u64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            swing_enabled: false,
            max_trades: 5,
            daily_loss_limit: dec!(200),
            max_consec_losses: 3,
            spread_min: dec!(0.5),
            spread_max: dec!(3.0),
            k_spread: dec!(0.15),
            chop_min: dec!(0.25),
            tol_base: dec!(0.15),
            tol_k: dec!(0.3),
            tol_max: dec!(0.5),
            fast_min: dec!(0.6),
            fast_tol: dec!(0.08),
            close_pct: dec!(0.6),
            wick_pct: dec!(0.3),
            invalidation_k: dec!(1.0),
            expiry_bars: 24,
            oversold: dec!(35),
            overbought: dec!(65),
            m15_strength_min: dec!(0.3),
            bos_lookback: 8,
            big_k: dec!(3.0),
            atr_margin_k: dec!(0.1),
            rsi_buy_min: dec!(50),
            rsi_sell_max: dec!(50),
            atr_abs_min: dec!(0.0001),
            atr_ratio_min: dec!(0.7),
            atr_ratio_window: 20,
            body_k: dec!(0.3),
            buy_threshold: 0.55,
            sell_threshold: 0.45,
            sl_buffer_k: dec!(0.1),
            tp1_atr_scalp: dec!(0.8),
            tp2_atr_scalp: dec!(1.6),
            tp2_r_swing: dec!(2.0),
            min_tp1_spread_mult: dec!(1.5),
            partial_frac: dec!(0.5),
            breakeven_enabled: true,
            reconcile_miss_threshold: 3,
            position_size: 1,
        }
    }
}

impl StrategyParams {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.max_trades == 0 {
            errors.push("max_trades must be > 0".to_string());
        }
        if self.daily_loss_limit <= Decimal::ZERO {
            errors.push("daily_loss_limit must be > 0".to_string());
        }
        if self.spread_min > self.spread_max {
            errors.push("spread_min must be <= spread_max".to_string());
        }
        if self.chop_min <= Decimal::ZERO {
            errors.push("chop_min must be > 0".to_string());
        }
        if self.partial_frac <= Decimal::ZERO || self.partial_frac >= Decimal::ONE {
            errors.push("partial_frac must be in (0, 1)".to_string());
        }
        if self.buy_threshold <= 0.0 || self.buy_threshold >= 1.0 {
            errors.push("buy_threshold must be in (0, 1)".to_string());
        }
        if self.sell_threshold <= 0.0 || self.sell_threshold >= 1.0 {
            errors.push("sell_threshold must be in (0, 1)".to_string());
        }
        if self.tp1_atr_scalp >= self.tp2_atr_scalp {
            errors.push("tp1_atr_scalp must be < tp2_atr_scalp".to_string());
        }
        if self.reconcile_miss_threshold == 0 {
            errors.push("reconcile_miss_threshold must be > 0".to_string());
        }
        if self.position_size == 0 {
            errors.push("position_size must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
