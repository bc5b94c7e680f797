use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::setup::Mode;

/// Every decision-point outcome, as a labeled, closed set rather than a
/// stringly-typed label. Order here mirrors the gate chain that produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    SkipRisk,
    SkipMarketClosed,
    SkipSpread,
    SkipTrend,
    SkipChop,
    SkipTrendFlip,
    SkipEmaAlignment,
    SkipMeanBreak,
    SkipExpired,
    SkipH1Macro,
    SkipM15Strength,
    Watching,
    Candidate,
    SkipRsi,
    SkipAtrRatio,
    SkipBody,
    SkipM1,
    SkipMl,
    Exec,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::SkipRisk => "SKIP_RISK",
            SignalAction::SkipMarketClosed => "SKIP_MARKET_CLOSED",
            SignalAction::SkipSpread => "SKIP_SPREAD",
            SignalAction::SkipTrend => "SKIP_TREND",
            SignalAction::SkipChop => "SKIP_CHOP",
            SignalAction::SkipTrendFlip => "SKIP_TREND_FLIP",
            SignalAction::SkipEmaAlignment => "SKIP_EMA_ALIGNMENT",
            SignalAction::SkipMeanBreak => "SKIP_MEAN_BREAK",
            SignalAction::SkipExpired => "SKIP_EXPIRED",
            SignalAction::SkipH1Macro => "SKIP_H1_MACRO",
            SignalAction::SkipM15Strength => "SKIP_M15_STRENGTH",
            SignalAction::Watching => "WATCHING",
            SignalAction::Candidate => "CANDIDATE",
            SignalAction::SkipRsi => "SKIP_RSI",
            SignalAction::SkipAtrRatio => "SKIP_ATR_RATIO",
            SignalAction::SkipBody => "SKIP_BODY",
            SignalAction::SkipM1 => "SKIP_M1",
            SignalAction::SkipMl => "SKIP_ML",
            SignalAction::Exec => "EXEC",
        }
    }

    /// True for the two actions that represent an actual fired decision
    /// rather than a gate skip (used by the seed-scenario naming like
    /// `BUY_EXEC` / `BUY_WATCHING`).
    pub fn is_terminal_decision(&self) -> bool {
        matches!(self, SignalAction::Exec | SignalAction::Watching)
    }
}

/// An open record of named numerics, as a mapping from symbol to finite
/// double. Absence of a key means "not present", never a stored NaN or
/// zero.
pub type FeatureMap = HashMap<String, f64>;

/// Emitted exactly once per decision bar, append-only, regardless of which
/// gate fired (finally-flush discipline).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub ts: i64,
    pub mode: Mode,
    pub action: SignalAction,
    pub reasons: HashMap<String, String>,
    pub features: FeatureMap,
    pub model_version: Option<String>,
    pub model_score: Option<f64>,
}

impl Signal {
    pub fn new(ts: i64, mode: Mode, action: SignalAction) -> Self {
        Self {
            ts,
            mode,
            action,
            reasons: HashMap::new(),
            features: HashMap::new(),
            model_version: None,
            model_score: None,
        }
    }

    pub fn with_reason(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.reasons.insert(key.into(), value.into());
        self
    }

    pub fn with_features(mut self, features: FeatureMap) -> Self {
        self.features = features;
        self
    }

    pub fn with_model(mut self, version: String, score: f64) -> Self {
        self.model_version = Some(version);
        self.model_score = Some(score);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_labels_are_stable_strings() {
        assert_eq!(SignalAction::SkipTrendFlip.as_str(), "SKIP_TREND_FLIP");
        assert_eq!(SignalAction::Exec.as_str(), "EXEC");
    }

    #[test]
    fn signal_builder_accumulates_reasons() {
        let s = Signal::new(0, Mode::Scalp, SignalAction::SkipRisk)
            .with_reason("trades_count", "5")
            .with_reason("max_trades", "5");
        assert_eq!(s.reasons.len(), 2);
    }
}
