use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::types::FeatureMap;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read classifier file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse classifier file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// `{version, featureNames, bias, weights: name -> coefficient}`, loaded
/// verbatim from a classifier JSON file. The engine only consumes the
/// scoring function and a version string; training/promotion happen
/// out-of-band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierModel {
    pub version: String,
    #[serde(rename = "featureNames")]
    pub feature_names: Vec<String>,
    pub bias: f64,
    pub weights: std::collections::HashMap<String, f64>,
}

impl ClassifierModel {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ModelError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ModelError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// `score = sigma(bias + sum(w_i * f_i))` over features present, finite,
    /// non-null in `features`. Absent features contribute nothing (treated
    /// as "not present", never defaulted to zero silently skipping a
    /// warning).
    pub fn score(&self, features: &FeatureMap) -> f64 {
        let mut z = self.bias;
        for name in &self.feature_names {
            if let Some(value) = features.get(name) {
                if value.is_finite() {
                    if let Some(weight) = self.weights.get(name) {
                        z += weight * value;
                    }
                }
            }
        }
        sigmoid(z)
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub score: f64,
    pub version: String,
}

/// Hot-reloadable champion/challenger pair. The champion can block trades;
/// the challenger is scored for every signal that reaches the ML step but
/// never blocks — its score is recorded purely as a shadow prediction.
/// Reload swaps in a fresh immutable `ClassifierModel`, so scorers never
/// observe a half-loaded model.
pub struct MlGate {
    champion_path: Option<PathBuf>,
    challenger_path: Option<PathBuf>,
    champion: RwLock<Option<Arc<ClassifierModel>>>,
    challenger: RwLock<Option<Arc<ClassifierModel>>>,
}

impl MlGate {
    pub fn new(champion_path: Option<PathBuf>, challenger_path: Option<PathBuf>) -> Self {
        Self {
            champion_path,
            challenger_path,
            champion: RwLock::new(None),
            challenger: RwLock::new(None),
        }
    }

    /// Re-reads champion and challenger files from disk. Absence of either
    /// file is allowed and treated as "no decision" for that slot, not an
    /// error.
    pub async fn reload(&self) {
        if let Some(path) = &self.champion_path {
            match ClassifierModel::load(path) {
                Ok(model) => {
                    info!("ml: reloaded champion {}", model.version);
                    *self.champion.write().await = Some(Arc::new(model));
                }
                Err(e) => warn!("ml: champion reload failed, keeping previous: {}", e),
            }
        }
        if let Some(path) = &self.challenger_path {
            match ClassifierModel::load(path) {
                Ok(model) => {
                    info!("ml: reloaded challenger {}", model.version);
                    *self.challenger.write().await = Some(Arc::new(model));
                }
                Err(e) => warn!("ml: challenger reload failed, keeping previous: {}", e),
            }
        }
    }

    pub async fn champion_score(&self, features: &FeatureMap) -> Option<Prediction> {
        let model = self.champion.read().await.clone()?;
        Some(Prediction {
            score: model.score(features),
            version: model.version.clone(),
        })
    }

    pub async fn challenger_score(&self, features: &FeatureMap) -> Option<Prediction> {
        let model = self.challenger.read().await.clone()?;
        Some(Prediction {
            score: model.score(features),
            version: model.version.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ClassifierModel {
        let mut weights = std::collections::HashMap::new();
        weights.insert("rsi".to_string(), 0.02);
        weights.insert("atr_ratio".to_string(), 0.5);
        ClassifierModel {
            version: "v1".to_string(),
            feature_names: vec!["rsi".to_string(), "atr_ratio".to_string()],
            bias: -1.0,
            weights,
        }
    }

    #[test]
    fn score_monotonic_increasing_in_positive_weight_feature() {
        let m = model();
        let mut low = FeatureMap::new();
        low.insert("rsi".to_string(), 40.0);
        low.insert("atr_ratio".to_string(), 1.0);

        let mut high = low.clone();
        high.insert("rsi".to_string(), 60.0);

        assert!(m.score(&high) > m.score(&low));
    }

    #[test]
    fn absent_feature_contributes_nothing() {
        let m = model();
        let mut features = FeatureMap::new();
        features.insert("rsi".to_string(), 50.0);
        // atr_ratio absent entirely.
        let score = m.score(&features);
        assert!(score > 0.0 && score < 1.0);
    }

    #[test]
    fn non_finite_feature_is_ignored() {
        let m = model();
        let mut features = FeatureMap::new();
        features.insert("rsi".to_string(), f64::NAN);
        features.insert("atr_ratio".to_string(), 1.0);
        let baseline = m.score(&features);

        let mut clean = FeatureMap::new();
        clean.insert("atr_ratio".to_string(), 1.0);
        assert_eq!(baseline, m.score(&clean));
    }
}
