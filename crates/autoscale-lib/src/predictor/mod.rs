//! Demand prediction engine
//!
//! Two models share one feature contract:
//! - a random forest over [`FeatureVector`] rows (primary)
//! - an ARIMA(2,1,2) over the queue-depth series (secondary, needs history)
//!
//! Training scores the forest, ARIMA and their weighted ensemble on the same
//! validation targets and serves whichever scored best.

mod arima;
mod forest;

pub use arima::Arima;
pub use forest::{ForestParams, RandomForest};

use crate::error::{PredictorError, Result};
use crate::models::{FeatureVector, FEATURE_NAMES};
use crate::stats;
use crate::timeseries::SeriesStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

const MODEL_FILE: &str = "demand_model.json";
const CHECKSUM_FILE: &str = "demand_model.json.sha256";
const MODEL_FORMAT_VERSION: u32 = 2;

/// z-value of the two-sided 95% interval
const INTERVAL_Z: f64 = 1.96;

/// Predictor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
    /// Leading share of samples used for fitting; the rest validates
    pub train_fraction: f64,
    /// Forecast target: queue depth this many resampled rows ahead
    pub horizon: usize,
    pub min_training_samples: usize,
    /// ARIMA is skipped below this many training points
    pub arima_min_points: usize,
    pub forest_weight: f64,
    pub arima_weight: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            min_samples_split: 5,
            min_samples_leaf: 2,
            seed: 42,
            train_fraction: 0.8,
            horizon: 12,
            min_training_samples: 100,
            arima_min_points: 50,
            forest_weight: 0.7,
            arima_weight: 0.3,
        }
    }
}

impl PredictorConfig {
    fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_trees: self.n_trees,
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            seed: self.seed,
        }
    }
}

/// Model identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    RandomForest,
    Arima,
    Ensemble,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::RandomForest => "random_forest",
            ModelKind::Arima => "arima",
            ModelKind::Ensemble => "ensemble",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation accuracy of one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelScore {
    pub model: ModelKind,
    pub accuracy: f64,
    pub mae: f64,
}

/// Outcome of a successful training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub trained_at: DateTime<Utc>,
    pub samples: usize,
    pub train_samples: usize,
    pub validation_samples: usize,
    pub horizon: usize,
    pub scores: Vec<ModelScore>,
    pub best_model: ModelKind,
    pub best_accuracy: f64,
    pub arima_enabled: bool,
    /// Ten most important features, highest first
    pub top_features: Vec<(String, f64)>,
    pub duration_ms: u64,
}

/// Result of [`DemandPredictor::train`]
#[derive(Debug, Clone, PartialEq)]
pub enum Training {
    Trained(TrainingReport),
    InsufficientData { samples: usize, required: usize },
}

/// Forecast of queue depth `horizon` rows ahead
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub made_at: DateTime<Utc>,
    pub horizon: usize,
    pub forest: f64,
    /// 95% interval across forest members
    pub forest_lower: f64,
    pub forest_upper: f64,
    pub arima: Option<f64>,
    pub ensemble: Option<f64>,
    /// Value of the served model
    pub value: f64,
    pub model: ModelKind,
    /// 1 minus the relative half-width of the forest interval, in [0, 1]
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrainedModels {
    format_version: u32,
    horizon: usize,
    /// Z-score statistics of the training rows
    normalization: SeriesStats,
    forest: RandomForest,
    arima: Option<Arima>,
    best: ModelKind,
    report: TrainingReport,
}

/// Ensemble demand predictor
///
/// Training is CPU bound and synchronous; callers on an async runtime should
/// run it on a blocking thread. Readers always see a complete model.
pub struct DemandPredictor {
    config: PredictorConfig,
    models: RwLock<Option<Arc<TrainedModels>>>,
}

impl DemandPredictor {
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            config,
            models: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.current().is_some()
    }

    pub fn last_report(&self) -> Option<TrainingReport> {
        self.current().map(|m| m.report.clone())
    }

    pub fn best_model(&self) -> Option<ModelKind> {
        self.current().map(|m| m.best)
    }

    fn current(&self) -> Option<Arc<TrainedModels>> {
        self.models
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Train on feature rows and their queue-depth targets
    pub fn train(&self, features: &[FeatureVector], targets: &[f64]) -> Result<Training> {
        if features.len() != targets.len() {
            return Err(PredictorError::LengthMismatch {
                rows: features.len(),
                targets: targets.len(),
            }
            .into());
        }
        if features.len() < self.config.min_training_samples {
            debug!(
                samples = features.len(),
                required = self.config.min_training_samples,
                "Not enough samples to train"
            );
            return Ok(Training::InsufficientData {
                samples: features.len(),
                required: self.config.min_training_samples,
            });
        }

        let start = Instant::now();
        let normalization = SeriesStats::from_features(features);
        let rows: Vec<Vec<f64>> = features
            .iter()
            .map(|f| {
                let mut f = f.clone();
                normalization.normalize(&mut f);
                f.to_row()
            })
            .collect();
        let series: Vec<f64> = features.iter().map(|f| f.queue_depth).collect();
        let split = ((features.len() as f64) * self.config.train_fraction.clamp(0.1, 0.95))
            .floor() as usize;
        let horizon = self.config.horizon;

        let forest = RandomForest::fit(
            &rows[..split],
            &targets[..split],
            self.config.forest_params(),
        )?;

        let arima = if split >= self.config.arima_min_points {
            let fitted = Arima::fit(&series[..split]);
            if fitted.is_none() {
                warn!("ARIMA estimation failed, continuing with forest only");
            }
            fitted
        } else {
            debug!(points = split, "ARIMA disabled, insufficient history");
            None
        };

        let actual = &targets[split..];
        let forest_preds: Vec<f64> = rows[split..]
            .iter()
            .map(|row| forest.predict(row))
            .collect::<std::result::Result<_, _>>()?;

        let mut scores = vec![score(ModelKind::RandomForest, actual, &forest_preds)];

        if let Some(model) = &arima {
            let arima_preds: Option<Vec<f64>> = (split..features.len())
                .map(|origin| model.forecast(&series[..=origin], horizon))
                .collect();
            if let Some(arima_preds) = arima_preds {
                let ensemble_preds: Vec<f64> = forest_preds
                    .iter()
                    .zip(&arima_preds)
                    .map(|(f, a)| self.blend(*f, *a))
                    .collect();
                scores.push(score(ModelKind::Arima, actual, &arima_preds));
                scores.push(score(ModelKind::Ensemble, actual, &ensemble_preds));
            }
        }

        // Forest wins ties
        let best = scores
            .iter()
            .skip(1)
            .fold(&scores[0], |best, s| if s.accuracy > best.accuracy { s } else { best })
            .clone();

        let report = TrainingReport {
            trained_at: Utc::now(),
            samples: features.len(),
            train_samples: split,
            validation_samples: features.len() - split,
            horizon,
            best_model: best.model,
            best_accuracy: best.accuracy,
            arima_enabled: scores.len() > 1,
            top_features: top_features(forest.importances(), 10),
            scores,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            samples = report.samples,
            best_model = %report.best_model,
            accuracy = report.best_accuracy,
            arima_enabled = report.arima_enabled,
            duration_ms = report.duration_ms,
            "Demand predictor trained"
        );

        let trained = TrainedModels {
            format_version: MODEL_FORMAT_VERSION,
            horizon,
            normalization,
            forest,
            arima: if report.arima_enabled { arima } else { None },
            best: report.best_model,
            report: report.clone(),
        };
        *self.models.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(trained));
        Ok(Training::Trained(report))
    }

    fn blend(&self, forest: f64, arima: f64) -> f64 {
        self.config.forest_weight * forest + self.config.arima_weight * arima
    }

    /// Forecast from the most recent row of `features`
    ///
    /// `Ok(None)` when no model is trained yet or `features` is empty.
    pub fn predict(&self, features: &[FeatureVector], horizon: usize) -> Result<Option<Forecast>> {
        let Some(models) = self.current() else {
            return Ok(None);
        };
        let Some(latest) = features.last() else {
            return Ok(None);
        };
        if horizon != models.horizon {
            return Err(PredictorError::HorizonMismatch {
                trained: models.horizon,
                requested: horizon,
            }
            .into());
        }

        let mut latest = latest.clone();
        models.normalization.normalize(&mut latest);
        let members = models.forest.tree_predictions(&latest.to_row())?;
        let forest = stats::mean(&members);
        let half_width = INTERVAL_Z * stats::population_std_dev(&members);

        let series: Vec<f64> = features.iter().map(|f| f.queue_depth).collect();
        let arima = models
            .arima
            .as_ref()
            .and_then(|m| m.forecast(&series, horizon))
            .map(|v| v.max(0.0));
        let ensemble = arima.map(|a| self.blend(forest, a));

        let (model, value) = match (models.best, arima, ensemble) {
            (ModelKind::Arima, Some(a), _) => (ModelKind::Arima, a),
            (ModelKind::Ensemble, _, Some(e)) => (ModelKind::Ensemble, e),
            _ => (ModelKind::RandomForest, forest),
        };

        if !value.is_finite() || !forest.is_finite() || !half_width.is_finite() {
            warn!(model = %model, value, forest, "Discarding non-finite forecast");
            return Err(PredictorError::NonFiniteForecast {
                model: model.to_string(),
            }
            .into());
        }

        let confidence = (1.0 - half_width / forest.abs().max(1.0)).clamp(0.0, 1.0);

        Ok(Some(Forecast {
            made_at: Utc::now(),
            horizon,
            forest,
            forest_lower: (forest - half_width).max(0.0),
            forest_upper: forest + half_width,
            arima,
            ensemble,
            value: value.max(0.0),
            model,
            confidence,
        }))
    }

    /// Feature importances of the trained forest, highest first
    pub fn feature_importances(&self) -> Vec<(String, f64)> {
        self.current()
            .map(|m| top_features(m.forest.importances(), FEATURE_NAMES.len()))
            .unwrap_or_default()
    }

    /// Write the trained model and its SHA-256 checksum into `dir`
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let models = self
            .current()
            .ok_or_else(|| PredictorError::Persistence("no trained model to save".into()))?;
        let bytes = serde_json::to_vec(models.as_ref())
            .map_err(|e| PredictorError::Persistence(e.to_string()))?;

        std::fs::create_dir_all(dir).map_err(persistence)?;
        let path = dir.join(MODEL_FILE);
        std::fs::write(&path, &bytes).map_err(persistence)?;
        std::fs::write(dir.join(CHECKSUM_FILE), checksum(&bytes)).map_err(persistence)?;

        info!(path = %path.display(), bytes = bytes.len(), "Saved demand model");
        Ok(path)
    }

    /// Whether `dir` holds a saved model file
    pub fn has_saved_model(dir: &Path) -> bool {
        dir.join(MODEL_FILE).is_file()
    }

    /// Load a model saved by [`DemandPredictor::save`], verifying its checksum
    pub fn load(config: PredictorConfig, dir: &Path) -> Result<Self> {
        let bytes = std::fs::read(dir.join(MODEL_FILE)).map_err(persistence)?;
        let expected = std::fs::read_to_string(dir.join(CHECKSUM_FILE)).map_err(persistence)?;
        let expected = expected.trim().to_string();
        let actual = checksum(&bytes);
        if expected != actual {
            return Err(PredictorError::ChecksumMismatch { expected, actual }.into());
        }

        let models: TrainedModels = serde_json::from_slice(&bytes)
            .map_err(|e| PredictorError::Persistence(e.to_string()))?;
        if models.format_version != MODEL_FORMAT_VERSION {
            return Err(PredictorError::Persistence(format!(
                "unsupported model format version {}",
                models.format_version
            ))
            .into());
        }

        info!(best_model = %models.best, "Loaded demand model");
        Ok(Self {
            config,
            models: RwLock::new(Some(Arc::new(models))),
        })
    }
}

fn score(model: ModelKind, actual: &[f64], predicted: &[f64]) -> ModelScore {
    ModelScore {
        model,
        accuracy: stats::accuracy_percentage(actual, predicted),
        mae: stats::mean_absolute_error(actual, predicted),
    }
}

fn top_features(importances: &[f64], limit: usize) -> Vec<(String, f64)> {
    let mut ranked: Vec<(String, f64)> = FEATURE_NAMES
        .iter()
        .zip(importances)
        .map(|(name, value)| (name.to_string(), *value))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(limit);
    ranked
}

fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn persistence(e: std::io::Error) -> PredictorError {
    PredictorError::Persistence(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricSnapshot;
    use crate::timeseries::{TimeSeriesConfig, TimeSeriesStore};
    use chrono::{Duration, TimeZone};

    fn small_config() -> PredictorConfig {
        PredictorConfig {
            n_trees: 15,
            max_depth: 6,
            ..Default::default()
        }
    }

    /// Daily-shaped queue depth over `rows` five-minute samples
    async fn training_data(rows: i64) -> (Vec<FeatureVector>, Vec<f64>) {
        let store = TimeSeriesStore::in_memory(TimeSeriesConfig::default());
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for i in 0..rows {
            let at = base + Duration::minutes(5 * i);
            let phase = (i % 288) as f64 / 288.0 * std::f64::consts::TAU;
            let mut snap = MetricSnapshot::empty(at);
            snap.queue_depth = (20.0 + 15.0 * phase.sin()).round() as u64;
            snap.cpu_percent = 40.0 + 20.0 * phase.sin();
            snap.memory_percent = 50.0;
            store.append(snap).await.unwrap();
        }
        let now = base + Duration::minutes(5 * rows);
        let set = store.training_set(Duration::days(30), 12, now).await;
        (set.features, set.targets)
    }

    #[tokio::test]
    async fn test_insufficient_data_is_not_an_error() {
        let (features, targets) = training_data(60).await;
        let predictor = DemandPredictor::new(small_config());
        let outcome = predictor.train(&features, &targets).unwrap();
        assert_eq!(
            outcome,
            Training::InsufficientData {
                samples: 48,
                required: 100
            }
        );
        assert!(!predictor.is_trained());
        assert!(predictor.predict(&features, 12).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_train_and_predict() {
        let (features, targets) = training_data(400).await;
        let predictor = DemandPredictor::new(small_config());

        let Training::Trained(report) = predictor.train(&features, &targets).unwrap() else {
            panic!("expected a trained model");
        };
        assert_eq!(report.samples, 388);
        assert_eq!(report.train_samples, 310);
        assert!(report.arima_enabled);
        assert_eq!(report.scores.len(), 3);
        assert!(report.best_accuracy >= 0.0 && report.best_accuracy <= 100.0);
        assert!(report.scores.iter().all(|s| s.accuracy <= report.best_accuracy));

        let forecast = predictor.predict(&features, 12).unwrap().unwrap();
        assert!(forecast.value >= 0.0);
        assert!(forecast.forest_lower <= forecast.forest && forecast.forest <= forecast.forest_upper);
        assert!((0.0..=1.0).contains(&forecast.confidence));
        assert!(forecast.arima.is_some());
        let ensemble = forecast.ensemble.unwrap();
        assert!((ensemble - (0.7 * forecast.forest + 0.3 * forecast.arima.unwrap())).abs() < 1e-9);
        assert_eq!(forecast.model, report.best_model);
    }

    #[tokio::test]
    async fn test_horizon_mismatch_is_an_error() {
        let (features, targets) = training_data(300).await;
        let predictor = DemandPredictor::new(small_config());
        predictor.train(&features, &targets).unwrap();
        assert!(predictor.predict(&features, 6).is_err());
    }

    #[tokio::test]
    async fn test_arima_disabled_on_short_history() {
        let (features, targets) = training_data(140).await;
        let config = PredictorConfig {
            min_training_samples: 100,
            arima_min_points: 200,
            ..small_config()
        };
        let predictor = DemandPredictor::new(config);
        let Training::Trained(report) = predictor.train(&features, &targets).unwrap() else {
            panic!("expected a trained model");
        };
        assert!(!report.arima_enabled);
        assert_eq!(report.best_model, ModelKind::RandomForest);

        let forecast = predictor.predict(&features, 12).unwrap().unwrap();
        assert!(forecast.arima.is_none());
        assert!(forecast.ensemble.is_none());
        assert_eq!(forecast.value, forecast.forest);
    }

    #[tokio::test]
    async fn test_save_and_load_verifies_checksum() {
        let (features, targets) = training_data(300).await;
        let predictor = DemandPredictor::new(small_config());
        predictor.train(&features, &targets).unwrap();

        let dir = tempfile::tempdir().unwrap();
        predictor.save(dir.path()).unwrap();

        let loaded = DemandPredictor::load(small_config(), dir.path()).unwrap();
        assert_eq!(loaded.best_model(), predictor.best_model());
        let a = predictor.predict(&features, 12).unwrap().unwrap();
        let b = loaded.predict(&features, 12).unwrap().unwrap();
        assert_eq!(a.forest, b.forest);

        std::fs::write(dir.path().join(CHECKSUM_FILE), "0000").unwrap();
        let err = DemandPredictor::load(small_config(), dir.path()).err().unwrap();
        assert!(matches!(
            err,
            crate::error::ScalingError::Predictor(PredictorError::ChecksumMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_forecast_ignores_query_window_zscores() {
        let (features, targets) = training_data(300).await;
        let predictor = DemandPredictor::new(small_config());
        predictor.train(&features, &targets).unwrap();

        let baseline = predictor.predict(&features, 12).unwrap().unwrap();

        // Same row normalised against a different window
        let mut shifted = features.clone();
        if let Some(last) = shifted.last_mut() {
            last.queue_zscore += 3.0;
            last.cpu_zscore -= 2.0;
            last.memory_zscore = 1.5;
        }
        let forecast = predictor.predict(&shifted, 12).unwrap().unwrap();
        assert_eq!(forecast.forest, baseline.forest);
        assert_eq!(forecast.forest_upper, baseline.forest_upper);
    }

    #[tokio::test]
    async fn test_saved_model_has_no_null_values() {
        let (features, targets) = training_data(400).await;
        let predictor = DemandPredictor::new(PredictorConfig {
            n_trees: 30,
            max_depth: 12,
            min_samples_leaf: 1,
            ..small_config()
        });
        predictor.train(&features, &targets).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = predictor.save(dir.path()).unwrap();
        let saved = std::fs::read_to_string(path).unwrap();
        assert!(!saved.contains(r#""value":null"#));
        assert!(!saved.contains(r#""threshold":null"#));

        let loaded = DemandPredictor::load(small_config(), dir.path()).unwrap();
        let forecast = loaded.predict(&features, 12).unwrap().unwrap();
        assert!(forecast.value.is_finite());
        assert!(forecast.confidence.is_finite());
    }

    #[tokio::test]
    async fn test_feature_importances_named() {
        let (features, targets) = training_data(300).await;
        let predictor = DemandPredictor::new(small_config());
        assert!(predictor.feature_importances().is_empty());
        predictor.train(&features, &targets).unwrap();

        let importances = predictor.feature_importances();
        assert_eq!(importances.len(), FEATURE_NAMES.len());
        assert!(importances.windows(2).all(|w| w[0].1 >= w[1].1));
    }
}
