//! Trained model unit and its persistence.
//!
//! Model parameters, encoder state and the ordered feature names are
//! saved and loaded as one JSON document. A file that exists but fails
//! any consistency check is reported as corrupt, never as "no model".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::calibration::{MAX_TEMPERATURE, MIN_TEMPERATURE};
use crate::encoder::{CategoricalField, FittedEncoderState};
use crate::error::ArtifactError;
use crate::model::{PositionRankingModel, TrainingReport};

/// Current artifact format version.
pub const FORMAT_VERSION: u32 = 1;

/// Learned parameters bundled with the encoder and feature order they
/// were trained against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    /// Number of position buckets (K)
    pub max_field_size: usize,
    pub feature_names: Vec<String>,
    pub encoder: FittedEncoderState,
    pub model: PositionRankingModel,
    pub report: TrainingReport,
}

impl TrainedModel {
    pub fn new(
        feature_names: Vec<String>,
        encoder: FittedEncoderState,
        model: PositionRankingModel,
        report: TrainingReport,
    ) -> Self {
        Self {
            version: FORMAT_VERSION,
            created_at: Utc::now(),
            max_field_size: model.num_classes(),
            feature_names,
            encoder,
            model,
            report,
        }
    }

    /// Feature importance paired with names, highest first.
    pub fn feature_importance(&self) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .feature_names
            .iter()
            .cloned()
            .zip(self.model.feature_importance())
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }

    /// Check that the three parts agree with each other.
    pub fn validate(&self) -> Result<(), String> {
        if self.version != FORMAT_VERSION {
            return Err(format!(
                "unsupported format version {} (expected {})",
                self.version, FORMAT_VERSION
            ));
        }
        if self.feature_names.is_empty() {
            return Err("feature name list is empty".to_string());
        }

        let params = &self.model.params;
        let n_features = self.feature_names.len();
        if params.weights.nrows() != n_features
            || params.means.len() != n_features
            || params.scales.len() != n_features
        {
            return Err(format!(
                "{} feature names but parameters for {} features",
                n_features,
                params.weights.nrows()
            ));
        }
        if params.weights.ncols() != self.max_field_size || params.bias.len() != self.max_field_size
        {
            return Err(format!(
                "max_field_size {} but parameters for {} classes",
                self.max_field_size,
                params.weights.ncols()
            ));
        }
        if params.scales.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err("non-positive feature scale".to_string());
        }
        let calibration = &self.model.calibration;
        if !calibration.is_valid() {
            return Err(format!(
                "temperature {} outside [{}, {}]",
                calibration.temperature, MIN_TEMPERATURE, MAX_TEMPERATURE
            ));
        }

        for name in &self.feature_names {
            if CategoricalField::from_column(name).is_some() && !self.encoder.has_field(name) {
                return Err(format!("encoder state missing for feature {}", name));
            }
        }
        Ok(())
    }
}

/// Save/load boundary for trained model units.
pub trait ModelStore {
    fn save(&self, model: &TrainedModel) -> Result<(), ArtifactError>;
    fn load(&self) -> Result<TrainedModel, ArtifactError>;
}

/// Single-file JSON store.
pub struct JsonModelStore {
    path: PathBuf,
}

impl JsonModelStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn corrupt(&self, reason: impl Into<String>) -> ArtifactError {
        ArtifactError::Corrupt {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}

impl ModelStore for JsonModelStore {
    /// Write to `<name>.tmp`, then rename over the target.
    fn save(&self, model: &TrainedModel) -> Result<(), ArtifactError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(model)?;
        let tmp_path = self.tmp_path();
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)?;

        info!(
            features = model.feature_names.len(),
            classes = model.max_field_size,
            "Model saved to {}",
            self.path.display()
        );
        Ok(())
    }

    fn load(&self) -> Result<TrainedModel, ArtifactError> {
        if !self.path.exists() {
            return Err(ArtifactError::NotFound(self.path.clone()));
        }

        let content = fs::read_to_string(&self.path)?;
        let model: TrainedModel =
            serde_json::from_str(&content).map_err(|e| self.corrupt(e.to_string()))?;
        model.validate().map_err(|reason| self.corrupt(reason))?;

        info!(
            features = model.feature_names.len(),
            created_at = %model.created_at,
            "Model loaded from {}",
            self.path.display()
        );
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::TemperatureScaling;
    use crate::model::ModelParams;
    use ndarray::{Array1, Array2};
    use tempfile::tempdir;

    fn sample_model() -> TrainedModel {
        let model = PositionRankingModel {
            params: ModelParams {
                means: Array1::zeros(2),
                scales: Array1::ones(2),
                weights: Array2::from_elem((2, 3), 0.5),
                bias: Array1::zeros(3),
            },
            calibration: TemperatureScaling::new(1.2),
        };
        let report = TrainingReport {
            train_rows: 10,
            validation_rows: 2,
            epochs_run: 5,
            best_epoch: 4,
            validation_loss: 0.9,
            validation_accuracy: 0.5,
            temperature: 1.2,
        };
        TrainedModel::new(
            vec!["odds".to_string(), "popularity".to_string()],
            FittedEncoderState::default(),
            model,
            report,
        )
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let store = JsonModelStore::new(dir.path().join("models/model.json"));
        let model = sample_model();

        store.save(&model).unwrap();
        assert!(!store.tmp_path().exists());
        let loaded = store.load().unwrap();
        assert_eq!(loaded, model);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let store = JsonModelStore::new(dir.path().join("absent.json"));
        assert!(matches!(store.load(), Err(ArtifactError::NotFound(_))));
    }

    #[test]
    fn test_garbage_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, "{not json").unwrap();
        let store = JsonModelStore::new(&path);
        assert!(matches!(store.load(), Err(ArtifactError::Corrupt { .. })));
    }

    #[test]
    fn test_shape_disagreement_is_corrupt() {
        let dir = tempdir().unwrap();
        let store = JsonModelStore::new(dir.path().join("model.json"));
        let mut model = sample_model();
        model.feature_names.push("weather".to_string());
        store.save(&model).unwrap();

        match store.load() {
            Err(ArtifactError::Corrupt { reason, .. }) => assert!(reason.contains("3 feature names")),
            other => panic!("Expected Corrupt, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_temperature_is_corrupt() {
        let dir = tempdir().unwrap();
        let store = JsonModelStore::new(dir.path().join("model.json"));
        let mut model = sample_model();
        model.model.calibration.temperature = -1.0;
        store.save(&model).unwrap();

        match store.load() {
            Err(ArtifactError::Corrupt { reason, .. }) => assert!(reason.contains("temperature")),
            other => panic!("Expected Corrupt, got {:?}", other),
        }
    }

    #[test]
    fn test_temperature_out_of_range_is_invalid() {
        for temperature in [f64::NAN, f64::INFINITY, 0.0, 0.05, 10.5] {
            let mut model = sample_model();
            model.model.calibration.temperature = temperature;
            assert!(model.validate().unwrap_err().contains("temperature"));
        }

        let mut model = sample_model();
        model.model.calibration.temperature = 10.0;
        assert!(model.validate().is_ok());
    }

    #[test]
    fn test_categorical_feature_without_encoder_is_invalid() {
        let mut model = sample_model();
        model.feature_names[1] = "weather".to_string();
        assert!(model.validate().unwrap_err().contains("encoder state missing"));
    }

    #[test]
    fn test_feature_importance_is_sorted() {
        let mut model = sample_model();
        model.model.params.weights[[1, 0]] = 2.0;
        let ranked = model.feature_importance();
        assert_eq!(ranked[0].0, "popularity");
        assert!(ranked[0].1 > ranked[1].1);
    }
}
