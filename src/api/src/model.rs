//! Finishing-position classifier and its trainer.
//!
//! A multinomial logistic regression over standardized features. Class `k`
//! is finishing position `k + 1`; the last bucket also absorbs every finish
//! beyond the field size.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::artifact::TrainedModel;
use crate::calibration::{softmax, TemperatureScaling};
use crate::config::{EncoderPolicy, ModelConfig, TrainingConfig};
use crate::encoder::{FeatureEncoder, FittedEncoderState};
use crate::error::PipelineError;
use crate::features::{EncoderMode, FeatureAssembler};
use crate::stats::HistoricalStats;
use crate::types::RaceTable;

/// Learned parameters of the position classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Per-feature mean of the training rows
    pub means: Array1<f64>,
    /// Per-feature standard deviation (1.0 for constant columns)
    pub scales: Array1<f64>,
    /// Shape (n_features, n_classes)
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

impl ModelParams {
    fn zeros(n_features: usize, n_classes: usize) -> Self {
        Self {
            means: Array1::zeros(n_features),
            scales: Array1::ones(n_features),
            weights: Array2::zeros((n_features, n_classes)),
            bias: Array1::zeros(n_classes),
        }
    }
}

/// Multiclass classifier over finishing-position buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRankingModel {
    pub params: ModelParams,
    pub calibration: TemperatureScaling,
}

impl PositionRankingModel {
    pub fn num_features(&self) -> usize {
        self.params.weights.nrows()
    }

    pub fn num_classes(&self) -> usize {
        self.params.weights.ncols()
    }

    fn standardize(&self, features: &Array2<f64>) -> Array2<f64> {
        (features - &self.params.means) / &self.params.scales
    }

    /// Uncalibrated class logits, shape (n_rows, n_classes).
    pub fn logits(&self, features: &Array2<f64>) -> Array2<f64> {
        self.standardize(features).dot(&self.params.weights) + &self.params.bias
    }

    /// Calibrated class probabilities, one row per input row.
    pub fn predict_proba(&self, features: &Array2<f64>) -> Array2<f64> {
        let mut probs = self.logits(features);
        for mut row in probs.rows_mut() {
            let calibrated = self.calibration.probabilities(row.view());
            row.assign(&calibrated);
        }
        probs
    }

    /// Mean absolute standardized weight per feature.
    pub fn feature_importance(&self) -> Vec<f64> {
        self.params
            .weights
            .rows()
            .into_iter()
            .map(|row| row.mapv(f64::abs).mean().unwrap_or(0.0))
            .collect()
    }
}

/// Summary of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub train_rows: usize,
    pub validation_rows: usize,
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub validation_loss: f64,
    /// Share of validation rows whose argmax bucket equals the true bucket
    pub validation_accuracy: f64,
    pub temperature: f64,
}

/// Finishing position to bucket index.
pub fn position_bucket(position: u32, num_classes: usize) -> usize {
    (position.max(1) as usize).min(num_classes) - 1
}

/// Stratified train/validation split of row indices.
///
/// Each class is shuffled with the seeded RNG and `test_size` of it (at
/// least one row, never all rows) moves to validation. Classes with a
/// single row stay in training.
pub fn stratified_split(labels: &[usize], test_size: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let num_classes = labels.iter().copied().max().map_or(0, |m| m + 1);
    let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); num_classes];
    for (i, &label) in labels.iter().enumerate() {
        by_class[label].push(i);
    }

    let mut train = Vec::new();
    let mut validation = Vec::new();
    for mut rows in by_class {
        if rows.is_empty() {
            continue;
        }
        rows.shuffle(&mut rng);
        let n_val = if rows.len() < 2 {
            0
        } else {
            ((rows.len() as f64 * test_size).round() as usize).clamp(1, rows.len() - 1)
        };
        validation.extend_from_slice(&rows[..n_val]);
        train.extend_from_slice(&rows[n_val..]);
    }
    train.sort_unstable();
    validation.sort_unstable();
    (train, validation)
}

fn one_hot(labels: &[usize], num_classes: usize) -> Array2<f64> {
    let mut y = Array2::zeros((labels.len(), num_classes));
    for (i, &label) in labels.iter().enumerate() {
        y[[i, label]] = 1.0;
    }
    y
}

fn row_softmax(logits: &Array2<f64>) -> Array2<f64> {
    let mut probs = logits.clone();
    for mut row in probs.rows_mut() {
        let p = softmax(&row.to_owned());
        row.assign(&p);
    }
    probs
}

fn log_loss(probs: &Array2<f64>, labels: &[usize]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let total: f64 = labels
        .iter()
        .enumerate()
        .map(|(i, &label)| -(probs[[i, label]].max(1e-12)).ln())
        .sum();
    total / labels.len() as f64
}

fn argmax(row: ndarray::ArrayView1<f64>) -> usize {
    let mut best = 0;
    for (i, &p) in row.iter().enumerate() {
        if p > row[best] {
            best = i;
        }
    }
    best
}

/// Gradient-descent trainer with early stopping on validation loss.
pub struct PositionTrainer {
    config: TrainingConfig,
    num_classes: usize,
}

impl PositionTrainer {
    pub fn new(config: TrainingConfig, num_classes: usize) -> Self {
        Self {
            config,
            num_classes,
        }
    }

    /// Fit on a feature matrix and bucket labels.
    pub fn fit(
        &self,
        features: &Array2<f64>,
        labels: &[usize],
    ) -> Result<(PositionRankingModel, TrainingReport), PipelineError> {
        if features.nrows() == 0 || labels.is_empty() {
            return Err(PipelineError::EmptyCorpus);
        }
        if self.num_classes == 0 {
            return Err(PipelineError::InvalidInput(
                "max_field_size must be at least 1".to_string(),
            ));
        }
        if features.nrows() != labels.len() {
            return Err(PipelineError::InvalidInput(format!(
                "{} feature rows but {} labels",
                features.nrows(),
                labels.len()
            )));
        }
        if let Some(&bad) = labels.iter().find(|&&l| l >= self.num_classes) {
            return Err(PipelineError::InvalidInput(format!(
                "label {} outside {} classes",
                bad, self.num_classes
            )));
        }

        let (train_idx, mut val_idx) =
            stratified_split(labels, self.config.test_size, self.config.seed);
        if val_idx.is_empty() {
            debug!("Validation split empty, validating on training rows");
            val_idx = train_idx.clone();
        }

        let x_train = features.select(Axis(0), &train_idx);
        let x_val = features.select(Axis(0), &val_idx);
        let y_train: Vec<usize> = train_idx.iter().map(|&i| labels[i]).collect();
        let y_val: Vec<usize> = val_idx.iter().map(|&i| labels[i]).collect();

        let n_features = features.ncols();
        let mut params = ModelParams::zeros(n_features, self.num_classes);
        if let Some(means) = x_train.mean_axis(Axis(0)) {
            params.means = means;
        }
        params.scales = x_train
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 1e-12 { s } else { 1.0 });

        let z_train = (&x_train - &params.means) / &params.scales;
        let z_val = (&x_val - &params.means) / &params.scales;
        let y_onehot = one_hot(&y_train, self.num_classes);
        let n = z_train.nrows() as f64;

        let mut best = params.clone();
        let mut best_loss = f64::INFINITY;
        let mut best_epoch = 0;
        let mut epochs_run = 0;

        for epoch in 1..=self.config.max_epochs {
            epochs_run = epoch;

            let probs = row_softmax(&(z_train.dot(&params.weights) + &params.bias));
            let residual = probs - &y_onehot;
            let grad_w = z_train.t().dot(&residual) / n + &params.weights * self.config.l2;
            let grad_b = residual.sum_axis(Axis(0)) / n;
            params.weights = &params.weights - &(grad_w * self.config.learning_rate);
            params.bias = &params.bias - &(grad_b * self.config.learning_rate);

            let val_probs = row_softmax(&(z_val.dot(&params.weights) + &params.bias));
            let val_loss = log_loss(&val_probs, &y_val);
            if val_loss < best_loss - 1e-9 {
                best_loss = val_loss;
                best_epoch = epoch;
                best = params.clone();
            } else if epoch - best_epoch >= self.config.early_stopping_rounds {
                debug!("Early stopping at epoch {} (best {})", epoch, best_epoch);
                break;
            }
        }

        let mut model = PositionRankingModel {
            params: best,
            calibration: TemperatureScaling::default(),
        };
        let val_logits = model.logits(&x_val);
        model.calibration = TemperatureScaling::fit(&val_logits, &y_val);

        let val_probs = model.predict_proba(&x_val);
        let correct = val_probs
            .rows()
            .into_iter()
            .zip(&y_val)
            .filter(|(row, label)| argmax(row.view()) == **label)
            .count();

        let report = TrainingReport {
            train_rows: train_idx.len(),
            validation_rows: y_val.len(),
            epochs_run,
            best_epoch,
            validation_loss: model.calibration.nll(&val_logits, &y_val),
            validation_accuracy: correct as f64 / y_val.len() as f64,
            temperature: model.calibration.temperature,
        };

        Ok((model, report))
    }
}

/// Train a complete model unit from a labeled corpus.
///
/// Rows without a finishing position are ignored. With
/// [`EncoderPolicy::Extend`] the categorical codes of `previous` are kept
/// and new categories appended; otherwise the mapping starts fresh.
pub fn train(
    corpus: &RaceTable,
    model_config: &ModelConfig,
    training: &TrainingConfig,
    previous: Option<&FittedEncoderState>,
) -> Result<TrainedModel, PipelineError> {
    let labeled: Vec<_> = corpus
        .entries()
        .iter()
        .filter(|e| e.finish_position.is_some())
        .cloned()
        .collect();
    if labeled.is_empty() {
        return Err(PipelineError::EmptyCorpus);
    }

    let num_classes = model_config.max_field_size;
    let labels: Vec<usize> = labeled
        .iter()
        .filter_map(|e| e.finish_position)
        .map(|p| position_bucket(p, num_classes.max(1)))
        .collect();
    let table = RaceTable::with_columns(labeled, corpus.columns().clone())?;
    info!(
        "Training on {} labeled rows ({} total)",
        table.len(),
        corpus.len()
    );

    let mut encoder = match (training.encoder_policy, previous) {
        (EncoderPolicy::Extend, Some(state)) => FeatureEncoder::from_state(state.clone()),
        _ => FeatureEncoder::new(),
    };

    let stats = HistoricalStats::from_corpus(table.entries());
    let features = FeatureAssembler::new(&stats).assemble(&table, EncoderMode::Fit(&mut encoder));

    let trainer = PositionTrainer::new(training.clone(), num_classes);
    let (model, report) = trainer.fit(features.values(), &labels)?;
    info!(
        "Training done: {} train / {} validation rows, best epoch {}, validation accuracy {:.3}",
        report.train_rows, report.validation_rows, report.best_epoch, report.validation_accuracy
    );

    Ok(TrainedModel::new(
        features.names().to_vec(),
        encoder.into_state(),
        model,
        report,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RaceEntry;

    fn quick_config() -> TrainingConfig {
        TrainingConfig {
            max_epochs: 300,
            learning_rate: 0.5,
            ..Default::default()
        }
    }

    #[test]
    fn test_position_bucket_clamps() {
        assert_eq!(position_bucket(1, 16), 0);
        assert_eq!(position_bucket(16, 16), 15);
        assert_eq!(position_bucket(18, 16), 15);
    }

    #[test]
    fn test_stratified_split_is_seeded_and_disjoint() {
        let labels: Vec<usize> = (0..50).map(|i| i % 5).collect();
        let (train_a, val_a) = stratified_split(&labels, 0.2, 42);
        let (train_b, val_b) = stratified_split(&labels, 0.2, 42);

        assert_eq!(train_a, train_b);
        assert_eq!(val_a, val_b);
        assert_eq!(train_a.len() + val_a.len(), 50);
        assert_eq!(val_a.len(), 10);
        assert!(val_a.iter().all(|i| !train_a.contains(i)));
        // Each class contributes 2 of its 10 rows
        for class in 0..5 {
            assert_eq!(val_a.iter().filter(|&&i| labels[i] == class).count(), 2);
        }
    }

    #[test]
    fn test_singleton_class_stays_in_training() {
        let labels = vec![0, 0, 0, 1];
        let (train, val) = stratified_split(&labels, 0.2, 7);
        assert!(train.contains(&3));
        assert!(!val.contains(&3));
    }

    #[test]
    fn test_fit_learns_separable_classes() {
        // One feature; low values finish first, high values second
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..40 {
            let class = i % 2;
            rows.push(if class == 0 { -1.0 - i as f64 * 0.01 } else { 1.0 + i as f64 * 0.01 });
            labels.push(class);
        }
        let x = Array2::from_shape_vec((40, 1), rows).unwrap();

        let (model, report) = PositionTrainer::new(quick_config(), 3).fit(&x, &labels).unwrap();
        assert!(report.validation_accuracy > 0.99);
        assert_eq!(model.num_classes(), 3);
        assert!(report.best_epoch >= 1);

        let probs = model.predict_proba(&x);
        for row in probs.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        assert!(probs[[0, 0]] > probs[[0, 1]]);
        assert!(probs[[1, 1]] > probs[[1, 0]]);
    }

    #[test]
    fn test_fit_rejects_empty_input() {
        let x = Array2::<f64>::zeros((0, 2));
        let result = PositionTrainer::new(quick_config(), 4).fit(&x, &[]);
        assert!(matches!(result, Err(PipelineError::EmptyCorpus)));
    }

    #[test]
    fn test_constant_feature_has_no_importance() {
        let x = Array2::from_shape_vec((6, 2), vec![1.0, 0.0, 1.0, 5.0, 1.0, 0.0, 1.0, 5.0, 1.0, 0.0, 1.0, 5.0])
            .unwrap();
        let labels = vec![0, 1, 0, 1, 0, 1];
        let (model, _) = PositionTrainer::new(quick_config(), 2).fit(&x, &labels).unwrap();

        let importance = model.feature_importance();
        assert!(importance[0] < 1e-9);
        assert!(importance[1] > importance[0]);
    }

    #[test]
    fn test_train_requires_labeled_rows() {
        let mut entry = RaceEntry::new("R1", "A");
        entry.odds = Some(2.0);
        let table = RaceTable::from_entries(vec![entry]).unwrap();

        let result = train(&table, &ModelConfig::default(), &quick_config(), None);
        assert!(matches!(result, Err(PipelineError::EmptyCorpus)));

        let empty = RaceTable::default();
        let result = train(&empty, &ModelConfig::default(), &quick_config(), None);
        assert!(matches!(result, Err(PipelineError::EmptyCorpus)));
    }

    #[test]
    fn test_extend_policy_keeps_previous_codes() {
        let mut previous = FeatureEncoder::new();
        let mut old = RaceEntry::new("R0", "Z");
        old.weather = Some("雪".to_string());
        previous.fit(crate::encoder::CategoricalField::Weather, &[old]);

        let rows: Vec<RaceEntry> = (0..4)
            .map(|i| {
                let mut e = RaceEntry::new("R1", format!("H{}", i));
                e.weather = Some("晴".to_string());
                e.odds = Some(2.0 + i as f64);
                e.finish_position = Some(i + 1);
                e
            })
            .collect();
        let table = RaceTable::from_entries(rows).unwrap();

        let extend = TrainingConfig {
            encoder_policy: EncoderPolicy::Extend,
            ..quick_config()
        };
        let extended = train(&table, &ModelConfig::default(), &extend, Some(previous.state())).unwrap();
        let codes = extended.encoder.codes(crate::encoder::CategoricalField::Weather).unwrap();
        assert_eq!(codes.get("雪"), Some(&1));
        assert_eq!(codes.get("晴"), Some(&2));

        let fresh = train(&table, &ModelConfig::default(), &quick_config(), Some(previous.state())).unwrap();
        let codes = fresh.encoder.codes(crate::encoder::CategoricalField::Weather).unwrap();
        assert!(!codes.contains_key("雪"));
        assert_eq!(codes.get("晴"), Some(&1));
    }
}
