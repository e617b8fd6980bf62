//! Race-level prediction and accuracy evaluation.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::artifact::{ModelStore, TrainedModel};
use crate::error::{ArtifactError, PipelineError};
use crate::features::{EncoderMode, FeatureAssembler};
use crate::stats::HistoricalStats;
use crate::types::{Prediction, RaceEntry, RaceTable};

/// Accuracy of first-ranked and top-3 picks over a set of races.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccuracyReport {
    pub total_races: usize,
    pub win_hits: usize,
    pub win_accuracy: f64,
    pub place_hits: usize,
    pub place_accuracy: f64,
}

/// Predicts finishing order for one race at a time.
///
/// Holds the trained unit explicitly and the historical corpus its
/// per-race statistics are derived from.
pub struct RacePredictor {
    model: Option<TrainedModel>,
    history: Vec<RaceEntry>,
    min_confidence: f64,
}

impl RacePredictor {
    pub fn new(model: Option<TrainedModel>, history: Vec<RaceEntry>, min_confidence: f64) -> Self {
        Self {
            model,
            history,
            min_confidence,
        }
    }

    /// Load the model from a store.
    ///
    /// A missing artifact yields a predictor with no model loaded; a
    /// corrupt one is an error.
    pub fn from_store(
        store: &dyn ModelStore,
        history: Vec<RaceEntry>,
        min_confidence: f64,
    ) -> Result<Self, ArtifactError> {
        let model = match store.load() {
            Ok(model) => Some(model),
            Err(ArtifactError::NotFound(path)) => {
                warn!("No trained model at {}", path.display());
                None
            }
            Err(e) => return Err(e),
        };
        Ok(Self::new(model, history, min_confidence))
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> Option<&TrainedModel> {
        self.model.as_ref()
    }

    pub fn history(&self) -> &[RaceEntry] {
        &self.history
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    /// Predict every horse of a single race.
    ///
    /// Returns predictions at or above the minimum confidence, ordered by
    /// predicted position with input order kept for ties.
    pub fn predict_race(&self, race: &RaceTable) -> Result<Vec<Prediction>, PipelineError> {
        let model = self.model.as_ref().ok_or(PipelineError::ModelNotLoaded)?;

        let Some(first) = race.entries().first() else {
            return Ok(Vec::new());
        };
        if let Some(other) = race.entries().iter().find(|e| e.race_id != first.race_id) {
            return Err(PipelineError::InvalidInput(format!(
                "race table mixes races {} and {}",
                first.race_id, other.race_id
            )));
        }

        let stats = HistoricalStats::before_race(&self.history, &first.race_id, first.race_date);
        let features = FeatureAssembler::new(&stats)
            .assemble(race, EncoderMode::Transform(&model.encoder));
        features.ensure_matches(&model.feature_names)?;

        let probs = model.model.predict_proba(features.values());
        let mut predictions = Vec::with_capacity(race.len());
        for (entry, row) in race.entries().iter().zip(probs.rows()) {
            let prediction = build_prediction(&entry.horse_name, row)?;
            if prediction.confidence < self.min_confidence {
                debug!(
                    "Dropping {} (confidence {:.3} < {:.3})",
                    prediction.horse_name, prediction.confidence, self.min_confidence
                );
                continue;
            }
            predictions.push(prediction);
        }

        predictions.sort_by_key(|p| p.predicted_position);
        Ok(predictions)
    }

    /// Replay settled races and measure pick accuracy.
    ///
    /// A race counts as a win hit when the first-ranked prediction is the
    /// actual winner, and as a place hit when any horse predicted in the
    /// top 3 actually finished in the top 3. Races with no predictions
    /// are skipped.
    pub fn evaluate(&self, races: &[RaceTable]) -> Result<AccuracyReport, PipelineError> {
        let mut report = AccuracyReport::default();

        for race in races {
            let predictions = self.predict_race(race)?;
            if predictions.is_empty() {
                continue;
            }
            report.total_races += 1;

            let winner = race
                .entries()
                .iter()
                .find(|e| e.finish_position == Some(1))
                .map(|e| e.horse_name.as_str());
            if winner == Some(predictions[0].horse_name.as_str()) {
                report.win_hits += 1;
            }

            let top3_actual: HashSet<&str> = race
                .entries()
                .iter()
                .filter(|e| matches!(e.finish_position, Some(p) if p <= 3))
                .map(|e| e.horse_name.as_str())
                .collect();
            if predictions
                .iter()
                .filter(|p| p.predicted_position <= 3)
                .any(|p| top3_actual.contains(p.horse_name.as_str()))
            {
                report.place_hits += 1;
            }
        }

        if report.total_races > 0 {
            let total = report.total_races as f64;
            report.win_accuracy = report.win_hits as f64 / total;
            report.place_accuracy = report.place_hits as f64 / total;
        }
        Ok(report)
    }
}

/// Most likely position for one horse; the first bucket wins ties.
fn build_prediction(horse_name: &str, probs: ArrayView1<f64>) -> Result<Prediction, PipelineError> {
    let (best, confidence) = probs
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |acc, (i, p)| if p > acc.1 { (i, p) } else { acc });

    if !confidence.is_finite() {
        return Err(PipelineError::InvalidInput(format!(
            "no finite position probability for {}",
            horse_name
        )));
    }

    Ok(Prediction {
        horse_name: horse_name.to_string(),
        predicted_position: best + 1,
        confidence: confidence.clamp(0.0, 1.0),
        probabilities: probs.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::TemperatureScaling;
    use crate::encoder::FittedEncoderState;
    use crate::model::{ModelParams, PositionRankingModel, TrainingReport};
    use ndarray::{array, Array1};

    /// Odds plus horse aggregates; only odds carry weight. Low odds
    /// favour bucket 0, high odds bucket 2.
    fn odds_model() -> TrainedModel {
        let model = PositionRankingModel {
            params: ModelParams {
                means: array![5.0, 0.0, 0.0, 0.0],
                scales: Array1::ones(4),
                weights: array![
                    [-3.0, 0.0, 3.0],
                    [0.0, 0.0, 0.0],
                    [0.0, 0.0, 0.0],
                    [0.0, 0.0, 0.0]
                ],
                bias: Array1::zeros(3),
            },
            calibration: TemperatureScaling::default(),
        };
        let report = TrainingReport {
            train_rows: 0,
            validation_rows: 0,
            epochs_run: 0,
            best_epoch: 0,
            validation_loss: 0.0,
            validation_accuracy: 0.0,
            temperature: 1.0,
        };
        let names = ["odds", "avg_position", "win_rate", "place_rate"];
        TrainedModel::new(
            names.iter().map(|s| s.to_string()).collect(),
            FittedEncoderState::default(),
            model,
            report,
        )
    }

    fn single_feature_model() -> TrainedModel {
        let mut model = odds_model();
        model.feature_names.truncate(1);
        model
    }

    fn runner(race: &str, horse: &str, odds: f64, finish: Option<u32>) -> RaceEntry {
        RaceEntry {
            odds: Some(odds),
            finish_position: finish,
            ..RaceEntry::new(race, horse)
        }
    }

    #[test]
    fn test_unloaded_model_is_an_error() {
        let predictor = RacePredictor::new(None, Vec::new(), 0.0);
        let race = RaceTable::from_entries(vec![runner("R1", "A", 2.0, None)]).unwrap();
        assert!(matches!(
            predictor.predict_race(&race),
            Err(PipelineError::ModelNotLoaded)
        ));
    }

    #[test]
    fn test_feature_mismatch_is_an_error() {
        // Trained on odds only; inference adds horse aggregates
        let predictor = RacePredictor::new(Some(single_feature_model()), Vec::new(), 0.0);
        let race = RaceTable::from_entries(vec![runner("R1", "A", 2.0, None)]).unwrap();
        assert!(matches!(
            predictor.predict_race(&race),
            Err(PipelineError::FeatureMismatch { .. })
        ));
    }

    #[test]
    fn test_predictions_sorted_and_filtered() {
        let predictor = RacePredictor::new(Some(odds_model()), Vec::new(), 0.0);
        let race = RaceTable::from_entries(vec![
            runner("R1", "Longshot", 9.0, None),
            runner("R1", "Favourite", 1.0, None),
            runner("R1", "Middle", 5.0, None),
        ])
        .unwrap();

        let predictions = predictor.predict_race(&race).unwrap();
        assert_eq!(predictions.len(), 3);
        assert_eq!(predictions[0].horse_name, "Favourite");
        assert_eq!(predictions[0].predicted_position, 1);
        assert_eq!(predictions[2].horse_name, "Longshot");
        assert_eq!(predictions[2].predicted_position, 3);
        for p in &predictions {
            assert!((p.probabilities.iter().sum::<f64>() - 1.0).abs() < 1e-9);
            assert!(p.confidence >= 0.0 && p.confidence <= 1.0);
        }

        // Middle horse has uniform probabilities (1/3) and is dropped
        let strict = RacePredictor::new(Some(odds_model()), Vec::new(), 0.5);
        let names: Vec<String> = strict
            .predict_race(&race)
            .unwrap()
            .into_iter()
            .map(|p| p.horse_name)
            .collect();
        assert_eq!(names, vec!["Favourite", "Longshot"]);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let predictor = RacePredictor::new(Some(odds_model()), Vec::new(), 0.0);
        let race = RaceTable::from_entries(vec![
            runner("R1", "B", 1.0, None),
            runner("R1", "A", 1.0, None),
        ])
        .unwrap();
        let predictions = predictor.predict_race(&race).unwrap();
        assert_eq!(predictions[0].horse_name, "B");
        assert_eq!(predictions[1].horse_name, "A");
    }

    #[test]
    fn test_mixed_races_rejected() {
        let predictor = RacePredictor::new(Some(odds_model()), Vec::new(), 0.0);
        let race = RaceTable::from_entries(vec![
            runner("R1", "A", 1.0, None),
            runner("R2", "B", 1.0, None),
        ])
        .unwrap();
        assert!(matches!(
            predictor.predict_race(&race),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_build_prediction_picks_most_likely_position() {
        let probs = array![0.2, 0.5, 0.3];
        let prediction = build_prediction("A", probs.view()).unwrap();
        assert_eq!(prediction.predicted_position, 2);
        assert!((prediction.confidence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_nan_probabilities_are_an_error() {
        let probs = Array1::from_elem(3, f64::NAN);
        assert!(matches!(
            build_prediction("A", probs.view()),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_evaluate_counts_hits() {
        let predictor = RacePredictor::new(Some(odds_model()), Vec::new(), 0.0);
        let races = vec![
            // Favourite wins
            RaceTable::from_entries(vec![
                runner("R1", "A", 1.0, Some(1)),
                runner("R1", "B", 9.0, Some(2)),
            ])
            .unwrap(),
            // Favourite third, longshot wins
            RaceTable::from_entries(vec![
                runner("R2", "C", 1.0, Some(3)),
                runner("R2", "D", 9.0, Some(1)),
            ])
            .unwrap(),
        ];

        let report = predictor.evaluate(&races).unwrap();
        assert_eq!(report.total_races, 2);
        assert_eq!(report.win_hits, 1);
        assert_eq!(report.place_hits, 2);
        assert!((report.win_accuracy - 0.5).abs() < 1e-9);
        assert!((report.place_accuracy - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_evaluate_skips_races_without_predictions() {
        let predictor = RacePredictor::new(Some(odds_model()), Vec::new(), 0.99);
        let races = vec![RaceTable::from_entries(vec![runner("R1", "A", 5.0, Some(1))]).unwrap()];
        let report = predictor.evaluate(&races).unwrap();
        assert_eq!(report.total_races, 0);
        assert_eq!(report.win_accuracy, 0.0);
    }
}
