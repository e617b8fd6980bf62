//! Feature assembly for model input.
//!
//! Combines raw entry fields, historical aggregates and encoded
//! categoricals into a fixed-width numeric row per entry. The resulting
//! column order is stored with the trained model and compared verbatim on
//! every inference call.

use ndarray::Array2;

use crate::encoder::{CategoricalField, FeatureEncoder, FittedEncoderState};
use crate::error::PipelineError;
use crate::stats::HistoricalStats;
use crate::types::{columns, RaceEntry, RaceTable};

/// Feature columns in canonical model input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureColumn {
    // Raw (4)
    CourseLength,
    HorseWeight,
    Odds,
    Popularity,
    // Categorical (4)
    Weather,
    TrackCondition,
    Jockey,
    Trainer,
    // Horse history (3)
    AvgPosition,
    WinRate,
    PlaceRate,
    // Jockey/Trainer history (2)
    JockeyWinRate,
    TrainerWinRate,
}

impl FeatureColumn {
    pub const ALL: [FeatureColumn; 13] = [
        FeatureColumn::CourseLength,
        FeatureColumn::HorseWeight,
        FeatureColumn::Odds,
        FeatureColumn::Popularity,
        FeatureColumn::Weather,
        FeatureColumn::TrackCondition,
        FeatureColumn::Jockey,
        FeatureColumn::Trainer,
        FeatureColumn::AvgPosition,
        FeatureColumn::WinRate,
        FeatureColumn::PlaceRate,
        FeatureColumn::JockeyWinRate,
        FeatureColumn::TrainerWinRate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FeatureColumn::CourseLength => "course_length",
            FeatureColumn::HorseWeight => "horse_weight",
            FeatureColumn::Odds => "odds",
            FeatureColumn::Popularity => "popularity",
            FeatureColumn::Weather => "weather",
            FeatureColumn::TrackCondition => "track_condition",
            FeatureColumn::Jockey => "jockey_name",
            FeatureColumn::Trainer => "trainer_name",
            FeatureColumn::AvgPosition => "avg_position",
            FeatureColumn::WinRate => "win_rate",
            FeatureColumn::PlaceRate => "place_rate",
            FeatureColumn::JockeyWinRate => "jockey_win_rate",
            FeatureColumn::TrainerWinRate => "trainer_win_rate",
        }
    }

    /// Source column the feature is derived from.
    pub fn source_column(&self) -> &'static str {
        match self {
            FeatureColumn::CourseLength => columns::COURSE_LENGTH,
            FeatureColumn::HorseWeight => columns::HORSE_WEIGHT,
            FeatureColumn::Odds => columns::ODDS,
            FeatureColumn::Popularity => columns::POPULARITY,
            FeatureColumn::Weather => columns::WEATHER,
            FeatureColumn::TrackCondition => columns::TRACK_CONDITION,
            FeatureColumn::Jockey | FeatureColumn::JockeyWinRate => columns::JOCKEY_NAME,
            FeatureColumn::Trainer | FeatureColumn::TrainerWinRate => columns::TRAINER_NAME,
            FeatureColumn::AvgPosition | FeatureColumn::WinRate | FeatureColumn::PlaceRate => {
                columns::HORSE_NAME
            }
        }
    }

    pub fn categorical(&self) -> Option<CategoricalField> {
        match self {
            FeatureColumn::Weather => Some(CategoricalField::Weather),
            FeatureColumn::TrackCondition => Some(CategoricalField::TrackCondition),
            FeatureColumn::Jockey => Some(CategoricalField::Jockey),
            FeatureColumn::Trainer => Some(CategoricalField::Trainer),
            _ => None,
        }
    }
}

/// Whether categorical codes are learned or looked up.
pub enum EncoderMode<'e> {
    /// Training: learn codes from the table being assembled
    Fit(&'e mut FeatureEncoder),
    /// Inference: reuse a fitted mapping, unseen values become 0
    Transform(&'e FittedEncoderState),
}

/// Assembled numeric features, one row per input entry.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    names: Vec<String>,
    values: Array2<f64>,
}

impl FeatureTable {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    /// Fail unless the column order equals the trained order exactly.
    pub fn ensure_matches(&self, trained: &[String]) -> Result<(), PipelineError> {
        if self.names.as_slice() == trained {
            Ok(())
        } else {
            Err(PipelineError::FeatureMismatch {
                expected: trained.to_vec(),
                actual: self.names.clone(),
            })
        }
    }
}

/// Builds feature tables against a fixed set of historical aggregates.
pub struct FeatureAssembler<'a> {
    stats: &'a HistoricalStats,
}

impl<'a> FeatureAssembler<'a> {
    pub fn new(stats: &'a HistoricalStats) -> Self {
        Self { stats }
    }

    /// Feature columns a table can supply, in canonical order.
    pub fn active_columns(table: &RaceTable) -> Vec<FeatureColumn> {
        FeatureColumn::ALL
            .into_iter()
            .filter(|c| table.has_column(c.source_column()))
            .collect()
    }

    /// Assemble the feature table for every row of `table`.
    pub fn assemble(&self, table: &RaceTable, mode: EncoderMode<'_>) -> FeatureTable {
        let active = Self::active_columns(table);
        let entries = table.entries();

        let state: &FittedEncoderState = match mode {
            EncoderMode::Fit(encoder) => {
                for field in active.iter().filter_map(|c| c.categorical()) {
                    encoder.fit(field, entries);
                }
                let encoder: &FeatureEncoder = encoder;
                encoder.state()
            }
            EncoderMode::Transform(state) => state,
        };

        let mut values = Array2::<f64>::zeros((entries.len(), active.len()));
        for (i, entry) in entries.iter().enumerate() {
            for (j, column) in active.iter().enumerate() {
                values[[i, j]] = self.value(entry, *column, state);
            }
        }

        FeatureTable {
            names: active.iter().map(|c| c.name().to_string()).collect(),
            values,
        }
    }

    fn value(&self, entry: &RaceEntry, column: FeatureColumn, state: &FittedEncoderState) -> f64 {
        if let Some(field) = column.categorical() {
            return state.transform(field, field.category(entry)) as f64;
        }

        let value = match column {
            FeatureColumn::CourseLength => entry.course_length,
            FeatureColumn::HorseWeight => entry.horse_weight,
            FeatureColumn::Odds => entry.odds,
            FeatureColumn::Popularity => entry.popularity,
            FeatureColumn::AvgPosition => Some(self.stats.horse(&entry.horse_name).avg_position),
            FeatureColumn::WinRate => Some(self.stats.horse(&entry.horse_name).win_rate),
            FeatureColumn::PlaceRate => Some(self.stats.horse(&entry.horse_name).place_rate),
            FeatureColumn::JockeyWinRate => entry
                .jockey_name
                .as_deref()
                .map(|name| self.stats.jockey(name).win_rate),
            FeatureColumn::TrainerWinRate => entry
                .trainer_name
                .as_deref()
                .map(|name| self.stats.trainer(name).win_rate),
            _ => None,
        };

        // Missing numerics fill with 0
        value.filter(|v| v.is_finite()).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn full_entry(race: &str, horse: &str, position: Option<u32>) -> RaceEntry {
        RaceEntry {
            race_id: race.to_string(),
            race_date: None,
            horse_name: horse.to_string(),
            jockey_name: Some(format!("J-{}", horse)),
            trainer_name: Some(format!("T-{}", horse)),
            course_length: Some(1200.0),
            surface: Some("dirt".to_string()),
            weather: Some("晴".to_string()),
            track_condition: Some("良".to_string()),
            horse_weight: Some(480.0),
            odds: Some(3.5),
            popularity: Some(2.0),
            finish_position: position,
        }
    }

    #[test]
    fn test_canonical_order_with_all_columns() {
        let table = RaceTable::from_entries(vec![full_entry("R1", "A", Some(1))]).unwrap();
        let stats = HistoricalStats::from_corpus(table.entries());
        let mut encoder = FeatureEncoder::new();

        let features = FeatureAssembler::new(&stats).assemble(&table, EncoderMode::Fit(&mut encoder));
        let expected: Vec<&str> = FeatureColumn::ALL.iter().map(|c| c.name()).collect();
        assert_eq!(features.names(), expected.as_slice());
        assert_eq!(features.nrows(), 1);
    }

    #[test]
    fn test_assembly_is_order_stable() {
        let rows = vec![full_entry("R1", "A", Some(1)), full_entry("R1", "B", Some(2))];
        let table = RaceTable::from_entries(rows).unwrap();
        let stats = HistoricalStats::from_corpus(table.entries());
        let mut encoder = FeatureEncoder::new();
        let assembler = FeatureAssembler::new(&stats);

        let first = assembler.assemble(&table, EncoderMode::Fit(&mut encoder));
        let second = assembler.assemble(&table, EncoderMode::Fit(&mut encoder));
        assert_eq!(first.names(), second.names());
        assert_eq!(first.values(), second.values());

        let state = encoder.state().clone();
        let third = assembler.assemble(&table, EncoderMode::Transform(&state));
        let fourth = assembler.assemble(&table, EncoderMode::Transform(&state));
        assert_eq!(third.values(), fourth.values());
    }

    #[test]
    fn test_missing_history_and_values_fill_zero() {
        let mut entry = full_entry("R9", "New", None);
        entry.horse_weight = None;
        let table = RaceTable::with_columns(
            vec![entry],
            ["horse_weight", "odds"].iter().map(|s| s.to_string()).collect(),
        )
        .unwrap();
        let stats = HistoricalStats::default();

        let features = FeatureAssembler::new(&stats)
            .assemble(&table, EncoderMode::Transform(&FittedEncoderState::default()));

        assert_eq!(
            features.names(),
            &["horse_weight", "odds", "avg_position", "win_rate", "place_rate"]
        );
        let row = features.values().row(0);
        assert_eq!(row[0], 0.0);
        assert!((row[1] - 3.5).abs() < 1e-9);
        assert_eq!(row[2], 0.0);
    }

    #[test]
    fn test_unseen_categories_encode_to_zero() {
        let train = RaceTable::from_entries(vec![full_entry("R1", "A", Some(1))]).unwrap();
        let stats = HistoricalStats::from_corpus(train.entries());
        let mut encoder = FeatureEncoder::new();
        let assembler = FeatureAssembler::new(&stats);
        assembler.assemble(&train, EncoderMode::Fit(&mut encoder));

        let mut unseen = full_entry("R2", "B", None);
        unseen.weather = Some("雪".to_string());
        let infer = RaceTable::from_entries(vec![unseen]).unwrap();
        let state = encoder.into_state();
        let features = assembler.assemble(&infer, EncoderMode::Transform(&state));

        let weather_idx = features.names().iter().position(|n| n == "weather").unwrap();
        let jockey_idx = features.names().iter().position(|n| n == "jockey_name").unwrap();
        assert_eq!(features.values()[[0, weather_idx]], 0.0);
        assert_eq!(features.values()[[0, jockey_idx]], 0.0);
    }

    #[test]
    fn test_person_rates_joined_by_name() {
        let history = vec![full_entry("R1", "A", Some(1)), full_entry("R1", "B", Some(2))];
        let stats = HistoricalStats::from_corpus(&history);
        let table = RaceTable::from_entries(vec![full_entry("R2", "A", None)]).unwrap();

        let features = FeatureAssembler::new(&stats)
            .assemble(&table, EncoderMode::Transform(&FittedEncoderState::default()));
        let idx = features
            .names()
            .iter()
            .position(|n| n == "jockey_win_rate")
            .unwrap();
        assert!((features.values()[[0, idx]] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_ensure_matches_detects_missing_column() {
        let mut columns: BTreeSet<String> = ["course_length", "horse_weight", "odds", "popularity", "weather"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let rows = vec![full_entry("R1", "A", Some(1))];
        let stats = HistoricalStats::default();
        let assembler = FeatureAssembler::new(&stats);
        let mut encoder = FeatureEncoder::new();

        let trained_table = RaceTable::with_columns(rows.clone(), columns.clone()).unwrap();
        let trained = assembler.assemble(&trained_table, EncoderMode::Fit(&mut encoder));
        assert_eq!(trained.names().len(), 8);

        columns.remove("weather");
        let infer_table = RaceTable::with_columns(rows, columns).unwrap();
        let state = encoder.into_state();
        let inferred = assembler.assemble(&infer_table, EncoderMode::Transform(&state));
        assert_eq!(inferred.names().len(), 7);

        match inferred.ensure_matches(trained.names()) {
            Err(PipelineError::FeatureMismatch { expected, actual }) => {
                assert_eq!(expected.len(), 8);
                assert_eq!(actual.len(), 7);
            }
            other => panic!("Expected FeatureMismatch, got {:?}", other),
        }
        assert!(trained.ensure_matches(trained.names()).is_ok());
    }
}
