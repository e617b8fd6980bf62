//! Record types shared across the pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

/// Source column names understood by the pipeline.
pub mod columns {
    pub const RACE_ID: &str = "race_id";
    pub const RACE_DATE: &str = "race_date";
    pub const HORSE_NAME: &str = "horse_name";
    pub const JOCKEY_NAME: &str = "jockey_name";
    pub const TRAINER_NAME: &str = "trainer_name";
    pub const COURSE_LENGTH: &str = "course_length";
    pub const SURFACE: &str = "surface";
    pub const HORSE_WEIGHT: &str = "horse_weight";
    pub const ODDS: &str = "odds";
    pub const POPULARITY: &str = "popularity";
    pub const WEATHER: &str = "weather";
    pub const TRACK_CONDITION: &str = "track_condition";
    pub const FINISH_POSITION: &str = "finish_position";

    /// Columns a table may or may not carry.
    pub const OPTIONAL: [&str; 11] = [
        RACE_DATE,
        JOCKEY_NAME,
        TRAINER_NAME,
        COURSE_LENGTH,
        SURFACE,
        HORSE_WEIGHT,
        ODDS,
        POPULARITY,
        WEATHER,
        TRACK_CONDITION,
        FINISH_POSITION,
    ];
}

/// One horse's participation in one race.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RaceEntry {
    pub race_id: String,
    #[serde(default)]
    pub race_date: Option<NaiveDate>,
    pub horse_name: String,
    #[serde(default)]
    pub jockey_name: Option<String>,
    #[serde(default)]
    pub trainer_name: Option<String>,
    #[serde(default)]
    pub course_length: Option<f64>,
    #[serde(default)]
    pub surface: Option<String>,
    #[serde(default)]
    pub weather: Option<String>,
    #[serde(default)]
    pub track_condition: Option<String>,
    #[serde(default)]
    pub horse_weight: Option<f64>,
    #[serde(default)]
    pub odds: Option<f64>,
    #[serde(default)]
    pub popularity: Option<f64>,
    /// None until the race is settled
    #[serde(default)]
    pub finish_position: Option<u32>,
}

impl RaceEntry {
    pub fn new(race_id: impl Into<String>, horse_name: impl Into<String>) -> Self {
        Self {
            race_id: race_id.into(),
            horse_name: horse_name.into(),
            ..Default::default()
        }
    }

    /// Check identifiers and numeric fields.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.race_id.trim().is_empty() {
            return Err(PipelineError::InvalidInput("race_id is empty".to_string()));
        }
        if self.horse_name.trim().is_empty() {
            return Err(PipelineError::InvalidInput(format!(
                "horse_name is empty in race {}",
                self.race_id
            )));
        }
        if self.finish_position == Some(0) {
            return Err(PipelineError::InvalidInput(format!(
                "finish_position must be >= 1 for {} in race {}",
                self.horse_name, self.race_id
            )));
        }
        let numerics = [
            (columns::COURSE_LENGTH, self.course_length),
            (columns::HORSE_WEIGHT, self.horse_weight),
            (columns::ODDS, self.odds),
            (columns::POPULARITY, self.popularity),
        ];
        for (name, value) in numerics {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(PipelineError::InvalidInput(format!(
                        "{} is not finite for {} in race {}",
                        name, self.horse_name, self.race_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether this entry carries a value for the given source column.
    fn has_value(&self, column: &str) -> bool {
        match column {
            columns::RACE_DATE => self.race_date.is_some(),
            columns::JOCKEY_NAME => self.jockey_name.is_some(),
            columns::TRAINER_NAME => self.trainer_name.is_some(),
            columns::COURSE_LENGTH => self.course_length.is_some(),
            columns::SURFACE => self.surface.is_some(),
            columns::HORSE_WEIGHT => self.horse_weight.is_some(),
            columns::ODDS => self.odds.is_some(),
            columns::POPULARITY => self.popularity.is_some(),
            columns::WEATHER => self.weather.is_some(),
            columns::TRACK_CONDITION => self.track_condition.is_some(),
            columns::FINISH_POSITION => self.finish_position.is_some(),
            _ => false,
        }
    }
}

/// A set of entries together with the source columns they were read with.
///
/// The column set decides which features are assembled, so a table read
/// without e.g. `weather` yields no weather feature even though every
/// `RaceEntry` has the field.
#[derive(Debug, Clone, Default)]
pub struct RaceTable {
    entries: Vec<RaceEntry>,
    columns: BTreeSet<String>,
}

impl RaceTable {
    /// Build a table whose column set is every optional column that at
    /// least one entry carries.
    pub fn from_entries(entries: Vec<RaceEntry>) -> Result<Self, PipelineError> {
        let columns = columns::OPTIONAL
            .iter()
            .filter(|c| entries.iter().any(|e| e.has_value(c)))
            .map(|c| c.to_string())
            .collect();
        Self::with_columns(entries, columns)
    }

    /// Build a table with an explicit column set (e.g. a CSV header).
    pub fn with_columns(
        entries: Vec<RaceEntry>,
        columns: BTreeSet<String>,
    ) -> Result<Self, PipelineError> {
        for entry in &entries {
            entry.validate()?;
        }
        Ok(Self { entries, columns })
    }

    pub fn entries(&self) -> &[RaceEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<RaceEntry> {
        self.entries
    }

    pub fn columns(&self) -> &BTreeSet<String> {
        &self.columns
    }

    pub fn has_column(&self, column: &str) -> bool {
        column == columns::RACE_ID || column == columns::HORSE_NAME || self.columns.contains(column)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Split into one table per race, keeping first-appearance order of
    /// races and input order of rows within each race.
    pub fn split_by_race(&self) -> Vec<RaceTable> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: std::collections::HashMap<String, Vec<RaceEntry>> =
            std::collections::HashMap::new();

        for entry in &self.entries {
            if !groups.contains_key(&entry.race_id) {
                order.push(entry.race_id.clone());
            }
            groups
                .entry(entry.race_id.clone())
                .or_default()
                .push(entry.clone());
        }

        order
            .into_iter()
            .filter_map(|id| groups.remove(&id))
            .map(|entries| RaceTable {
                entries,
                columns: self.columns.clone(),
            })
            .collect()
    }
}

/// Per-horse model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub horse_name: String,
    /// 1-based predicted finishing position
    pub predicted_position: usize,
    /// Maximum class probability
    pub confidence: f64,
    pub probabilities: Vec<f64>,
}

impl Prediction {
    /// Shorthand used by callers that only know rank and confidence.
    pub fn new(horse_name: impl Into<String>, predicted_position: usize, confidence: f64) -> Self {
        Self {
            horse_name: horse_name.into(),
            predicted_position,
            confidence,
            probabilities: Vec::new(),
        }
    }
}

/// Bet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetType {
    Win,   // 単勝
    Place, // 複勝
}

impl BetType {
    pub fn name(&self) -> &'static str {
        match self {
            BetType::Win => "win",
            BetType::Place => "place",
        }
    }
}

impl fmt::Display for BetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for BetType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "win" | "tansho" => Ok(BetType::Win),
            "place" | "fukusho" => Ok(BetType::Place),
            other => Err(PipelineError::InvalidInput(format!(
                "unknown bet type: {}",
                other
            ))),
        }
    }
}

/// Qualitative risk label of a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        };
        f.pad(s)
    }
}

/// Sized bet for one horse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetRecommendation {
    pub horse_name: String,
    pub bet_type: BetType,
    pub predicted_position: usize,
    /// Integer currency units, never below the configured minimum stake
    pub stake: u64,
    pub confidence: f64,
    pub estimated_odds: f64,
    pub expected_return: f64,
    pub risk_tier: RiskTier,
}

/// Realized outcome of a placed bet, supplied by the settlement source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub horse_name: String,
    pub bet_type: BetType,
    pub stake: u64,
    /// Actual finishing position
    pub actual_result: u32,
    /// Settled win odds
    pub actual_odds: f64,
}

/// Append-only record of one settled bet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub settled_at: DateTime<Utc>,
    pub horse_name: String,
    pub bet_type: BetType,
    pub stake: u64,
    pub actual_result: u32,
    pub actual_odds: f64,
    pub hit: bool,
    pub payout: f64,
    pub profit_loss: f64,
}
