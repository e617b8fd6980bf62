//! Categorical feature encoding.
//!
//! Observed categories get codes `1..=n` in sorted order. Code 0 is the
//! sentinel for anything the encoder never saw during fit, so a new jockey
//! or an unfamiliar weather string at inference time encodes instead of
//! failing.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{columns, RaceEntry};

/// Code returned for categories not seen during fit.
pub const UNSEEN_CODE: u32 = 0;

/// Placeholder category recorded for missing values.
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Categorical fields that are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CategoricalField {
    Weather,
    TrackCondition,
    Jockey,
    Trainer,
}

impl CategoricalField {
    pub const ALL: [CategoricalField; 4] = [
        CategoricalField::Weather,
        CategoricalField::TrackCondition,
        CategoricalField::Jockey,
        CategoricalField::Trainer,
    ];

    /// Source column (also the feature name).
    pub fn column(&self) -> &'static str {
        match self {
            CategoricalField::Weather => columns::WEATHER,
            CategoricalField::TrackCondition => columns::TRACK_CONDITION,
            CategoricalField::Jockey => columns::JOCKEY_NAME,
            CategoricalField::Trainer => columns::TRAINER_NAME,
        }
    }

    pub fn from_column(column: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.column() == column)
    }

    /// Raw category of an entry, with missing values mapped to the placeholder.
    pub fn category<'a>(&self, entry: &'a RaceEntry) -> &'a str {
        let value = match self {
            CategoricalField::Weather => entry.weather.as_deref(),
            CategoricalField::TrackCondition => entry.track_condition.as_deref(),
            CategoricalField::Jockey => entry.jockey_name.as_deref(),
            CategoricalField::Trainer => entry.trainer_name.as_deref(),
        };
        value.unwrap_or(UNKNOWN_CATEGORY)
    }
}

/// Fitted category → code mappings keyed by column name.
///
/// Read-only once training finishes; persisted inside the model artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FittedEncoderState {
    fields: BTreeMap<String, BTreeMap<String, u32>>,
}

impl FittedEncoderState {
    pub fn codes(&self, field: CategoricalField) -> Option<&BTreeMap<String, u32>> {
        self.fields.get(field.column())
    }

    pub fn has_field(&self, column: &str) -> bool {
        self.fields.contains_key(column)
    }

    /// Look up a category; unseen values map to [`UNSEEN_CODE`].
    pub fn transform(&self, field: CategoricalField, category: &str) -> u32 {
        self.codes(field)
            .and_then(|codes| codes.get(category).copied())
            .unwrap_or(UNSEEN_CODE)
    }
}

/// Stateful encoder with fit and transform modes.
#[derive(Debug, Clone, Default)]
pub struct FeatureEncoder {
    state: FittedEncoderState,
}

impl FeatureEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue from a previously fitted state.
    pub fn from_state(state: FittedEncoderState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &FittedEncoderState {
        &self.state
    }

    pub fn into_state(self) -> FittedEncoderState {
        self.state
    }

    /// Learn codes for `field` from the given entries.
    ///
    /// Codes already assigned are kept; new categories are appended after
    /// the current highest code in sorted order. Use [`refit`](Self::refit)
    /// to discard a field's mapping first.
    pub fn fit(&mut self, field: CategoricalField, entries: &[RaceEntry]) {
        let observed: BTreeSet<&str> = entries.iter().map(|e| field.category(e)).collect();
        let codes = self
            .state
            .fields
            .entry(field.column().to_string())
            .or_default();

        let mut next = codes.values().copied().max().unwrap_or(UNSEEN_CODE) + 1;
        for category in observed {
            if !codes.contains_key(category) {
                codes.insert(category.to_string(), next);
                next += 1;
            }
        }
    }

    /// Drop the existing mapping for `field` and fit it again.
    pub fn refit(&mut self, field: CategoricalField, entries: &[RaceEntry]) {
        self.state.fields.remove(field.column());
        self.fit(field, entries);
    }

    pub fn transform(&self, field: CategoricalField, entry: &RaceEntry) -> u32 {
        self.state.transform(field, field.category(entry))
    }
}
