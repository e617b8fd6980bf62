//! Configuration for the Keiba ranker.

use serde::{Deserialize, Serialize};

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path of the trained model artifact (JSON)
    #[serde(default = "default_artifact_path")]
    pub artifact_path: String,
    /// Number of finishing-position buckets (maximum field size)
    #[serde(default = "default_max_field_size")]
    pub max_field_size: usize,
}

fn default_artifact_path() -> String {
    "data/models/position_model.json".to_string()
}

fn default_max_field_size() -> usize {
    16
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            artifact_path: default_artifact_path(),
            max_field_size: default_max_field_size(),
        }
    }
}

/// What happens to categorical codes when the model is retrained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderPolicy {
    /// Every retrain builds a new mapping from the training corpus.
    #[default]
    Fresh,
    /// Retraining keeps the previous artifact's codes and appends new categories.
    Extend,
}

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_test_size")]
    pub test_size: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,
    #[serde(default = "default_early_stopping_rounds")]
    pub early_stopping_rounds: usize,
    #[serde(default = "default_l2")]
    pub l2: f64,
    #[serde(default)]
    pub encoder_policy: EncoderPolicy,
}

fn default_test_size() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

fn default_learning_rate() -> f64 {
    0.05
}

fn default_max_epochs() -> usize {
    1000
}

fn default_early_stopping_rounds() -> usize {
    50
}

fn default_l2() -> f64 {
    1e-4
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_size: default_test_size(),
            seed: default_seed(),
            learning_rate: default_learning_rate(),
            max_epochs: default_max_epochs(),
            early_stopping_rounds: default_early_stopping_rounds(),
            l2: default_l2(),
            encoder_policy: EncoderPolicy::default(),
        }
    }
}

/// Betting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BettingConfig {
    /// Predictions below this confidence are ignored
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Kelly fraction cap (fraction of current budget)
    #[serde(default = "default_max_bet_ratio")]
    pub max_bet_ratio: f64,
    /// Smallest stake unit
    #[serde(default = "default_min_stake")]
    pub min_stake: u64,
    /// Largest single stake as a share of the available sub-budget
    #[serde(default = "default_max_stake_share")]
    pub max_stake_share: f64,
    /// Confidence required for a win bet on a predicted winner
    #[serde(default = "default_win_confidence")]
    pub win_confidence: f64,
    /// Share of the current budget allocated to one race
    #[serde(default = "default_budget_ratio")]
    pub budget_ratio: f64,
    #[serde(default = "default_initial_budget")]
    pub initial_budget: f64,
    /// Ledger entries required before strategy advice is given
    #[serde(default = "default_min_history")]
    pub min_history: usize,
}

fn default_min_confidence() -> f64 {
    0.6
}

fn default_max_bet_ratio() -> f64 {
    0.1
}

fn default_min_stake() -> u64 {
    100
}

fn default_max_stake_share() -> f64 {
    0.3
}

fn default_win_confidence() -> f64 {
    0.7
}

fn default_budget_ratio() -> f64 {
    0.1
}

fn default_initial_budget() -> f64 {
    100_000.0
}

fn default_min_history() -> usize {
    10
}

impl Default for BettingConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            max_bet_ratio: default_max_bet_ratio(),
            min_stake: default_min_stake(),
            max_stake_share: default_max_stake_share(),
            win_confidence: default_win_confidence(),
            budget_ratio: default_budget_ratio(),
            initial_budget: default_initial_budget(),
            min_history: default_min_history(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "data/keiba.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub betting: BettingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Load configuration from environment and config file
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // Add config file if exists
            .add_source(config::File::with_name("config").required(false))
            // Override with environment variables (KEIBA_BETTING__MIN_STAKE, etc.)
            .add_source(
                config::Environment::with_prefix("KEIBA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
