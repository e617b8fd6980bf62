//! Error types for the prediction pipeline, model artifacts and betting.

use std::path::PathBuf;
use thiserror::Error;

/// Non-recoverable pipeline failures surfaced to the caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Training corpus is empty (no rows with a finishing position)")]
    EmptyCorpus,

    #[error("No trained model is loaded")]
    ModelNotLoaded,

    #[error(
        "Feature mismatch: model was trained on {} features {:?}, inference produced {} features {:?}",
        expected.len(),
        expected,
        actual.len(),
        actual
    )]
    FeatureMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Model artifact store errors.
///
/// `NotFound` means no model has been trained yet and is reported
/// separately from an artifact that exists but cannot be trusted.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Model artifact not found: {0}")]
    NotFound(PathBuf),

    #[error("Model artifact {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Artifact serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Betting input errors.
#[derive(Debug, Error, PartialEq)]
pub enum BettingError {
    #[error("Odds must be finite and greater than 1.0, got {0}")]
    InvalidOdds(f64),

    #[error("Probability must be in (0, 1], got {0}")]
    InvalidProbability(f64),

    #[error("Invalid settlement: {0}")]
    InvalidSettlement(String),
}
