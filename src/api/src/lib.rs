//! # keiba-ranker
//!
//! Horse race finishing-position ranking with budgeted bet allocation.
//!
//! The pipeline runs in four stages:
//! - historical statistics and categorical encoding turn a race table into
//!   a numeric feature matrix ([`features`])
//! - a calibrated softmax classifier predicts each runner's finishing
//!   position ([`model`], [`predictor`])
//! - a capped Kelly allocator sizes win and place stakes within a race
//!   budget ([`betting`])
//! - settled bets feed a performance ledger and strategy advice ([`ledger`])
//!
//! ## Example
//!
//! ```no_run
//! use keiba_ranker::artifact::JsonModelStore;
//! use keiba_ranker::betting::BettingAllocator;
//! use keiba_ranker::config::BettingConfig;
//! use keiba_ranker::corpus::read_race_card;
//! use keiba_ranker::predictor::RacePredictor;
//!
//! # fn main() -> anyhow::Result<()> {
//! let store = JsonModelStore::new("models/position_model.json");
//! let predictor = RacePredictor::from_store(&store, Vec::new(), 0.3)?;
//! let card = read_race_card("race.json")?;
//! let predictions = predictor.predict_race(&card.split_by_race()[0])?;
//!
//! let allocator = BettingAllocator::new(BettingConfig::default());
//! for bet in allocator.calculate_bet_amount(&predictions, 0.1) {
//!     println!("{} {} ¥{}", bet.horse_name, bet.bet_type, bet.stake);
//! }
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod backtest;
pub mod betting;
pub mod calibration;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod daily;
pub mod encoder;
pub mod error;
pub mod features;
pub mod ledger;
pub mod model;
pub mod predictor;
pub mod stats;
pub mod storage;
pub mod types;

pub use artifact::{JsonModelStore, ModelStore, TrainedModel};
pub use betting::{BettingAllocator, HeuristicOdds, MarketOdds, OddsEstimator};
pub use config::AppConfig;
pub use daily::{predict_day, DailyPrediction};
pub use error::{ArtifactError, BettingError, PipelineError};
pub use model::train;
pub use predictor::RacePredictor;
pub use types::{BetRecommendation, BetType, Prediction, RaceEntry, RaceTable, RiskTier};
