//! Daily prediction over every race of a multi-race card.
//!
//! All races share one allocator, so each race is sized against the same
//! bankroll. Nothing is settled here; the budget only moves once results
//! are recorded.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::betting::{BettingAllocator, MarketOdds};
use crate::error::PipelineError;
use crate::predictor::RacePredictor;
use crate::types::{BetRecommendation, Prediction, RaceTable};

/// Predictions and bets for one race of the day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceForecast {
    pub race_id: String,
    pub predictions: Vec<Prediction>,
    pub recommendations: Vec<BetRecommendation>,
}

impl RaceForecast {
    pub fn total_stake(&self) -> u64 {
        self.recommendations.iter().map(|r| r.stake).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub races: usize,
    pub skipped_races: usize,
    pub predictions: usize,
    /// Predictions at or above the allocator's minimum confidence
    pub high_confidence_picks: usize,
    pub recommendations: usize,
    pub total_stake: u64,
    pub budget: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPrediction {
    pub races: Vec<RaceForecast>,
    pub summary: DailySummary,
}

/// Options for [`predict_day`].
#[derive(Debug, Clone, Copy)]
pub struct DailyOptions {
    /// Share of the current budget offered to each race
    pub budget_ratio: f64,
    /// Size bets with each race's quoted odds
    pub market_odds: bool,
}

/// Predict and size bets for every race on the card, in card order.
///
/// A race that cannot be predicted, for example because the card lacks a
/// trained column, is logged and skipped. A missing model stops the whole
/// day.
pub fn predict_day(
    predictor: &RacePredictor,
    allocator: &mut BettingAllocator,
    card: &RaceTable,
    options: DailyOptions,
) -> Result<DailyPrediction, PipelineError> {
    if !predictor.is_loaded() {
        return Err(PipelineError::ModelNotLoaded);
    }

    let races = card.split_by_race();
    info!("Predicting {} races", races.len());

    let min_confidence = allocator.config().min_confidence;
    let mut forecasts = Vec::with_capacity(races.len());
    let mut summary = DailySummary {
        budget: allocator.current_budget(),
        ..Default::default()
    };

    for race in &races {
        let Some(first) = race.entries().first() else {
            continue;
        };
        let race_id = first.race_id.clone();

        let predictions = match predictor.predict_race(race) {
            Ok(predictions) => predictions,
            Err(PipelineError::ModelNotLoaded) => return Err(PipelineError::ModelNotLoaded),
            Err(e) => {
                warn!("Skipping race {}: {}", race_id, e);
                summary.skipped_races += 1;
                continue;
            }
        };

        if options.market_odds {
            allocator.set_odds_estimator(Box::new(MarketOdds::from_entries(race.entries())));
        }
        let recommendations = allocator.calculate_bet_amount(&predictions, options.budget_ratio);
        if recommendations.is_empty() {
            info!("No bets for race {}", race_id);
        }

        let forecast = RaceForecast {
            race_id,
            predictions,
            recommendations,
        };
        summary.races += 1;
        summary.predictions += forecast.predictions.len();
        summary.high_confidence_picks += forecast
            .predictions
            .iter()
            .filter(|p| p.confidence >= min_confidence)
            .count();
        summary.recommendations += forecast.recommendations.len();
        summary.total_stake += forecast.total_stake();
        forecasts.push(forecast);
    }

    Ok(DailyPrediction {
        races: forecasts,
        summary,
    })
}

/// Print each race's picks and bets, then the daily summary.
pub fn print_daily_table(day: &DailyPrediction) {
    for (i, race) in day.races.iter().enumerate() {
        println!("{}. Race {}", i + 1, race.race_id);
        if race.predictions.is_empty() {
            println!("   (no predictions above the confidence threshold)");
        }
        for p in &race.predictions {
            println!(
                "   {:>2}. {:20} {:.1}%",
                p.predicted_position,
                p.horse_name,
                p.confidence * 100.0
            );
        }
        if race.recommendations.is_empty() {
            println!("   (no bets)");
        }
        for r in &race.recommendations {
            println!(
                "   {:20} {:6} ¥{:>6}  odds {:>5.1}  exp ¥{:>7.0}  risk {}",
                r.horse_name, r.bet_type, r.stake, r.estimated_odds, r.expected_return, r.risk_tier
            );
        }
        println!();
    }

    let s = &day.summary;
    println!("=== Daily Summary ===");
    println!("  Races:                 {} ({} skipped)", s.races, s.skipped_races);
    println!("  Predictions:           {}", s.predictions);
    println!("  High-confidence picks: {}", s.high_confidence_picks);
    println!("  Recommended bets:      {}", s.recommendations);
    println!("  Total stake:           ¥{} of ¥{:.0}", s.total_stake, s.budget);
}
