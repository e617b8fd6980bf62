//! Betting logic: odds estimation, Kelly sizing, budget allocation and
//! settlement.
//!
//! Kelly fraction = (p * b - q) / b
//! where:
//!   p = estimated probability (model confidence)
//!   b = net odds (decimal odds - 1)
//!   q = 1 - p

use chrono::Utc;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::BettingConfig;
use crate::error::BettingError;
use crate::ledger::{PerformanceLedger, PerformanceSummary, StrategyAdvice};
use crate::types::{
    BetRecommendation, BetType, LedgerEntry, Prediction, RaceEntry, RiskTier, Settlement,
};

/// Smallest decimal odds ever assumed.
pub const MIN_ODDS: f64 = 1.1;

/// Place payouts are approximated as a third of the win odds.
const PLACE_ODDS_DIVISOR: f64 = 3.0;

/// Source of decimal odds for a prediction.
pub trait OddsEstimator {
    fn estimate(&self, prediction: &Prediction) -> f64;
}

/// Fixed odds curve keyed by predicted position, inflated for low confidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicOdds;

impl HeuristicOdds {
    pub fn estimate_odds(predicted_position: usize, confidence: f64) -> f64 {
        let base = match predicted_position {
            1 => 3.0,
            2 => 5.0,
            3 => 8.0,
            _ => 10.0,
        };
        let confidence_factor = 1.0 + (1.0 - confidence);
        (base * confidence_factor).max(MIN_ODDS)
    }
}

impl OddsEstimator for HeuristicOdds {
    fn estimate(&self, prediction: &Prediction) -> f64 {
        Self::estimate_odds(prediction.predicted_position, prediction.confidence)
    }
}

/// Market odds per horse, falling back to the heuristic curve for horses
/// without a usable quote.
#[derive(Debug, Clone, Default)]
pub struct MarketOdds {
    odds: HashMap<String, f64>,
}

impl MarketOdds {
    pub fn new(odds: HashMap<String, f64>) -> Self {
        Self { odds }
    }

    /// Quotes from the `odds` column of a race card.
    pub fn from_entries(entries: &[RaceEntry]) -> Self {
        Self::new(
            entries
                .iter()
                .filter_map(|e| e.odds.map(|o| (e.horse_name.clone(), o)))
                .collect(),
        )
    }
}

impl OddsEstimator for MarketOdds {
    fn estimate(&self, prediction: &Prediction) -> f64 {
        match self.odds.get(&prediction.horse_name) {
            Some(&odds) if odds.is_finite() && odds > 1.0 => odds,
            _ => HeuristicOdds.estimate(prediction),
        }
    }
}

/// Uncapped Kelly fraction.
///
/// # Arguments
/// * `probability` - Estimated probability, must be in (0, 1]
/// * `odds` - Decimal odds, must be finite and > 1
pub fn raw_kelly(probability: f64, odds: f64) -> Result<f64, BettingError> {
    if !probability.is_finite() || probability <= 0.0 || probability > 1.0 {
        return Err(BettingError::InvalidProbability(probability));
    }
    if !odds.is_finite() || odds <= 1.0 {
        return Err(BettingError::InvalidOdds(odds));
    }

    let b = odds - 1.0;
    let q = 1.0 - probability;
    Ok((b * probability - q) / b)
}

/// Kelly fraction capped at `max_ratio`.
///
/// Invalid inputs and non-positive edges give 0 (no bet).
pub fn kelly_fraction(probability: f64, odds: f64, max_ratio: f64) -> f64 {
    match raw_kelly(probability, odds) {
        Ok(f) if f > 0.0 => f.min(max_ratio.max(0.0)),
        Ok(_) => 0.0,
        Err(e) => {
            debug!("No bet: {}", e);
            0.0
        }
    }
}

/// Bet type and risk tier for a predicted position, or None for positions
/// that are never bet.
fn classify(predicted_position: usize, confidence: f64, win_confidence: f64) -> Option<(BetType, RiskTier)> {
    match predicted_position {
        1 if confidence >= win_confidence => Some((BetType::Win, RiskTier::High)),
        1 | 2 => Some((BetType::Place, RiskTier::Medium)),
        3 => Some((BetType::Place, RiskTier::Low)),
        _ => None,
    }
}

/// Scale stakes down to sum exactly to `target`.
///
/// Each stake gets its floored share; leftover units go to the largest
/// fractional remainders, earlier stakes first on ties.
fn ration(stakes: &[u64], target: u64) -> Vec<u64> {
    let total: u64 = stakes.iter().sum();
    if total == 0 {
        return stakes.to_vec();
    }

    let ratio = target as f64 / total as f64;
    let mut rationed: Vec<u64> = Vec::with_capacity(stakes.len());
    let mut remainders: Vec<(usize, f64)> = Vec::with_capacity(stakes.len());
    for (i, &stake) in stakes.iter().enumerate() {
        let scaled = stake as f64 * ratio;
        let floor = scaled.floor();
        rationed.push(floor as u64);
        remainders.push((i, scaled - floor));
    }

    let assigned: u64 = rationed.iter().sum();
    let leftover = target.saturating_sub(assigned) as usize;
    remainders.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    for &(i, _) in remainders.iter().take(leftover) {
        rationed[i] += 1;
    }
    rationed
}

/// Converts predictions into bounded stakes and tracks settled results.
///
/// One allocator belongs to one bettor; settlements mutate the budget and
/// require exclusive access.
pub struct BettingAllocator {
    initial_budget: f64,
    current_budget: f64,
    config: BettingConfig,
    ledger: PerformanceLedger,
    odds: Box<dyn OddsEstimator>,
}

impl BettingAllocator {
    /// Allocator starting from `config.initial_budget`.
    pub fn new(config: BettingConfig) -> Self {
        Self::with_budget(config.initial_budget, config)
    }

    pub fn with_budget(initial_budget: f64, config: BettingConfig) -> Self {
        Self {
            initial_budget,
            current_budget: initial_budget,
            config,
            ledger: PerformanceLedger::new(),
            odds: Box::new(HeuristicOdds),
        }
    }

    /// Replace the odds source used for sizing.
    pub fn with_odds_estimator(mut self, odds: Box<dyn OddsEstimator>) -> Self {
        self.odds = odds;
        self
    }

    pub fn set_odds_estimator(&mut self, odds: Box<dyn OddsEstimator>) {
        self.odds = odds;
    }

    pub fn initial_budget(&self) -> f64 {
        self.initial_budget
    }

    pub fn current_budget(&self) -> f64 {
        self.current_budget
    }

    pub fn config(&self) -> &BettingConfig {
        &self.config
    }

    pub fn ledger(&self) -> &PerformanceLedger {
        &self.ledger
    }

    pub fn estimate_odds(&self, prediction: &Prediction) -> f64 {
        self.odds.estimate(prediction)
    }

    /// Kelly fraction capped at the configured maximum bet ratio.
    pub fn kelly_fraction(&self, probability: f64, odds: f64) -> f64 {
        kelly_fraction(probability, odds, self.config.max_bet_ratio)
    }

    /// Size bets for one race.
    ///
    /// The combined stake never exceeds `current_budget * budget_ratio`.
    /// When the candidates ask for more, every stake is scaled by the same
    /// ratio; if that would leave any stake under the minimum unit, no bet
    /// is returned at all.
    pub fn calculate_bet_amount(
        &self,
        predictions: &[Prediction],
        budget_ratio: f64,
    ) -> Vec<BetRecommendation> {
        let available = self.current_budget * budget_ratio;
        if !available.is_finite() || available <= 0.0 {
            debug!("No budget available (current {:.0})", self.current_budget);
            return Vec::new();
        }
        let max_stake = available * self.config.max_stake_share;

        let mut recommendations = Vec::new();
        for prediction in predictions {
            if prediction.confidence < self.config.min_confidence {
                debug!(
                    "Skipping {}: confidence {:.3} below {:.3}",
                    prediction.horse_name, prediction.confidence, self.config.min_confidence
                );
                continue;
            }
            let Some((bet_type, risk_tier)) = classify(
                prediction.predicted_position,
                prediction.confidence,
                self.config.win_confidence,
            ) else {
                debug!(
                    "Skipping {}: predicted position {}",
                    prediction.horse_name, prediction.predicted_position
                );
                continue;
            };

            let estimated_odds = self.estimate_odds(prediction);
            let fraction = self.kelly_fraction(prediction.confidence, estimated_odds);
            if fraction <= 0.0 {
                debug!("Skipping {}: no Kelly edge at odds {:.2}", prediction.horse_name, estimated_odds);
                continue;
            }

            let kelly_stake = self.current_budget * fraction;
            let stake = kelly_stake.min(max_stake).max(self.config.min_stake as f64).floor() as u64;

            recommendations.push(BetRecommendation {
                horse_name: prediction.horse_name.clone(),
                bet_type,
                predicted_position: prediction.predicted_position,
                stake,
                confidence: prediction.confidence,
                estimated_odds,
                expected_return: 0.0,
                risk_tier,
            });
        }

        let total: u64 = recommendations.iter().map(|r| r.stake).sum();
        if total as f64 > available {
            let target = available.floor() as u64;
            let stakes: Vec<u64> = recommendations.iter().map(|r| r.stake).collect();
            let rationed = ration(&stakes, target);
            if rationed.iter().any(|&s| s < self.config.min_stake) {
                warn!(
                    "Sub-budget {:.0} cannot fund {} bets at minimum stake {}",
                    available,
                    recommendations.len(),
                    self.config.min_stake
                );
                return Vec::new();
            }
            info!("Rationing stakes from {} to {}", total, target);
            for (rec, stake) in recommendations.iter_mut().zip(rationed) {
                rec.stake = stake;
            }
        }

        for rec in &mut recommendations {
            rec.expected_return = rec.stake as f64 * rec.estimated_odds * rec.confidence;
        }
        recommendations
    }

    /// Settle one bet: append it to the ledger and apply its profit/loss
    /// to the current budget.
    pub fn record_bet_result(&mut self, settlement: &Settlement) -> Result<LedgerEntry, BettingError> {
        if settlement.actual_result == 0 {
            return Err(BettingError::InvalidSettlement(format!(
                "actual_result must be >= 1 for {}",
                settlement.horse_name
            )));
        }
        if !settlement.actual_odds.is_finite() || settlement.actual_odds < 1.0 {
            return Err(BettingError::InvalidSettlement(format!(
                "actual_odds {} for {}",
                settlement.actual_odds, settlement.horse_name
            )));
        }

        let stake = settlement.stake as f64;
        let (hit, payout) = match settlement.bet_type {
            BetType::Win if settlement.actual_result == 1 => (true, stake * settlement.actual_odds),
            BetType::Place if settlement.actual_result <= 3 => {
                let place_odds = (settlement.actual_odds / PLACE_ODDS_DIVISOR).max(MIN_ODDS);
                (true, stake * place_odds)
            }
            _ => (false, 0.0),
        };
        let profit_loss = payout - stake;

        let entry = LedgerEntry {
            settled_at: Utc::now(),
            horse_name: settlement.horse_name.clone(),
            bet_type: settlement.bet_type,
            stake: settlement.stake,
            actual_result: settlement.actual_result,
            actual_odds: settlement.actual_odds,
            hit,
            payout,
            profit_loss,
        };
        self.ledger.append(entry.clone());
        self.current_budget += profit_loss;

        info!(
            "Settled {} {}: {} ({:+.0}), budget {:.0}",
            settlement.bet_type,
            settlement.horse_name,
            if hit { "hit" } else { "miss" },
            profit_loss,
            self.current_budget
        );
        Ok(entry)
    }

    pub fn get_performance_summary(&self) -> PerformanceSummary {
        self.ledger.summary(self.initial_budget, self.current_budget)
    }

    pub fn optimize_strategy(&self) -> StrategyAdvice {
        self.ledger.advice(self.config.min_history)
    }
}
