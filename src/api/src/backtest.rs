//! Backtesting by chronological replay of the corpus.
//!
//! Each race is predicted from history strictly before it, bets are sized
//! with the race card's quoted odds and then settled against the recorded
//! finish.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::betting::{BettingAllocator, MarketOdds};
use crate::config::BettingConfig;
use crate::error::PipelineError;
use crate::ledger::{PerformanceSummary, StrategyAdvice};
use crate::predictor::RacePredictor;
use crate::types::{RaceTable, Settlement};

/// Outcome of one replayed race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceOutcome {
    pub race_id: String,
    pub race_date: Option<NaiveDate>,
    pub num_bets: usize,
    pub num_hits: usize,
    pub total_bet: u64,
    pub total_return: f64,
}

impl RaceOutcome {
    pub fn profit(&self) -> f64 {
        self.total_return - self.total_bet as f64
    }
}

/// Aggregate backtest results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub races_replayed: usize,
    pub races_bet: usize,
    pub summary: PerformanceSummary,
    pub advice: StrategyAdvice,
    pub max_drawdown: f64,
    pub races: Vec<RaceOutcome>,
}

impl BacktestReport {
    pub fn roi(&self) -> f64 {
        if self.summary.total_staked > 0 {
            self.summary.total_profit_loss / self.summary.total_staked as f64
        } else {
            0.0
        }
    }
}

/// Replays races through predictor, allocator and ledger.
pub struct Backtester<'a> {
    predictor: &'a RacePredictor,
    betting: BettingConfig,
}

impl<'a> Backtester<'a> {
    /// `predictor` must hold the full corpus as history; per-race
    /// statistics are cut before each replayed race.
    pub fn new(predictor: &'a RacePredictor, betting: BettingConfig) -> Self {
        Self { predictor, betting }
    }

    /// Replay every race dated on or after `from`, oldest first.
    ///
    /// With `from` set, undated races are skipped. With `None` every race
    /// is replayed and undated ones come first.
    pub fn run(&self, corpus: &RaceTable, from: Option<NaiveDate>) -> Result<BacktestReport, PipelineError> {
        let mut races: Vec<RaceTable> = corpus
            .split_by_race()
            .into_iter()
            .filter(|race| {
                let date = race.entries().first().and_then(|e| e.race_date);
                match (from, date) {
                    (Some(from), Some(date)) => date >= from,
                    (Some(_), None) => false,
                    (None, _) => true,
                }
            })
            .collect();
        races.sort_by_key(|race| race.entries().first().and_then(|e| e.race_date));
        info!("Backtesting {} races", races.len());

        let mut allocator = BettingAllocator::new(self.betting.clone());
        let mut outcomes = Vec::with_capacity(races.len());

        for race in &races {
            let Some(first) = race.entries().first() else {
                continue;
            };
            let predictions = self.predictor.predict_race(race)?;

            allocator.set_odds_estimator(Box::new(MarketOdds::from_entries(race.entries())));
            let recommendations =
                allocator.calculate_bet_amount(&predictions, self.betting.budget_ratio);

            let mut outcome = RaceOutcome {
                race_id: first.race_id.clone(),
                race_date: first.race_date,
                num_bets: 0,
                num_hits: 0,
                total_bet: 0,
                total_return: 0.0,
            };

            for rec in &recommendations {
                let Some(entry) = race.entries().iter().find(|e| e.horse_name == rec.horse_name)
                else {
                    continue;
                };
                let (Some(actual_result), Some(actual_odds)) = (entry.finish_position, entry.odds)
                else {
                    debug!("{} in {} has no settled result", entry.horse_name, entry.race_id);
                    continue;
                };

                let settlement = Settlement {
                    horse_name: rec.horse_name.clone(),
                    bet_type: rec.bet_type,
                    stake: rec.stake,
                    actual_result,
                    actual_odds,
                };
                match allocator.record_bet_result(&settlement) {
                    Ok(settled) => {
                        outcome.num_bets += 1;
                        outcome.total_bet += settled.stake;
                        outcome.total_return += settled.payout;
                        if settled.hit {
                            outcome.num_hits += 1;
                        }
                    }
                    Err(e) => warn!("Skipping settlement in {}: {}", outcome.race_id, e),
                }
            }

            outcomes.push(outcome);
        }

        let races_bet = outcomes.iter().filter(|o| o.num_bets > 0).count();
        Ok(BacktestReport {
            races_replayed: outcomes.len(),
            races_bet,
            summary: allocator.get_performance_summary(),
            advice: allocator.optimize_strategy(),
            max_drawdown: allocator.ledger().max_drawdown(),
            races: outcomes,
        })
    }
}

/// Print backtest results in table format.
pub fn print_backtest_table(report: &BacktestReport) {
    let s = &report.summary;
    println!("=== Backtest Results ===");
    println!();
    println!("Overall Statistics:");
    println!("  Races:         {} ({} with bets)", report.races_replayed, report.races_bet);
    println!("  Total Bets:    {}", s.total_bets);
    println!("  Hit Rate:      {:.2}%", s.hit_rate * 100.0);
    println!("  Total Bet:     ¥{}", s.total_staked);
    println!("  Total Return:  ¥{:.0}", s.total_payout);
    println!("  Profit:        ¥{:.0}", s.total_profit_loss);
    println!("  Recovery:      {:.2}%", s.recovery_rate * 100.0);
    println!("  ROI:           {:.2}%", report.roi() * 100.0);
    println!("  Max Drawdown:  ¥{:.0}", report.max_drawdown);
    println!("  Budget:        ¥{:.0} ({:+.0})", s.current_budget, s.budget_change);
    println!();

    println!("By Bet Type:");
    println!("  {:8} {:>8} {:>10} {:>10}", "Type", "Bets", "Hit", "Recovery");
    println!("  {}", "-".repeat(40));
    for (name, stats) in [("win", &s.win), ("place", &s.place)] {
        println!(
            "  {:8} {:>8} {:>9.1}% {:>9.1}%",
            name,
            stats.count,
            stats.hit_rate * 100.0,
            stats.recovery_rate * 100.0
        );
    }
    println!();

    match &report.advice {
        StrategyAdvice::InsufficientHistory { entries, required } => {
            println!("Advice: not enough history ({} of {} bets)", entries, required);
        }
        StrategyAdvice::Advice { suggestions, .. } if suggestions.is_empty() => {
            println!("Advice: no changes suggested");
        }
        StrategyAdvice::Advice { suggestions, .. } => {
            println!("Advice:");
            for suggestion in suggestions {
                println!("  - {}", suggestion);
            }
        }
    }
}
