//! Settled-bet ledger, performance summary and strategy advice.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{BetType, LedgerEntry};

/// Hit and recovery statistics for one bet type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BetTypeStats {
    pub count: usize,
    pub hits: usize,
    pub hit_rate: f64,
    pub recovery_rate: f64,
}

/// Aggregate performance over the whole ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_bets: usize,
    pub total_staked: u64,
    pub total_payout: f64,
    pub total_profit_loss: f64,
    pub hit_rate: f64,
    /// Total payout / total stake
    pub recovery_rate: f64,
    pub current_budget: f64,
    pub budget_change: f64,
    pub win: BetTypeStats,
    pub place: BetTypeStats,
}

/// Advisory adjustment derived from ledger history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Suggestion {
    RaiseConfidenceThreshold,
    ReduceStakes,
    FavourPlace,
    FavourWin,
}

impl fmt::Display for Suggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Suggestion::RaiseConfidenceThreshold => "Consider raising the confidence threshold",
            Suggestion::ReduceStakes => "Consider sizing stakes more conservatively",
            Suggestion::FavourPlace => "A place-focused strategy may be more effective",
            Suggestion::FavourWin => "A win-focused strategy may be more effective",
        };
        f.write_str(text)
    }
}

/// Result of strategy optimization. Never an automatic parameter change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StrategyAdvice {
    /// Too few settled bets to judge; no action.
    InsufficientHistory { entries: usize, required: usize },
    Advice {
        hit_rate: f64,
        recovery_rate: f64,
        total_profit_loss: f64,
        suggestions: Vec<Suggestion>,
    },
}

const LOW_HIT_RATE: f64 = 0.3;
const LOW_RECOVERY_RATE: f64 = 0.8;
const TILT_FACTOR: f64 = 1.2;

/// Append-only list of settled bets.
#[derive(Debug, Clone, Default)]
pub struct PerformanceLedger {
    entries: Vec<LedgerEntry>,
}

impl PerformanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: LedgerEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn stats_for(&self, bet_type: BetType) -> BetTypeStats {
        let mut stats = BetTypeStats::default();
        let mut staked = 0u64;
        let mut payout = 0.0;
        for entry in self.entries.iter().filter(|e| e.bet_type == bet_type) {
            stats.count += 1;
            if entry.hit {
                stats.hits += 1;
            }
            staked += entry.stake;
            payout += entry.payout;
        }
        if stats.count > 0 {
            stats.hit_rate = stats.hits as f64 / stats.count as f64;
        }
        if staked > 0 {
            stats.recovery_rate = payout / staked as f64;
        }
        stats
    }

    fn hit_rate(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        self.entries.iter().filter(|e| e.hit).count() as f64 / self.entries.len() as f64
    }

    fn total_staked(&self) -> u64 {
        self.entries.iter().map(|e| e.stake).sum()
    }

    fn total_payout(&self) -> f64 {
        self.entries.iter().map(|e| e.payout).sum()
    }

    fn total_profit_loss(&self) -> f64 {
        self.entries.iter().map(|e| e.profit_loss).sum()
    }

    fn recovery_rate(&self) -> f64 {
        let staked = self.total_staked();
        if staked > 0 {
            self.total_payout() / staked as f64
        } else {
            0.0
        }
    }

    /// Summarize the ledger against the bettor's budgets.
    pub fn summary(&self, initial_budget: f64, current_budget: f64) -> PerformanceSummary {
        PerformanceSummary {
            total_bets: self.entries.len(),
            total_staked: self.total_staked(),
            total_payout: self.total_payout(),
            total_profit_loss: self.total_profit_loss(),
            hit_rate: self.hit_rate(),
            recovery_rate: self.recovery_rate(),
            current_budget,
            budget_change: current_budget - initial_budget,
            win: self.stats_for(BetType::Win),
            place: self.stats_for(BetType::Place),
        }
    }

    /// Heuristic advice once at least `min_history` bets are settled.
    pub fn advice(&self, min_history: usize) -> StrategyAdvice {
        if self.entries.len() < min_history {
            return StrategyAdvice::InsufficientHistory {
                entries: self.entries.len(),
                required: min_history,
            };
        }

        let hit_rate = self.hit_rate();
        let recovery_rate = self.recovery_rate();
        let mut suggestions = Vec::new();

        if hit_rate < LOW_HIT_RATE {
            suggestions.push(Suggestion::RaiseConfidenceThreshold);
        }
        if recovery_rate < LOW_RECOVERY_RATE {
            suggestions.push(Suggestion::ReduceStakes);
        }

        // Bet types with no history compare as zero recovery
        let recovery_of = |bet_type: BetType| {
            let (staked, payout) = self
                .entries
                .iter()
                .filter(|e| e.bet_type == bet_type)
                .fold((0u64, 0.0), |(s, p), e| (s + e.stake, p + e.payout));
            payout / staked.max(1) as f64
        };
        let win_recovery = recovery_of(BetType::Win);
        let place_recovery = recovery_of(BetType::Place);
        if place_recovery > win_recovery * TILT_FACTOR {
            suggestions.push(Suggestion::FavourPlace);
        } else if win_recovery > place_recovery * TILT_FACTOR {
            suggestions.push(Suggestion::FavourWin);
        }

        StrategyAdvice::Advice {
            hit_rate,
            recovery_rate,
            total_profit_loss: self.total_profit_loss(),
            suggestions,
        }
    }

    /// Largest peak-to-trough fall of cumulative profit/loss.
    pub fn max_drawdown(&self) -> f64 {
        let mut peak = 0.0;
        let mut max_dd = 0.0;
        let mut cumulative = 0.0;

        for entry in &self.entries {
            cumulative += entry.profit_loss;
            if cumulative > peak {
                peak = cumulative;
            }
            let dd = peak - cumulative;
            if dd > max_dd {
                max_dd = dd;
            }
        }
        max_dd
    }
}
