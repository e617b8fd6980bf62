//! Historical performance aggregates for horses, jockeys and trainers.
//!
//! Snapshots are a pure function of the corpus they are built from. At
//! inference time the corpus is cut before the race being predicted so a
//! race's own outcome never leaks into its features.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::RaceEntry;

/// Horse statistics derived from past finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HorseStatSnapshot {
    pub race_count: usize,
    pub avg_position: f64,
    pub win_rate: f64,
    /// Top-3 rate
    pub place_rate: f64,
}

/// Jockey or trainer statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonStatSnapshot {
    pub race_count: usize,
    pub wins: usize,
    pub win_rate: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    races: usize,
    wins: usize,
    places: usize,
    position_sum: u64,
}

impl Tally {
    fn add(&mut self, position: u32) {
        self.races += 1;
        self.position_sum += position as u64;
        if position == 1 {
            self.wins += 1;
        }
        if position <= 3 {
            self.places += 1;
        }
    }

    fn rate(count: usize, races: usize) -> f64 {
        if races == 0 {
            0.0
        } else {
            count as f64 / races as f64
        }
    }

    fn horse_snapshot(&self) -> HorseStatSnapshot {
        HorseStatSnapshot {
            race_count: self.races,
            avg_position: if self.races == 0 {
                0.0
            } else {
                self.position_sum as f64 / self.races as f64
            },
            win_rate: Self::rate(self.wins, self.races),
            place_rate: Self::rate(self.places, self.races),
        }
    }

    fn person_snapshot(&self) -> PersonStatSnapshot {
        PersonStatSnapshot {
            race_count: self.races,
            wins: self.wins,
            win_rate: Self::rate(self.wins, self.races),
        }
    }
}

/// Aggregated snapshots keyed by name.
#[derive(Debug, Clone, Default)]
pub struct HistoricalStats {
    horses: HashMap<String, HorseStatSnapshot>,
    jockeys: HashMap<String, PersonStatSnapshot>,
    trainers: HashMap<String, PersonStatSnapshot>,
}

impl HistoricalStats {
    /// Aggregate every settled row of the corpus.
    pub fn from_corpus<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a RaceEntry>,
    {
        let mut horses: HashMap<String, Tally> = HashMap::new();
        let mut jockeys: HashMap<String, Tally> = HashMap::new();
        let mut trainers: HashMap<String, Tally> = HashMap::new();

        for row in rows {
            // Unsettled rows carry no outcome
            let Some(position) = row.finish_position else {
                continue;
            };

            horses.entry(row.horse_name.clone()).or_default().add(position);
            if let Some(jockey) = &row.jockey_name {
                jockeys.entry(jockey.clone()).or_default().add(position);
            }
            if let Some(trainer) = &row.trainer_name {
                trainers.entry(trainer.clone()).or_default().add(position);
            }
        }

        Self {
            horses: horses
                .into_iter()
                .map(|(k, t)| (k, t.horse_snapshot()))
                .collect(),
            jockeys: jockeys
                .into_iter()
                .map(|(k, t)| (k, t.person_snapshot()))
                .collect(),
            trainers: trainers
                .into_iter()
                .map(|(k, t)| (k, t.person_snapshot()))
                .collect(),
        }
    }

    /// Aggregate the corpus as it existed before a race.
    ///
    /// Rows of `race_id` itself are always excluded. When the race date is
    /// known, rows dated on or after it are excluded too; undated rows
    /// are kept.
    pub fn before_race(corpus: &[RaceEntry], race_id: &str, race_date: Option<NaiveDate>) -> Self {
        Self::from_corpus(corpus.iter().filter(|row| {
            if row.race_id == race_id {
                return false;
            }
            match (race_date, row.race_date) {
                (Some(cutoff), Some(date)) => date < cutoff,
                _ => true,
            }
        }))
    }

    /// Horse snapshot, neutral (all zero) for horses with no history.
    pub fn horse(&self, name: &str) -> HorseStatSnapshot {
        self.horses.get(name).copied().unwrap_or_default()
    }

    pub fn jockey(&self, name: &str) -> PersonStatSnapshot {
        self.jockeys.get(name).copied().unwrap_or_default()
    }

    pub fn trainer(&self, name: &str) -> PersonStatSnapshot {
        self.trainers.get(name).copied().unwrap_or_default()
    }

    pub fn horse_count(&self) -> usize {
        self.horses.len()
    }

    pub fn jockey_count(&self) -> usize {
        self.jockeys.len()
    }

    pub fn trainer_count(&self) -> usize {
        self.trainers.len()
    }
}
