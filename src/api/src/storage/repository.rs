//! SQLite repository for historical race results

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use std::path::Path;

use super::schema::create_tables;
use crate::corpus::{CorpusQuery, CorpusReader};
use crate::types::{RaceEntry, RaceTable};

/// Repository over the `race_results` table.
pub struct RaceRepository {
    conn: Connection,
}

impl RaceRepository {
    /// Create a new repository, initializing the database if needed
    pub fn new(db_path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open(db_path).context("Failed to open database")?;
        create_tables(&conn)?;

        Ok(Self { conn })
    }

    /// Create an in-memory repository (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        create_tables(&conn)?;
        Ok(Self { conn })
    }

    // ==================== Insert Operations ====================

    /// Insert a race result (upsert on race_id + horse_name)
    pub fn insert_entry(&self, entry: &RaceEntry) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO race_results
            (race_id, race_date, horse_name, jockey_name, trainer_name, course_length,
             surface, weather, track_condition, horse_weight, odds, popularity, finish_position)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                entry.race_id,
                entry.race_date.map(|d| d.to_string()),
                entry.horse_name,
                entry.jockey_name,
                entry.trainer_name,
                entry.course_length,
                entry.surface,
                entry.weather,
                entry.track_condition,
                entry.horse_weight,
                entry.odds,
                entry.popularity,
                entry.finish_position,
            ],
        )?;
        Ok(())
    }

    /// Insert many entries in one transaction. Returns the number written.
    pub fn insert_entries(&mut self, entries: &[RaceEntry]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO race_results
                (race_id, race_date, horse_name, jockey_name, trainer_name, course_length,
                 surface, weather, track_condition, horse_weight, odds, popularity, finish_position)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.race_id,
                    entry.race_date.map(|d| d.to_string()),
                    entry.horse_name,
                    entry.jockey_name,
                    entry.trainer_name,
                    entry.course_length,
                    entry.surface,
                    entry.weather,
                    entry.track_condition,
                    entry.horse_weight,
                    entry.odds,
                    entry.popularity,
                    entry.finish_position,
                ])?;
            }
        }
        tx.commit()?;
        Ok(entries.len())
    }

    // ==================== Query Operations ====================

    fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<RaceEntry> {
        let race_date: Option<String> = row.get(1)?;
        Ok(RaceEntry {
            race_id: row.get(0)?,
            race_date: race_date.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
            horse_name: row.get(2)?,
            jockey_name: row.get(3)?,
            trainer_name: row.get(4)?,
            course_length: row.get(5)?,
            surface: row.get(6)?,
            weather: row.get(7)?,
            track_condition: row.get(8)?,
            horse_weight: row.get(9)?,
            odds: row.get(10)?,
            popularity: row.get(11)?,
            finish_position: row.get(12)?,
        })
    }

    /// Every entry ordered by date, race and insertion order
    pub fn get_all_entries(&self) -> Result<Vec<RaceEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT race_id, race_date, horse_name, jockey_name, trainer_name, course_length,
                   surface, weather, track_condition, horse_weight, odds, popularity, finish_position
            FROM race_results
            ORDER BY race_date, race_id, rowid
            "#,
        )?;
        let entries = stmt
            .query_map([], Self::row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn get_last_race_date(&self) -> Result<Option<NaiveDate>> {
        let result: Option<String> =
            self.conn
                .query_row("SELECT MAX(race_date) FROM race_results", [], |row| row.get(0))?;

        Ok(result.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()))
    }

    pub fn get_race_count(&self) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT race_id) FROM race_results",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn get_entry_count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM race_results", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Corpus extent after an import.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSummary {
    pub written: usize,
    pub races: i64,
    pub entries: i64,
    pub last_race_date: Option<NaiveDate>,
}

impl ImportSummary {
    pub fn collect(repo: &RaceRepository, written: usize) -> Result<Self> {
        Ok(Self {
            written,
            races: repo.get_race_count()?,
            entries: repo.get_entry_count()?,
            last_race_date: repo.get_last_race_date()?,
        })
    }
}

impl CorpusReader for RaceRepository {
    fn read_corpus(&self, query: &CorpusQuery) -> Result<RaceTable> {
        let table = RaceTable::from_entries(self.get_all_entries()?)?;
        query.apply(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_entry(race_id: &str, day: u32, horse: &str, position: Option<u32>) -> RaceEntry {
        RaceEntry {
            race_id: race_id.to_string(),
            race_date: NaiveDate::from_ymd_opt(2024, 1, day),
            horse_name: horse.to_string(),
            jockey_name: Some(format!("Jockey {}", horse)),
            trainer_name: None,
            course_length: Some(1600.0),
            surface: Some("turf".to_string()),
            weather: Some("晴".to_string()),
            track_condition: Some("良".to_string()),
            horse_weight: Some(480.0),
            odds: Some(3.4),
            popularity: Some(1.0),
            finish_position: position,
        }
    }

    #[test]
    fn test_insert_and_get_entries() {
        let repo = RaceRepository::in_memory().unwrap();
        repo.insert_entry(&create_test_entry("R1", 1, "A", Some(1))).unwrap();
        repo.insert_entry(&create_test_entry("R1", 1, "B", Some(2))).unwrap();

        let entries = repo.get_all_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], create_test_entry("R1", 1, "A", Some(1)));
        assert_eq!(entries[1].horse_name, "B");
    }

    #[test]
    fn test_upsert_entry() {
        let repo = RaceRepository::in_memory().unwrap();
        repo.insert_entry(&create_test_entry("R1", 1, "A", None)).unwrap();
        repo.insert_entry(&create_test_entry("R1", 1, "A", Some(3))).unwrap();

        let entries = repo.get_all_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].finish_position, Some(3));
    }

    #[test]
    fn test_bulk_insert_and_counts() {
        let mut repo = RaceRepository::in_memory().unwrap();
        let rows = vec![
            create_test_entry("R2", 2, "A", Some(1)),
            create_test_entry("R1", 1, "B", Some(1)),
            create_test_entry("R1", 1, "C", Some(2)),
        ];
        assert_eq!(repo.insert_entries(&rows).unwrap(), 3);
        assert_eq!(repo.get_entry_count().unwrap(), 3);
        assert_eq!(repo.get_race_count().unwrap(), 2);
        assert_eq!(
            repo.get_last_race_date().unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 2)
        );
    }

    #[test]
    fn test_read_corpus_in_date_order() {
        let mut repo = RaceRepository::in_memory().unwrap();
        repo.insert_entries(&[
            create_test_entry("R2", 2, "A", Some(1)),
            create_test_entry("R1", 1, "B", Some(1)),
        ])
        .unwrap();

        let table = repo.read_corpus(&CorpusQuery::all()).unwrap();
        assert_eq!(table.entries()[0].race_id, "R1");
        assert!(table.has_column("weather"));
        assert!(!table.has_column("trainer_name"));

        let query = CorpusQuery {
            from: NaiveDate::from_ymd_opt(2024, 1, 2),
            ..Default::default()
        };
        assert_eq!(repo.read_corpus(&query).unwrap().len(), 1);
    }

    #[test]
    fn test_import_summary_reports_corpus_extent() {
        let mut repo = RaceRepository::in_memory().unwrap();
        repo.insert_entries(&[
            create_test_entry("R1", 3, "A", Some(1)),
            create_test_entry("R2", 9, "A", Some(2)),
        ])
        .unwrap();

        let summary = ImportSummary::collect(&repo, 2).unwrap();
        assert_eq!(summary.written, 2);
        assert_eq!(summary.races, 2);
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.last_race_date, NaiveDate::from_ymd_opt(2024, 1, 9));
    }

    #[test]
    fn test_empty_repository() {
        let repo = RaceRepository::in_memory().unwrap();
        assert_eq!(repo.get_last_race_date().unwrap(), None);
        assert!(repo.read_corpus(&CorpusQuery::all()).unwrap().is_empty());
    }
}
