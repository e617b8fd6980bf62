//! SQLite schema definitions for historical race data
//!
//! Tables:
//! - race_results: one row per horse per race, with the finish once settled

use rusqlite::{Connection, Result};

/// Create all tables in the database
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS race_results (
            race_id TEXT NOT NULL,
            race_date TEXT,
            horse_name TEXT NOT NULL,
            jockey_name TEXT,
            trainer_name TEXT,
            course_length REAL,
            surface TEXT,
            weather TEXT,
            track_condition TEXT,
            horse_weight REAL,
            odds REAL,
            popularity REAL,
            finish_position INTEGER,
            created_at TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (race_id, horse_name)
        )
        "#,
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_race_results_date ON race_results(race_date)",
        [],
    )?;

    Ok(())
}
