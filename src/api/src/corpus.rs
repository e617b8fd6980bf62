//! Historical corpus and race-card readers.
//!
//! CSV files are read with polars; the header decides which optional
//! columns the resulting table provides.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{columns, RaceEntry, RaceTable};

/// Optional bounds on the rows a reader returns.
#[derive(Debug, Clone, Default)]
pub struct CorpusQuery {
    /// Inclusive lower date bound
    pub from: Option<NaiveDate>,
    /// Exclusive upper date bound
    pub until: Option<NaiveDate>,
    /// Keep at most this many rows (in date order)
    pub limit: Option<usize>,
}

impl CorpusQuery {
    pub fn all() -> Self {
        Self::default()
    }

    /// Whether a row falls inside the date bounds. Undated rows only pass
    /// an unbounded query.
    pub fn matches(&self, entry: &RaceEntry) -> bool {
        if self.from.is_none() && self.until.is_none() {
            return true;
        }
        let Some(date) = entry.race_date else {
            return false;
        };
        self.from.map_or(true, |from| date >= from) && self.until.map_or(true, |until| date < until)
    }

    /// Filter, sort by date (stable) and cap a table.
    pub fn apply(&self, table: RaceTable) -> Result<RaceTable> {
        let columns = table.columns().clone();
        let mut rows: Vec<RaceEntry> = table
            .into_entries()
            .into_iter()
            .filter(|e| self.matches(e))
            .collect();
        rows.sort_by_key(|e| e.race_date);
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
        Ok(RaceTable::with_columns(rows, columns)?)
    }
}

/// Source of historical race results.
pub trait CorpusReader {
    fn read_corpus(&self, query: &CorpusQuery) -> Result<RaceTable>;
}

/// Corpus stored as a single CSV file.
pub struct CsvCorpus {
    path: PathBuf,
}

impl CsvCorpus {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl CorpusReader for CsvCorpus {
    fn read_corpus(&self, query: &CorpusQuery) -> Result<RaceTable> {
        query.apply(read_csv_table(&self.path)?)
    }
}

fn string_column(df: &DataFrame, name: &str) -> Result<Option<Vec<Option<String>>>> {
    let Ok(col) = df.column(name) else {
        return Ok(None);
    };
    let col = col.cast(&DataType::String)?;
    let values = col
        .str()?
        .into_iter()
        .map(|v| v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string))
        .collect();
    Ok(Some(values))
}

fn float_column(df: &DataFrame, name: &str) -> Result<Option<Vec<Option<f64>>>> {
    let Ok(col) = df.column(name) else {
        return Ok(None);
    };
    let col = col.cast(&DataType::Float64)?;
    let values = col
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect();
    Ok(Some(values))
}

fn at<T: Clone>(values: &Option<Vec<Option<T>>>, i: usize) -> Option<T> {
    values.as_ref().and_then(|v| v.get(i).cloned().flatten())
}

/// Read a CSV file into a table.
///
/// `race_id` and `horse_name` are required. Other known columns are
/// optional; the table provides exactly the known columns found in the
/// header. Unparseable numbers become missing values.
pub fn read_csv_table<P: AsRef<Path>>(path: P) -> Result<RaceTable> {
    let path = path.as_ref();
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
        .with_context(|| format!("Failed to read CSV {}", path.display()))?;

    let header: BTreeSet<String> = df
        .get_column_names()
        .iter()
        .map(|n| n.to_string())
        .collect();
    for required in [columns::RACE_ID, columns::HORSE_NAME] {
        if !header.contains(required) {
            bail!("{} is missing required column {}", path.display(), required);
        }
    }

    let race_ids = string_column(&df, columns::RACE_ID)?;
    let horse_names = string_column(&df, columns::HORSE_NAME)?;
    let race_dates = string_column(&df, columns::RACE_DATE)?;
    let jockeys = string_column(&df, columns::JOCKEY_NAME)?;
    let trainers = string_column(&df, columns::TRAINER_NAME)?;
    let surfaces = string_column(&df, columns::SURFACE)?;
    let weathers = string_column(&df, columns::WEATHER)?;
    let conditions = string_column(&df, columns::TRACK_CONDITION)?;
    let lengths = float_column(&df, columns::COURSE_LENGTH)?;
    let weights = float_column(&df, columns::HORSE_WEIGHT)?;
    let odds = float_column(&df, columns::ODDS)?;
    let popularity = float_column(&df, columns::POPULARITY)?;
    let positions = float_column(&df, columns::FINISH_POSITION)?;

    let mut entries = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let race_date = at(&race_dates, i)
            .map(|s| parse_date(&s))
            .transpose()
            .with_context(|| format!("Row {} of {}", i + 1, path.display()))?;

        entries.push(RaceEntry {
            race_id: at(&race_ids, i).unwrap_or_default(),
            race_date,
            horse_name: at(&horse_names, i).unwrap_or_default(),
            jockey_name: at(&jockeys, i),
            trainer_name: at(&trainers, i),
            course_length: at(&lengths, i),
            surface: at(&surfaces, i),
            weather: at(&weathers, i),
            track_condition: at(&conditions, i),
            horse_weight: at(&weights, i),
            odds: at(&odds, i),
            popularity: at(&popularity, i),
            finish_position: at(&positions, i)
                .filter(|p| *p >= 1.0)
                .map(|p| p as u32),
        });
    }

    let provided = columns::OPTIONAL
        .iter()
        .filter(|c| header.contains(**c))
        .map(|c| c.to_string())
        .collect();
    Ok(RaceTable::with_columns(entries, provided)?)
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y/%m/%d"))
        .with_context(|| format!("Invalid race_date {:?}", s))
}

/// Read a race card from JSON or CSV. The card may hold several races.
pub fn read_race_card<P: AsRef<Path>>(path: P) -> Result<RaceTable> {
    let path = path.as_ref();
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        parse_json_card(&content).with_context(|| format!("Invalid race card {}", path.display()))
    } else {
        read_csv_table(path)
    }
}

/// Parse a JSON array of entry objects.
///
/// A known key present on any object provides its column, even when every
/// value is null, so the feature builder fills it instead of dropping it.
pub fn parse_json_card(content: &str) -> Result<RaceTable> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let Some(objects) = value.as_array() else {
        bail!("Race card must be a JSON array of entries");
    };

    let keys: BTreeSet<&str> = objects
        .iter()
        .filter_map(|o| o.as_object())
        .flat_map(|o| o.keys().map(String::as_str))
        .collect();
    let provided = columns::OPTIONAL
        .iter()
        .filter(|c| keys.contains(**c))
        .map(|c| c.to_string())
        .collect();

    let entries: Vec<RaceEntry> = serde_json::from_value(value)?;
    Ok(RaceTable::with_columns(entries, provided)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CSV: &str = "\
race_id,race_date,horse_name,jockey_name,odds,weather,finish_position
R2,2024-02-01,B,J2,5.5,晴,1
R1,2024-01-01,A,J1,2.1,雨,1
R1,2024-01-01,C,,abc,,2
";

    #[test]
    fn test_read_csv_table_columns_and_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corpus.csv");
        fs::write(&path, CSV).unwrap();

        let table = read_csv_table(&path).unwrap();
        assert_eq!(table.len(), 3);
        assert!(table.has_column("odds"));
        assert!(table.has_column("weather"));
        assert!(!table.has_column("trainer_name"));

        let a = &table.entries()[1];
        assert_eq!(a.race_id, "R1");
        assert_eq!(a.race_date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(a.jockey_name.as_deref(), Some("J1"));
        assert!((a.odds.unwrap() - 2.1).abs() < 1e-9);
        assert_eq!(a.finish_position, Some(1));

        let c = &table.entries()[2];
        assert_eq!(c.jockey_name, None);
        assert_eq!(c.odds, None);
        assert_eq!(c.weather, None);
    }

    #[test]
    fn test_missing_required_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "race_id,odds\nR1,2.0\n").unwrap();
        assert!(read_csv_table(&path).is_err());
    }

    #[test]
    fn test_query_filters_and_sorts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corpus.csv");
        fs::write(&path, CSV).unwrap();
        let reader = CsvCorpus::new(&path);

        let all = reader.read_corpus(&CorpusQuery::all()).unwrap();
        assert_eq!(all.entries()[0].race_id, "R1");
        assert_eq!(all.entries()[2].race_id, "R2");

        let query = CorpusQuery {
            from: NaiveDate::from_ymd_opt(2024, 1, 15),
            ..Default::default()
        };
        let later = reader.read_corpus(&query).unwrap();
        assert_eq!(later.len(), 1);
        assert_eq!(later.entries()[0].horse_name, "B");

        let capped = CorpusQuery {
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(reader.read_corpus(&capped).unwrap().len(), 2);
    }

    #[test]
    fn test_read_json_race_card() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("race.json");
        fs::write(
            &path,
            r#"[{"race_id": "R9", "horse_name": "A", "odds": 3.2},
                {"race_id": "R9", "horse_name": "B", "odds": 8.0, "weather": "曇"}]"#,
        )
        .unwrap();

        let card = read_race_card(&path).unwrap();
        assert_eq!(card.len(), 2);
        assert!(card.has_column("weather"));
        assert!(!card.has_column("finish_position"));
    }

    #[test]
    fn test_json_card_keeps_all_null_column() {
        let card = parse_json_card(
            r#"[{"race_id": "R9", "horse_name": "A", "odds": 3.2, "horse_weight": null},
                {"race_id": "R9", "horse_name": "B", "odds": 8.0, "horse_weight": null}]"#,
        )
        .unwrap();

        assert!(card.has_column("horse_weight"));
        assert!(card.entries().iter().all(|e| e.horse_weight.is_none()));
        assert!(!card.has_column("weather"));
    }

    #[test]
    fn test_json_card_must_be_an_array() {
        assert!(parse_json_card(r#"{"race_id": "R9", "horse_name": "A"}"#).is_err());
    }
}
