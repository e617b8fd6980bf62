//! SQLite storage module for historical race data
//!
//! Provides persistent storage for imported race results and serves them
//! back as a corpus.

pub mod repository;
pub mod schema;

pub use repository::{ImportSummary, RaceRepository};
pub use schema::create_tables;
