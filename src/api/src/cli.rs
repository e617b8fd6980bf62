//! CLI commands for keiba-ranker.
//!
//! Import results, train the position model, predict a race card with
//! sized bets, and evaluate or backtest against stored history.

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::artifact::{JsonModelStore, ModelStore};
use crate::backtest::{print_backtest_table, Backtester};
use crate::betting::BettingAllocator;
use crate::config::AppConfig;
use crate::corpus::{read_csv_table, read_race_card, CorpusQuery, CorpusReader, CsvCorpus};
use crate::daily::{predict_day, print_daily_table, DailyOptions, DailyPrediction};
use crate::error::ArtifactError;
use crate::model::train;
use crate::predictor::RacePredictor;
use crate::storage::{ImportSummary, RaceRepository};
use crate::types::RaceTable;

#[derive(Parser)]
#[command(name = "keiba-ranker")]
#[command(version, about = "Horse race finishing-position ranker and bet allocator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import a race results CSV into the SQLite corpus
    Import {
        /// CSV with race_id, horse_name and optional result columns
        #[arg(value_name = "CSV")]
        csv: PathBuf,
    },

    /// Train the position model and save the artifact
    Train {
        /// Train from a CSV instead of the SQLite corpus
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Model path override
        #[arg(short, long)]
        model: Option<PathBuf>,
    },

    /// Predict every race on a card and size bets from one budget
    Predict {
        /// Race card (.json array of entries or .csv), one or more races
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Budget to size bets from (defaults to betting.initial_budget)
        #[arg(long)]
        budget: Option<f64>,

        /// Share of the budget offered to each race
        #[arg(long)]
        budget_ratio: Option<f64>,

        /// Size bets with the card's quoted odds instead of the heuristic curve
        #[arg(long)]
        market_odds: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "json")]
        format: OutputFormat,

        /// Also write the results as JSON to this file
        #[arg(long, value_name = "FILE")]
        save: Option<PathBuf>,

        /// Model path override
        #[arg(short, long)]
        model: Option<PathBuf>,
    },

    /// Measure win/place pick accuracy on stored races
    Evaluate {
        /// First race date to evaluate (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Model path override
        #[arg(short, long)]
        model: Option<PathBuf>,
    },

    /// Replay stored races through prediction, betting and settlement
    Backtest {
        /// First race date to replay (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,

        /// Model path override
        #[arg(short, long)]
        model: Option<PathBuf>,
    },
}

/// Flags of `predict`.
#[derive(Debug, Clone)]
pub struct PredictArgs {
    pub input: PathBuf,
    pub budget: Option<f64>,
    pub budget_ratio: Option<f64>,
    pub market_odds: bool,
    pub format: OutputFormat,
    pub save: Option<PathBuf>,
    pub model: Option<PathBuf>,
}

/// Evaluate and backtest score the saved model against the stored corpus,
/// which normally includes the races it was trained on.
const IN_SAMPLE_NOTE: &str =
    "Note: races the model was trained on are included, so these figures are in-sample.";

fn model_store(config: &AppConfig, override_path: Option<PathBuf>) -> JsonModelStore {
    match override_path {
        Some(path) => JsonModelStore::new(path),
        None => JsonModelStore::new(&config.model.artifact_path),
    }
}

fn open_repository(config: &AppConfig) -> anyhow::Result<RaceRepository> {
    RaceRepository::new(Path::new(&config.storage.database_path))
        .with_context(|| format!("Failed to open {}", config.storage.database_path))
}

fn load_predictor(
    config: &AppConfig,
    store: &JsonModelStore,
    history: &RaceTable,
) -> anyhow::Result<RacePredictor> {
    let predictor = RacePredictor::from_store(
        store,
        history.entries().to_vec(),
        config.betting.min_confidence,
    )?;
    if !predictor.is_loaded() {
        anyhow::bail!(
            "No trained model at {}; run `keiba-ranker train` first",
            store.path().display()
        );
    }
    Ok(predictor)
}

pub fn run(command: Commands) -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    info!("Configuration loaded");

    match command {
        Commands::Import { csv } => run_import(&config, &csv),
        Commands::Train { csv, model } => run_train(&config, csv, model),
        Commands::Predict {
            input,
            budget,
            budget_ratio,
            market_odds,
            format,
            save,
            model,
        } => run_predict(
            &config,
            PredictArgs {
                input,
                budget,
                budget_ratio,
                market_odds,
                format,
                save,
                model,
            },
        ),
        Commands::Evaluate { from, model } => run_evaluate(&config, from, model),
        Commands::Backtest {
            from,
            format,
            model,
        } => run_backtest(&config, from, format, model),
    }
}

pub fn run_import(config: &AppConfig, csv: &Path) -> anyhow::Result<()> {
    let table = read_csv_table(csv)?;
    let mut repo = open_repository(config)?;
    let written = repo.insert_entries(table.entries())?;
    let summary = ImportSummary::collect(&repo, written)?;
    info!(
        "Imported {} rows; corpus now holds {} races",
        summary.written, summary.races
    );

    println!("Imported {} rows into {}", summary.written, config.storage.database_path);
    println!("  Races:      {}", summary.races);
    println!("  Entries:    {}", summary.entries);
    match summary.last_race_date {
        Some(date) => println!("  Last race:  {}", date),
        None => println!("  Last race:  (undated)"),
    }
    Ok(())
}

pub fn run_train(
    config: &AppConfig,
    csv: Option<PathBuf>,
    model_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let corpus = match csv {
        Some(path) => CsvCorpus::new(path).read_corpus(&CorpusQuery::all())?,
        None => open_repository(config)?.read_corpus(&CorpusQuery::all())?,
    };

    let store = model_store(config, model_path);
    let previous = match store.load() {
        Ok(model) => Some(model.encoder),
        Err(ArtifactError::NotFound(_)) => None,
        Err(e) => {
            warn!("Ignoring previous artifact: {}", e);
            None
        }
    };

    let trained = train(&corpus, &config.model, &config.training, previous.as_ref())?;
    store.save(&trained)?;

    let report = &trained.report;
    println!("Model saved to {}", store.path().display());
    println!(
        "  Rows:                {} train / {} validation",
        report.train_rows, report.validation_rows
    );
    println!("  Best epoch:          {} of {}", report.best_epoch, report.epochs_run);
    println!("  Validation accuracy: {:.2}%", report.validation_accuracy * 100.0);
    println!("  Validation loss:     {:.4}", report.validation_loss);
    println!("  Temperature:         {:.2}", report.temperature);
    println!();
    println!("Feature importance:");
    for (name, importance) in trained.feature_importance() {
        println!("  {:20} {:.4}", name, importance);
    }
    Ok(())
}

pub fn run_predict(config: &AppConfig, args: PredictArgs) -> anyhow::Result<()> {
    let card = read_race_card(&args.input)?;
    if card.is_empty() {
        anyhow::bail!("Race card {} has no entries", args.input.display());
    }

    let history = open_repository(config)?.read_corpus(&CorpusQuery::all())?;
    let store = model_store(config, args.model);
    let predictor = load_predictor(config, &store, &history)?;

    let budget = args.budget.unwrap_or(config.betting.initial_budget);
    let mut allocator = BettingAllocator::with_budget(budget, config.betting.clone());
    let options = DailyOptions {
        budget_ratio: args.budget_ratio.unwrap_or(config.betting.budget_ratio),
        market_odds: args.market_odds,
    };
    let day = predict_day(&predictor, &mut allocator, &card, options)?;

    if let Some(path) = &args.save {
        save_daily(&day, path)?;
        info!("Saved predictions to {}", path.display());
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&day)?),
        OutputFormat::Table => print_daily_table(&day),
    }
    Ok(())
}

fn save_daily(day: &DailyPrediction, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(day)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn run_evaluate(
    config: &AppConfig,
    from: Option<NaiveDate>,
    model_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let repo = open_repository(config)?;
    let history = repo.read_corpus(&CorpusQuery::all())?;
    let target = repo.read_corpus(&CorpusQuery {
        from,
        ..Default::default()
    })?;

    let store = model_store(config, model_path);
    let predictor = load_predictor(config, &store, &history)?;
    let report = predictor.evaluate(&target.split_by_race())?;

    println!("=== Prediction Accuracy ===");
    println!("{}", IN_SAMPLE_NOTE);
    println!("  Races:           {}", report.total_races);
    println!(
        "  Win accuracy:    {:.2}% ({})",
        report.win_accuracy * 100.0,
        report.win_hits
    );
    println!(
        "  Place accuracy:  {:.2}% ({})",
        report.place_accuracy * 100.0,
        report.place_hits
    );
    Ok(())
}

pub fn run_backtest(
    config: &AppConfig,
    from: Option<NaiveDate>,
    format: OutputFormat,
    model_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let history = open_repository(config)?.read_corpus(&CorpusQuery::all())?;
    let store = model_store(config, model_path);
    let predictor = load_predictor(config, &store, &history)?;

    let report = Backtester::new(&predictor, config.betting.clone()).run(&history, from)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => {
            print_backtest_table(&report);
            println!();
            println!("{}", IN_SAMPLE_NOTE);
        }
    }
    Ok(())
}
