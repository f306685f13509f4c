// ========================================================================================
//
//                        THE FIELD ORCHESTRATOR: BRACHION
//
// ========================================================================================
//
// This binary is the conductor of the classification pipeline. It owns the
// process lifecycle: argument parsing, one-time loading of the shared
// read-only artifacts (the growth reference and the optional quality model),
// driving batches through the core, and writing reports. The core modules
// stay pure; every file handle and every exit code lives here.

use brachion::explain::{ImportanceWeights, explain};
use brachion::forecast::{aggregate_monthly, forecast, prevalence_summary};
use brachion::intake::{
    read_classified_records_path, read_measurements_path, run_pipeline, write_report,
};
use brachion::quality::{LogisticModel, QualityGate};
use brachion::reference::LmsTable;
use brachion::types::{Measurement, parse_appetite_label, parse_sex_label};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use std::error::Error;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(
    name = "brachion",
    about = "MUAC-based malnutrition classification and caseload forecasting"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run quality gate, Z-score, and pathway classification over an intake batch
    Score(ScoreArgs),
    /// Aggregate classified records and project the next three months
    Forecast(ForecastArgs),
    /// Explain a single classification in ranked, human-readable terms
    Explain(ExplainArgs),
}

#[derive(Args)]
struct ScoreArgs {
    /// Intake TSV with child_id, sex, age_months, muac_mm, edema, appetite, danger_signs
    input: PathBuf,

    /// Growth-reference TSV (month, sex, l, m, s)
    #[arg(long, default_value = "data/acfa-lms.tsv")]
    reference: PathBuf,

    /// Optional TOML quality-model artifact; rules-only when absent
    #[arg(long)]
    model: Option<PathBuf>,

    /// Report TSV destination; stdout when absent
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct ForecastArgs {
    /// Classified-record TSV with status, date columns
    input: PathBuf,

    /// End of the trailing 12-month aggregation window (YYYY-MM-DD, default today)
    #[arg(long)]
    as_of: Option<NaiveDate>,
}

#[derive(Args)]
struct ExplainArgs {
    /// Growth-reference TSV (month, sex, l, m, s)
    #[arg(long, default_value = "data/acfa-lms.tsv")]
    reference: PathBuf,

    #[arg(long)]
    sex: String,
    #[arg(long)]
    age_months: i32,
    #[arg(long)]
    muac_mm: i32,
    #[arg(long, default_value_t = 0)]
    edema: i32,
    #[arg(long, default_value = "good")]
    appetite: String,
    #[arg(long)]
    danger_signs: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Score(args) => run_score(args),
        Command::Forecast(args) => run_forecast(args),
        Command::Explain(args) => run_explain(args),
    };
    if let Err(error) = outcome {
        eprintln!("Error: {error}");
        process::exit(1);
    }
}

fn run_score(args: ScoreArgs) -> Result<(), Box<dyn Error>> {
    let table = LmsTable::from_tsv_path(&args.reference)?;
    let gate = match &args.model {
        Some(path) => QualityGate::with_model(Box::new(LogisticModel::load(path)?)),
        None => QualityGate::rule_based(),
    };

    let records = read_measurements_path(&args.input)?;
    let outcomes = run_pipeline(&records, &gate, &table);

    match &args.output {
        Some(path) => {
            write_report(File::create(path)?, &outcomes)?;
            log::info!("Wrote report for {} record(s) to '{}'", outcomes.len(), path.display());
        }
        None => write_report(io::stdout().lock(), &outcomes)?,
    }
    Ok(())
}

fn run_forecast(args: ForecastArgs) -> Result<(), Box<dyn Error>> {
    let records = read_classified_records_path(&args.input)?;
    let as_of = args
        .as_of
        .unwrap_or_else(|| Local::now().date_naive());

    let aggregates = aggregate_monthly(&records, as_of);
    let result = forecast(&aggregates);
    let summary = prevalence_summary(&records);

    let payload = serde_json::json!({
        "summary": summary,
        "forecast": result,
    });
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn run_explain(args: ExplainArgs) -> Result<(), Box<dyn Error>> {
    let table = LmsTable::from_tsv_path(&args.reference)?;
    let sex = parse_sex_label(&args.sex)?;
    let measurement = Measurement {
        age_months: args.age_months,
        sex,
        muac_mm: args.muac_mm,
        edema: args.edema,
        appetite: parse_appetite_label(&args.appetite),
        danger_signs: args.danger_signs,
    };

    let zscore = brachion::zscore::compute_zscore(
        measurement.muac_cm(),
        measurement.age_months,
        measurement.sex,
        &table,
    )?;
    let classification = brachion::classify::classify_pathway(&measurement, zscore);
    let explanation = explain(&measurement, &classification, &ImportanceWeights::default());

    let payload = serde_json::json!({
        "muac_zscore": zscore,
        "classification": classification,
        "explanation": explanation,
    });
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &payload)?;
    writeln!(stdout)?;
    Ok(())
}
