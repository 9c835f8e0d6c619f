//! Command surface for the caseload reporting pipeline.
//!
//! Embedders can call:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_store_command`] for store-backed commands against an open
//!   [`SqliteCaseloadStore`].
//!
//! Every command prints pretty JSON on stdout; logs go to stderr.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use caseload_core::registry::{Field, StageId};
use caseload_core::report::{
    fiscal_year_report, grant_cycle_report, grant_cycles_from_json, ReportSheets,
};
use caseload_core::{dates, now_utc, AccountId, Pipeline, PipelineConfig, Snapshot, Timestamp};
use caseload_store_sqlite::SqliteCaseloadStore;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "caseload")]
#[command(about = "Caseload reporting pipeline CLI")]
pub struct Cli {
    #[arg(long, default_value = "./caseload.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load a CRM extract into the store.
    Import(ImportArgs),
    /// Recompute every reporting record from the stored snapshot.
    Recompute(PipelineArgs),
    Records {
        #[command(subcommand)]
        command: RecordsCommand,
    },
    Report {
        #[command(subcommand)]
        command: ReportCommand,
    },
    /// List pipeline stages with the fields each reads and writes.
    Fields,
    Status,
    /// Run the pipeline over a snapshot file without touching the store.
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// JSON document `{accounts, activities, wage_records}`.
    #[arg(long)]
    snapshot: PathBuf,
}

#[derive(Debug, Args)]
pub struct PipelineArgs {
    /// "As of" instant; defaults to the current UTC time.
    #[arg(long)]
    now: Option<String>,
    /// Pipeline configuration JSON; defaults to the built-in v1 config.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum RecordsCommand {
    Show(RecordsShowArgs),
    List(RecordsListArgs),
}

#[derive(Debug, Args)]
pub struct RecordsShowArgs {
    #[arg(long)]
    account_id: i64,
}

#[derive(Debug, Args)]
pub struct RecordsListArgs {
    #[arg(long)]
    fiscal_year: Option<i32>,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Subcommand)]
pub enum ReportCommand {
    FiscalYear(FiscalYearArgs),
    Grant(GrantArgs),
}

#[derive(Debug, Args)]
pub struct FiscalYearArgs {
    #[arg(long)]
    year: i32,
    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Debug, Args)]
pub struct GrantArgs {
    /// JSON document `{grant: {cycle: {start, end}}}`.
    #[arg(long)]
    cycles: PathBuf,
    #[arg(long)]
    grant: Option<String>,
    #[arg(long)]
    cycle: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[arg(long)]
    input: PathBuf,
    /// Write records here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Debug, Serialize)]
struct StageEntry {
    stage: &'static str,
    reads: Vec<&'static str>,
    writes: Vec<&'static str>,
    columns: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct RunOutput<'a> {
    report: &'a caseload_core::RunReport,
    records: &'a [caseload_core::ReportingRecord],
}

/// Executes the parsed top-level CLI command graph.
///
/// # Errors
/// Returns an error when input files cannot be read, configuration is
/// invalid, or store access fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Fields => print_fields(),
        Command::Run(args) => run_file(&args),
        store_command => {
            let mut store = SqliteCaseloadStore::open(&cli.db)?;
            store.migrate()?;
            run_store_command(store_command, &mut store)
        }
    }
}

/// Executes a store-backed command against an existing store handle.
///
/// # Errors
/// Returns an error when the command's inputs are invalid or persistence
/// fails.
pub fn run_store_command(command: Command, store: &mut SqliteCaseloadStore) -> Result<()> {
    match command {
        Command::Import(args) => {
            let snapshot = read_snapshot(&args.snapshot)?;
            let report = store.import_snapshot(&snapshot)?;
            print_json(&report)
        }
        Command::Recompute(args) => {
            let pipeline = build_pipeline(args.config.as_deref())?;
            let now = resolve_now(args.now.as_deref())?;
            let stored = store.recompute(&pipeline, now)?;
            print_json(&stored)
        }
        Command::Records { command } => run_records(command, store),
        Command::Report { command } => run_report(command, store),
        Command::Status => print_json(&store.status()?),
        Command::Fields | Command::Run(_) => Err(anyhow!(
            "internal dispatch error: command does not use the store"
        )),
    }
}

fn run_records(command: RecordsCommand, store: &SqliteCaseloadStore) -> Result<()> {
    match command {
        RecordsCommand::Show(args) => {
            let Some(record) = store.get_record(AccountId(args.account_id))? else {
                return Err(anyhow!(
                    "reporting record not found for account {}",
                    args.account_id
                ));
            };
            print_json(&record)
        }
        RecordsCommand::List(args) => {
            let records = store.list_records(args.fiscal_year, args.limit)?;
            print_json(&records)
        }
    }
}

fn run_report(command: ReportCommand, store: &SqliteCaseloadStore) -> Result<()> {
    match command {
        ReportCommand::FiscalYear(args) => {
            let pipeline = build_pipeline(args.pipeline.config.as_deref())?;
            let now = resolve_now(args.pipeline.now.as_deref())?;
            let snapshot = store.load_snapshot()?;
            let report = fiscal_year_report(&pipeline, &snapshot, args.year, now)
                .map_err(|err| anyhow!("fiscal year report failed: {err}"))?;
            print_json(&report)
        }
        ReportCommand::Grant(args) => {
            let config = load_config(args.config.as_deref())?;
            let cycles = grant_cycles_from_json(&read_json(&args.cycles)?)
                .map_err(|err| anyhow!("invalid grant cycles: {err}"))?;
            let records = store.list_records(None, None)?;
            if records.is_empty() {
                return Err(anyhow!(
                    "no reporting records stored; run `caseload recompute` first"
                ));
            }

            let selected: Vec<_> = cycles
                .iter()
                .filter(|cycle| matches_filter(args.grant.as_deref(), &cycle.grant))
                .filter(|cycle| matches_filter(args.cycle.as_deref(), &cycle.cycle))
                .collect();
            if selected.is_empty() {
                return Err(anyhow!("no grant cycle matches the requested filters"));
            }

            let sheets = selected
                .into_iter()
                .map(|cycle| {
                    grant_cycle_report(&records, cycle, &config)
                        .map_err(|err| anyhow!("grant report failed: {err}"))
                })
                .collect::<Result<Vec<ReportSheets>>>()?;
            print_json(&sheets)
        }
    }
}

fn run_file(args: &RunArgs) -> Result<()> {
    let pipeline = build_pipeline(args.pipeline.config.as_deref())?;
    let now = resolve_now(args.pipeline.now.as_deref())?;
    let snapshot = read_snapshot(&args.input)?;
    let output = pipeline.run(&snapshot, now);

    match &args.output {
        Some(path) => {
            let body = serde_json::to_string_pretty(&output.records)?;
            fs::write(path, body)
                .with_context(|| format!("failed to write records to {}", path.display()))?;
            info!(path = %path.display(), records = output.records.len(), "records written");
            print_json(&output.report)
        }
        None => print_json(&RunOutput {
            report: &output.report,
            records: &output.records,
        }),
    }
}

fn print_fields() -> Result<()> {
    let entries: Vec<StageEntry> = StageId::STANDARD
        .iter()
        .map(|stage| {
            let spec = stage.spec();
            StageEntry {
                stage: stage.as_str(),
                reads: spec.reads.iter().map(|field| field.as_str()).collect(),
                writes: spec.writes.iter().map(|field| field.as_str()).collect(),
                columns: spec
                    .writes
                    .iter()
                    .flat_map(|field| Field::columns(*field).iter().copied())
                    .collect(),
            }
        })
        .collect();
    print_json(&entries)
}

fn matches_filter(filter: Option<&str>, value: &str) -> bool {
    filter.is_none() || filter == Some(value)
}

fn build_pipeline(config_path: Option<&Path>) -> Result<Pipeline> {
    let config = load_config(config_path)?;
    Pipeline::new(config).map_err(|err| anyhow!("failed to build pipeline: {err}"))
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::v1());
    };
    let value = read_json(path)?;
    PipelineConfig::from_json(&value)
        .map_err(|err| anyhow!("invalid config {}: {err}", path.display()))
}

fn resolve_now(raw: Option<&str>) -> Result<Timestamp> {
    match raw {
        Some(value) => {
            dates::parse_as_of(value).map_err(|err| anyhow!("invalid --now value: {err}"))
        }
        None => Ok(now_utc()),
    }
}

fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let value = read_json(path)?;
    serde_json::from_value(value)
        .with_context(|| format!("invalid snapshot document {}", path.display()))
}

fn read_json(path: &Path) -> Result<Value> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&body).with_context(|| format!("failed to parse {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
