mod export;
mod render;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use query_grid_core::{
    analyze, level_slug, GridCombination, LoadError, Record, RecordStore, StatisticsSummary,
    DEFAULT_SYNTHETIC_COUNT, DEFAULT_SYNTHETIC_SEED,
};
use query_grid_ingest::{load_store, ColumnPolicy};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing_subscriber::EnvFilter;

use crate::render::{AxisTitles, RenderConfig};

const REPORT_CONTRACT_VERSION: &str = "grid-report.v1";
const EXIT_COMBINATION_FAILED: u8 = 1;
const EXIT_LOAD_ABORTED: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "qgrid")]
#[command(about = "Cross-tabulate query records by domain and intent")]
struct Cli {
    /// CSV or spreadsheet with First_domain, Second_Domain, First_Intent and Second_Intent
    /// columns. Synthetic data is used when omitted or missing.
    input: Option<PathBuf>,

    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    #[arg(long, default_value = ".")]
    csv_dir: PathBuf,

    #[arg(long, default_value_t = DEFAULT_SYNTHETIC_SEED)]
    seed: u64,

    #[arg(long, default_value_t = DEFAULT_SYNTHETIC_COUNT)]
    sample_size: usize,

    /// YAML file overriding heatmap fonts, palette and geometry.
    #[arg(long)]
    render_config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LoadErrorArg::Fallback)]
    on_load_error: LoadErrorArg,

    #[arg(long, value_enum, default_value_t = FormatArg::Text)]
    format: FormatArg,

    #[arg(long, default_value_t = false)]
    no_render: bool,

    #[arg(long, default_value_t = false)]
    no_csv: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LoadErrorArg {
    /// Replace unusable input with synthetic data.
    Fallback,
    /// Stop with a non-zero exit status.
    Abort,
    /// Keep input that only lacks some category columns.
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum DataSource {
    Input {
        path: PathBuf,
    },
    Synthetic {
        seed: u64,
        count: usize,
        fallback_reason: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
struct CombinationReport {
    combination: String,
    domain_level: u8,
    intent_level: u8,
    title: String,
    domain_column: Option<String>,
    intent_column: Option<String>,
    statistics: Option<StatisticsSummary>,
    csv_path: Option<PathBuf>,
    heatmap_path: Option<PathBuf>,
    error: Option<String>,
}

impl CombinationReport {
    fn new(combination: GridCombination) -> Self {
        Self {
            combination: combination.slug(),
            domain_level: combination.domain_level,
            intent_level: combination.intent_level,
            title: AxisTitles::for_combination(combination).heading(),
            domain_column: None,
            intent_column: None,
            statistics: None,
            csv_path: None,
            heatmap_path: None,
            error: None,
        }
    }

    fn failed(&self) -> bool {
        self.error.is_some()
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(REPORT_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": REPORT_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let render_config = match cli.render_config.as_deref() {
        Some(path) => RenderConfig::from_yaml_file(path)?,
        None => RenderConfig::default(),
    };

    let (store, source) = match load_records(cli) {
        Ok(loaded) => loaded,
        Err(err) => {
            tracing::error!("Aborting: {err}");
            eprintln!("Error: failed to load input: {err}");
            return Ok(ExitCode::from(EXIT_LOAD_ABORTED));
        }
    };

    let reports = GridCombination::ALL
        .iter()
        .map(|combination| run_combination(cli, &store, *combination, &render_config))
        .collect::<Vec<_>>();
    let failed = reports.iter().filter(|report| report.failed()).count();

    match cli.format {
        FormatArg::Text => print_text_report(&reports),
        FormatArg::Json => emit_json(serde_json::json!({
            "source": source,
            "records": store.len(),
            "dataset_fingerprint": dataset_fingerprint(store.records()),
            "rejected_rows": store.rejected(),
            "combinations": &reports,
            "failed_combinations": failed,
        }))?,
    }

    if failed > 0 {
        tracing::error!("{failed} of {} combinations failed", reports.len());
        return Ok(ExitCode::from(EXIT_COMBINATION_FAILED));
    }
    Ok(ExitCode::SUCCESS)
}

fn load_records(cli: &Cli) -> Result<(RecordStore, DataSource), LoadError> {
    let synthetic = |fallback_reason: Option<String>| {
        tracing::info!("Generating {} synthetic records (seed {})", cli.sample_size, cli.seed);
        (
            RecordStore::synthetic(cli.seed, cli.sample_size),
            DataSource::Synthetic { seed: cli.seed, count: cli.sample_size, fallback_reason },
        )
    };

    let Some(path) = cli.input.as_deref() else {
        return Ok(synthetic(None));
    };

    let loaded = if path.exists() {
        let policy = match cli.on_load_error {
            LoadErrorArg::Partial => ColumnPolicy::Partial,
            LoadErrorArg::Fallback | LoadErrorArg::Abort => ColumnPolicy::Strict,
        };
        load_store(path, policy)
    } else {
        Err(LoadError::ParseFailure(format!("input file does not exist: {}", path.display())))
    };

    match loaded {
        Ok(store) => {
            for column in store.schema().required_columns() {
                if !store.has_column(column) {
                    tracing::warn!("Column {column} is absent; grids using it will fail");
                }
            }
            Ok((store, DataSource::Input { path: path.to_path_buf() }))
        }
        Err(err) if cli.on_load_error == LoadErrorArg::Abort => Err(err),
        Err(err) => {
            tracing::warn!("Falling back to synthetic data: {err}");
            Ok(synthetic(Some(err.to_string())))
        }
    }
}

fn run_combination(
    cli: &Cli,
    store: &RecordStore,
    combination: GridCombination,
    render_config: &RenderConfig,
) -> CombinationReport {
    let mut report = CombinationReport::new(combination);
    let analysis = match analyze(store, combination) {
        Ok(analysis) => analysis,
        Err(err) => {
            tracing::error!("Combination {combination} failed: {err}");
            report.error = Some(err.to_string());
            return report;
        }
    };

    report.domain_column = Some(analysis.matrix.domain_column().to_string());
    report.intent_column = Some(analysis.matrix.intent_column().to_string());
    report.statistics = Some(analysis.statistics);

    if !cli.no_csv {
        let path = csv_path(&cli.csv_dir, combination);
        match export::write_matrix_csv(&analysis.matrix, &path) {
            Ok(()) => {
                tracing::info!("Matrix exported to {}", path.display());
                report.csv_path = Some(path);
            }
            Err(err) => {
                tracing::error!("Combination {combination} CSV export failed: {err:#}");
                report.error = Some(format!("{err:#}"));
            }
        }
    }

    if !cli.no_render {
        let path = heatmap_path(&cli.output_dir, combination);
        let titles = AxisTitles::for_combination(combination);
        match render::write_heatmap(&analysis.matrix, &titles, render_config, &path) {
            Ok(()) => {
                tracing::info!("Heatmap saved to {}", path.display());
                report.heatmap_path = Some(path);
            }
            Err(err) => {
                tracing::error!("Combination {combination} heatmap failed: {err:#}");
                report.error.get_or_insert_with(|| format!("{err:#}"));
            }
        }
    }

    report
}

fn csv_path(dir: &Path, combination: GridCombination) -> PathBuf {
    dir.join(format!("query_grid_{}.csv", combination.slug()))
}

fn heatmap_path(dir: &Path, combination: GridCombination) -> PathBuf {
    dir.join(format!(
        "{}_domain_vs_{}_intent.svg",
        level_slug(combination.domain_level),
        level_slug(combination.intent_level)
    ))
}

fn print_text_report(reports: &[CombinationReport]) {
    for report in reports {
        println!("\n=== {} ===", report.title);
        let Some(stats) = report.statistics.as_ref() else {
            println!("Unavailable: {}", report.error.as_deref().unwrap_or("unknown error"));
            continue;
        };
        println!("Total queries: {}", stats.total_queries);
        println!("Domains: {}", stats.total_domains);
        println!("Intents: {}", stats.total_intents);
        println!("Max count: {}", stats.max_count);
        println!("Min count: {}", stats.min_count);
        println!("Mean count: {:.2}", stats.mean_count);
        println!("Std: {:.2}", stats.std_count);
        if let Some(error) = report.error.as_deref() {
            println!("Output failed: {error}");
        }
    }

    let files = reports
        .iter()
        .flat_map(|report| [report.heatmap_path.as_ref(), report.csv_path.as_ref()])
        .flatten()
        .collect::<Vec<_>>();
    if !files.is_empty() {
        println!("\nGenerated files:");
        for file in files {
            println!("- {}", file.display());
        }
    }
}

/// Order-independent digest of the record collection.
fn dataset_fingerprint(records: &[Record]) -> String {
    let mut keys = records
        .iter()
        .map(|record| {
            [
                record.domain_l1.as_str(),
                record.domain_l2.as_str(),
                record.intent_l1.as_str(),
                record.intent_l2.as_str(),
                record.query_text.as_str(),
            ]
            .join("\u{1f}")
        })
        .collect::<Vec<_>>();
    keys.sort();

    let mut hasher = Sha256::new();
    for key in keys {
        hasher.update(key.as_bytes());
        hasher.update(b"\n");
    }
    let digest_hex = format!("{:x}", hasher.finalize());
    format!("ds_{}", &digest_hex[..16])
}
