//! `smeta`: audit PIR cost estimates against the SCP price book.
//!
//! ## Commands
//!
//! - `audit`: extract, resolve and recompute every table of a document
//! - `normalize`: show the canonical text and numbers of each table
//! - `lookup`: list the reference entries matching a table code and year
//! - `import`: load reference data into a DuckDB file (feature `duckdb`)

mod display;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use smeta_ai::{DEFAULT_BASE_URL, DEFAULT_MODEL, OllamaBackend};
use smeta_core::{AuditConfig, RawTablePayload, normalize_table};
use smeta_pipeline::{CancelHandle, PipelineOrchestrator};
use smeta_store::{MemoryStore, ReferenceStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "smeta")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Audit PIR cost estimates against regulated SCP reference tables", long_about = None)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON config file; flags and environment variables override it
    #[arg(long, global = true, env = "SMETA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Audit every table of a document
    Audit {
        /// Table payloads (JSON array, or a single payload object)
        input: PathBuf,

        #[command(flatten)]
        source: ReferenceSource,

        /// Allowed relative deviation (0.005 = 0.5%)
        #[arg(long, env = "SMETA_TOLERANCE")]
        tolerance: Option<Decimal>,

        /// Reference-to-claim unit multiplier
        #[arg(long, env = "SMETA_UNIT_SCALE")]
        unit_scale: Option<Decimal>,

        /// Tables audited concurrently
        #[arg(long, env = "SMETA_WORKERS")]
        workers: Option<usize>,

        /// Ollama server URL
        #[arg(long, env = "OLLAMA_BASE_URL", default_value = DEFAULT_BASE_URL)]
        ollama_url: String,

        /// Ollama model name
        #[arg(long, env = "OLLAMA_MODEL", default_value = DEFAULT_MODEL)]
        model: String,

        /// Print the report as JSON instead of cards
        #[arg(long)]
        json: bool,

        /// Also write the JSON report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show what the normalizer makes of each table
    Normalize {
        input: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// List reference entries for a table code and year
    Lookup {
        code: String,

        year: i32,

        #[command(flatten)]
        source: ReferenceSource,
    },

    /// Import reference entries into a DuckDB database
    #[cfg(feature = "duckdb")]
    Import {
        /// JSON array of entries, or a directory with reference_entries.parquet
        /// and reference_coefficients.parquet
        source: PathBuf,

        /// DuckDB database file (created if missing)
        #[arg(long)]
        db: PathBuf,
    },
}

#[derive(Args)]
struct ReferenceSource {
    /// Reference entries as a JSON array
    #[arg(long, env = "SMETA_REFERENCES")]
    references: Option<PathBuf>,

    /// DuckDB database with imported reference entries
    #[cfg(feature = "duckdb")]
    #[arg(long, env = "SMETA_DB", conflicts_with = "references")]
    db: Option<PathBuf>,
}

impl ReferenceSource {
    fn open(&self) -> Result<Arc<dyn ReferenceStore>> {
        #[cfg(feature = "duckdb")]
        {
            if let Some(db) = &self.db {
                let store = smeta_store::DuckStore::open_persistent(db)
                    .with_context(|| format!("opening {}", db.display()))?;
                if !store.has_entries() {
                    warn!(db = %db.display(), "reference database is empty, run `smeta import` first");
                }
                return Ok(Arc::new(store));
            }
        }
        let Some(path) = &self.references else {
            bail!("no reference data: pass --references (or --db with the duckdb feature)");
        };
        let store = MemoryStore::from_json_path(path)
            .with_context(|| format!("loading references from {}", path.display()))?;
        Ok(Arc::new(store))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Audit {
            input,
            source,
            tolerance,
            unit_scale,
            workers,
            ollama_url,
            model,
            json,
            output,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(tolerance) = tolerance {
                config.tolerance = tolerance;
            }
            if let Some(scale) = unit_scale {
                config.reference_unit_scale = scale;
            }
            if let Some(workers) = workers {
                config.worker_limit = workers;
            }
            config.validate().context("invalid configuration")?;

            let payloads = read_payloads(&input)?;
            let store = source.open()?;
            let backend = Arc::new(OllamaBackend::new(ollama_url, model));
            info!(
                tables = payloads.len(),
                model = backend.model(),
                tolerance = %config.tolerance,
                "starting audit"
            );
            let orchestrator = PipelineOrchestrator::from_config(&config, backend, store);

            let cancel = CancelHandle::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling unfinished tables");
                    on_signal.cancel();
                }
            });

            let report = orchestrator
                .run(payloads, cancel.token())
                .await
                .context("auditing document")?;

            if let Some(path) = &output {
                let text = serde_json::to_string_pretty(&report)?;
                std::fs::write(path, text)
                    .with_context(|| format!("writing report to {}", path.display()))?;
                info!(path = %path.display(), "report written");
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                display::print_report(&report);
            }
        }

        Commands::Normalize { input, json } => {
            let payloads = read_payloads(&input)?;
            let mut tables = Vec::with_capacity(payloads.len());
            for payload in &payloads {
                match normalize_table(payload) {
                    Ok(table) => tables.push(table),
                    Err(e) => warn!(table = payload.table_index, error = %e, "skipping table"),
                }
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&tables)?);
            } else {
                for table in &tables {
                    display::print_normalized(table);
                }
            }
        }

        Commands::Lookup { code, year, source } => {
            let store = source.open()?;
            let entries = store
                .find(&code, year)
                .await
                .with_context(|| format!("looking up {code} for {year}"))?;
            if entries.is_empty() {
                println!("No reference entries for {code} in {year}.");
            }
            for entry in &entries {
                display::print_entry_card(entry);
            }
        }

        #[cfg(feature = "duckdb")]
        Commands::Import { source, db } => {
            let store = smeta_store::DuckStore::open_persistent(&db)
                .with_context(|| format!("opening {}", db.display()))?;
            if source.is_dir() {
                store
                    .load_parquet_dir(&source)
                    .with_context(|| format!("importing parquet from {}", source.display()))?;
            } else {
                let entries = MemoryStore::from_json_path(&source)
                    .with_context(|| format!("loading {}", source.display()))?;
                let entries: Vec<_> = entries.entries().into_iter().cloned().collect();
                store.insert_entries(&entries)?;
            }
            println!(
                "Imported {} entries ({} coefficients) into {}",
                store.entry_count()?,
                store.coefficient_count()?,
                db.display()
            );
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<AuditConfig> {
    match path {
        Some(path) => AuditConfig::from_json_path(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(AuditConfig::default()),
    }
}

/// Read a JSON array of payloads, or a single payload object.
fn read_payloads(path: &Path) -> Result<Vec<RawTablePayload>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    let payloads = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(payloads)
}
