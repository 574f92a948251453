mod config;
mod error;
mod invoice;
mod invoice_db;
mod llm_extract;
mod pdf_extract;
mod pipeline;
mod report;
mod rules;

use clap::{Parser, Subcommand};
use config::Config;
use invoice_db::InvoiceStore;
use llm_extract::{InvoiceExtractor, LlmExtractor};
use pdf_extract::PdfTextSource;
use pipeline::Pipeline;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Extract, classify and store invoice PDFs.
#[derive(Parser)]
#[command(name = "invoice_ai", version, about)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value = "invoice_ai.toml")]
    config: PathBuf,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the invoice table
    InitDb {
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Process every PDF in the data directory
    Run {
        #[arg(long)]
        data_dir: Option<PathBuf>,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Dry run on one PDF: show text, model output and classification
    TestPdf { file: PathBuf },
    /// Summarise the stored invoices
    Report {
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // init tracing
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let cfg = Config::resolve(&cli.config)?;

    match cli.command {
        Command::InitDb { db } => {
            let store = InvoiceStore::new(db.unwrap_or(cfg.db_path));
            store.init()?;
            println!("Database initialized at: {}", store.path().display());
        }
        Command::Run { data_dir, db, csv } => {
            let data_dir = data_dir.unwrap_or(cfg.data_dir.clone());
            let store = InvoiceStore::new(db.unwrap_or(cfg.db_path.clone()));
            let csv_path = csv.unwrap_or(cfg.csv_path.clone());
            let extractor = build_extractor(&cfg).await?;

            let batch = Pipeline::new(
                &PdfTextSource,
                &extractor,
                &store,
                cfg.pipeline.file_delay(),
            );
            let summary = batch.run(&data_dir).await?;

            if let Err(e) = pipeline::export_csv(&csv_path, &summary.records) {
                error!(path = %csv_path.display(), error = %e, "CSV export failed");
            }

            println!(
                "\nPipeline complete: {} found, {} processed, {} skipped, {} failed",
                summary.discovered, summary.processed, summary.skipped, summary.failed
            );
            match store.count() {
                Ok(rows) => info!(rows, "Rows in invoice table"),
                Err(e) => warn!(error = %e, "Could not count stored invoices"),
            }
        }
        Command::TestPdf { file } => {
            let text = pdf_extract::extract_text(&file);
            if text.trim().is_empty() {
                println!("\nNo text could be extracted from {}\n", file.display());
                return Ok(());
            }
            println!("\n--- Extracted Text (first 2000 chars) ---");
            println!("{}", llm_extract::truncate_chars(&text, 2000));
            println!("--- End ---\n");

            let extractor = build_extractor(&cfg).await?;
            println!("--- LLM Extraction ({}) ---", extractor.model());
            let fields = extractor.extract(&text).await?;
            println!("{}", serde_json::to_string_pretty(&fields)?);
            println!("--- End LLM ---\n");

            let classification = rules::evaluate(&fields);
            println!(
                "Status: {} | Action: {}",
                classification.status, classification.action
            );
        }
        Command::Report { db } => {
            let store = InvoiceStore::new(db.unwrap_or(cfg.db_path));
            if !store.is_initialized() {
                return Err(error::PipelineError::StoreNotInitialized(
                    store.path().to_path_buf(),
                )
                .into());
            }
            let rows = store.all_records()?;
            report::Report::build(&rows).print();
        }
    }

    Ok(())
}

/// Resolve credentials once and build the model client.
async fn build_extractor(cfg: &Config) -> Result<LlmExtractor, error::ExtractError> {
    let endpoint = llm_extract::resolve_endpoint(&cfg.llm, |key| std::env::var(key).ok())?;
    let extractor = LlmExtractor::new(endpoint, &cfg.llm, &cfg.pipeline)?;
    extractor.ensure_reachable().await?;
    Ok(extractor)
}
