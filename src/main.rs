mod alignment;
mod artifacts;
mod config;
mod error;
mod pipeline;
mod records;
mod remote;
mod runners;
mod structure;
mod tools;

use crate::alignment::AlignmentBuilder;
use crate::artifacts::{ArtifactStore, Stage};
use crate::config::{Config, TemplatePolicy};
use crate::pipeline::{BatchReport, Orchestrator, RecordPipeline};
use crate::remote::RemoteResolver;
use crate::structure::StructureBuilder;
use crate::tools::{blast::NcbiBlast, modeller::Modeller, rcsb::RcsbDownloader};
use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Homology models for every record of a sequence table",
    long_about = None
)]
struct Args {
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Semicolon-separated table with gene, variant and fasta columns
    #[arg(short, long)]
    table: Option<PathBuf>,

    #[arg(long)]
    assets_root: Option<PathBuf>,

    /// Directory the modeling engine runs in
    #[arg(long)]
    work_dir: Option<PathBuf>,

    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    #[arg(long, value_enum)]
    template_policy: Option<TemplatePolicy>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Model every record whose status is not ok (default)
    Run,
    /// Set each status from the presence of its structure file
    Refresh,
    /// Report pending records and duplicate ids without running anything
    Check,
}

fn build_orchestrator(config: &Config) -> anyhow::Result<Orchestrator> {
    let timeout = Duration::from_secs(config.http_timeout_secs);
    let store = ArtifactStore::new(&config.assets_root);
    let modeller = Arc::new(Modeller::new(
        &config.python_path,
        &config.align_script,
        &config.model_script,
    ));

    let resolver = RemoteResolver::new(
        Arc::new(NcbiBlast::new(&config.blast, timeout)?),
        Arc::new(RcsbDownloader::new(&config.rcsb_url, timeout)?),
        store.clone(),
        config.template_policy,
    );
    let aligner = AlignmentBuilder::new(modeller.clone(), store.clone(), &config.work_dir);
    let builder = StructureBuilder::new(modeller, store.clone(), &config.work_dir);

    Ok(Orchestrator::new(
        store,
        RecordPipeline::new(resolver, aligner, builder),
        &config.status_column,
        config.concurrency,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = Config::load(args.config.as_ref())?;
    if let Some(table) = args.table {
        config.table_path = table;
    }
    if let Some(root) = args.assets_root {
        config.assets_root = root;
    }
    if let Some(work_dir) = args.work_dir {
        config.work_dir = work_dir;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency.max(1);
    }
    if let Some(policy) = args.template_policy {
        config.template_policy = policy;
    }

    if !config.work_dir.exists() {
        std::fs::create_dir_all(&config.work_dir).context("Failed to create working directory")?;
    }
    config.work_dir = std::fs::canonicalize(&config.work_dir).context(format!(
        "Failed to canonicalize work dir: {:?}",
        config.work_dir
    ))?;
    info!("Configuration loaded: {:?}", config);

    let orchestrator = build_orchestrator(&config)?;

    match args.command.unwrap_or(Commands::Run) {
        Commands::Run => match orchestrator.run_batch(&config.table_path).await? {
            BatchReport::NothingToDo => {
                println!("Nothing to do: every record in {:?} is ok.", config.table_path)
            }
            BatchReport::Completed {
                succeeded,
                failed,
                cleanup_warnings,
            } => {
                info!(
                    "Finished: {} modeled, {} failed, {} cleanup warnings. Structures are in {:?}",
                    succeeded,
                    failed,
                    cleanup_warnings,
                    ArtifactStore::new(&config.assets_root).dir(Stage::Structure)
                );
            }
        },
        Commands::Refresh => {
            let report = orchestrator.refresh(&config.table_path)?;
            info!(
                "Refreshed {:?}: {} complete, {} missing",
                config.table_path, report.complete, report.missing
            );
        }
        Commands::Check => {
            let report = orchestrator.check(&config.table_path)?;
            println!("{} records, {} pending", report.total, report.eligible);
            for (row, reason) in &report.invalid {
                warn!("Row {} is not a valid record: {}", row, reason);
            }
            for dup in &report.duplicates {
                warn!(
                    "Row {} has id {} already used by row {}",
                    dup.row, dup.id, dup.first_row
                );
            }
        }
    }

    Ok(())
}
