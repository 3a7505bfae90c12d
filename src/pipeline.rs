use crate::alignment::AlignmentBuilder;
use crate::artifacts::ArtifactStore;
use crate::error::StageError;
use crate::records::{DuplicateId, Record, RecordTable, Status};
use crate::remote::RemoteResolver;
use crate::structure::{StructureBuild, StructureBuilder};
use anyhow::Result;
use log::{error, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

/// Terminal state of one record's attempt.
#[derive(Debug)]
pub struct RecordOutcome {
    pub row: usize,
    pub id: String,
    pub result: Result<StructureBuild, StageError>,
}

impl RecordOutcome {
    pub fn status(&self) -> Status {
        match &self.result {
            Ok(_) => Status::Ok,
            Err(e) => Status::failed(e.to_string()),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum BatchReport {
    NothingToDo,
    Completed {
        succeeded: usize,
        failed: usize,
        cleanup_warnings: usize,
    },
}

#[derive(Debug, PartialEq, Eq)]
pub struct RefreshReport {
    pub complete: usize,
    pub missing: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub struct CheckReport {
    pub total: usize,
    pub eligible: usize,
    pub invalid: Vec<(usize, String)>,
    pub duplicates: Vec<DuplicateId>,
}

/// The stages one record goes through, in order.
pub struct RecordPipeline {
    resolver: RemoteResolver,
    aligner: AlignmentBuilder,
    builder: StructureBuilder,
}

impl RecordPipeline {
    pub fn new(
        resolver: RemoteResolver,
        aligner: AlignmentBuilder,
        builder: StructureBuilder,
    ) -> Self {
        Self {
            resolver,
            aligner,
            builder,
        }
    }

    /// Resolve -> describe -> align -> build. Stops at the first failing stage.
    pub async fn run(&self, record: &Record) -> Result<StructureBuild, StageError> {
        let id = record.id();
        info!(
            "Starting structure generation for gene: {}, variant: {}",
            record.gene, record.variant
        );
        let template = self.resolver.resolve(&record.gene, &record.fasta).await?;
        let description = self
            .aligner
            .build_description(id, &record.fasta, &template)
            .await?;
        let alignment = self
            .aligner
            .build_alignment(id, &record.gene, &description)
            .await?;
        self.builder.build(id, &record.gene, &alignment).await
    }
}

pub struct Orchestrator {
    store: ArtifactStore,
    stages: Arc<RecordPipeline>,
    status_column: String,
    concurrency: usize,
}

impl Orchestrator {
    pub fn new(
        store: ArtifactStore,
        stages: RecordPipeline,
        status_column: &str,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            stages: Arc::new(stages),
            status_column: status_column.to_string(),
            concurrency: concurrency.max(1),
        }
    }

    /// Processes every row whose status is not `ok` and writes the statuses
    /// back in a single rewrite of the table.
    pub async fn run_batch(&self, table_path: &Path) -> Result<BatchReport> {
        let mut table = RecordTable::load(table_path, &self.status_column)?;
        self.store.ensure_dirs()?;
        table.ensure_status_column();

        let eligible = table.eligible_rows();
        if eligible.is_empty() {
            info!("No models to be created.");
            return Ok(BatchReport::NothingToDo);
        }
        info!(
            "{} of {} records need a structure",
            eligible.len(),
            table.len()
        );

        let duplicates: HashMap<usize, DuplicateId> = table
            .duplicate_ids()
            .into_iter()
            .map(|d| (d.row, d))
            .collect();

        let mut statuses: BTreeMap<usize, Status> = BTreeMap::new();
        let mut gene_locks: HashMap<String, Arc<Mutex<()>>> = HashMap::new();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set: JoinSet<RecordOutcome> = JoinSet::new();

        for &row in &eligible {
            let Some(record) = table.record(row) else {
                continue;
            };
            if let Err(reason) = record.validate() {
                warn!(
                    "Row {} is not a valid record ({}); not processing it",
                    row, reason
                );
                let err = StageError::InvalidRecord { row, reason };
                statuses.insert(row, Status::failed(err.to_string()));
                continue;
            }
            if let Some(dup) = duplicates.get(&row) {
                warn!(
                    "Row {} reuses id {} of row {}; not processing it",
                    row, dup.id, dup.first_row
                );
                let err = StageError::DuplicateId {
                    id: dup.id.clone(),
                    first_row: dup.first_row,
                };
                statuses.insert(row, Status::failed(err.to_string()));
                continue;
            }

            // Rows of one gene share <blast_dir>/<gene>.pdb.
            let gene_lock = Arc::clone(gene_locks.entry(record.gene.clone()).or_default());
            let semaphore = Arc::clone(&semaphore);
            let stages = Arc::clone(&self.stages);

            join_set.spawn(async move {
                let id = record.id().to_string();
                let _gene_guard = gene_lock.lock().await;
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => stages.run(&record).await,
                    Err(e) => Err(StageError::Worker {
                        id: id.clone(),
                        reason: e.to_string(),
                    }),
                };
                RecordOutcome { row, id, result }
            });
        }

        let mut succeeded = 0;
        let mut failed = 0;
        let mut cleanup_warnings = 0;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => {
                    match &outcome.result {
                        Ok(build) => {
                            info!("Successfully modeled {}: {:?}", outcome.id, build.path);
                            cleanup_warnings += build.warnings.len();
                        }
                        Err(e) => error!("Modeling {} failed: {}", outcome.id, e),
                    }
                    statuses.insert(outcome.row, outcome.status());
                }
                Err(e) => error!("Worker task failed: {}", e),
            }
        }

        // Rows whose worker never reported back.
        for &row in &eligible {
            if !statuses.contains_key(&row) {
                let id = table
                    .record(row)
                    .map(|r| r.id().to_string())
                    .unwrap_or_default();
                let err = StageError::Worker {
                    id,
                    reason: "task panicked or was cancelled".to_string(),
                };
                statuses.insert(row, Status::failed(err.to_string()));
            }
        }

        for (row, status) in &statuses {
            if status.is_ok() {
                succeeded += 1;
                self.store.mark_complete(&mut table, *row);
            } else {
                failed += 1;
                table.set_status(*row, status);
            }
        }
        table.save()?;
        info!(
            "Updated {:?}: {} succeeded, {} failed",
            table.path(),
            succeeded,
            failed
        );

        Ok(BatchReport::Completed {
            succeeded,
            failed,
            cleanup_warnings,
        })
    }

    /// Sets each row to `ok` if its final structure exists and clears it
    /// otherwise.
    pub fn refresh(&self, table_path: &Path) -> Result<RefreshReport> {
        let mut table = RecordTable::load(table_path, &self.status_column)?;
        table.ensure_status_column();

        let mut report = RefreshReport {
            complete: 0,
            missing: 0,
        };
        let rows: Vec<(usize, Record)> = table.records().collect();
        for (row, record) in rows {
            if self.store.is_complete(&record) {
                report.complete += 1;
                self.store.mark_complete(&mut table, row);
            } else {
                report.missing += 1;
                table.set_status(row, &Status::Absent);
            }
        }
        table.save()?;
        Ok(report)
    }

    pub fn check(&self, table_path: &Path) -> Result<CheckReport> {
        let table = RecordTable::load(table_path, &self.status_column)?;
        Ok(CheckReport {
            total: table.len(),
            eligible: table.eligible_rows().len(),
            invalid: table.invalid_rows(),
            duplicates: table.duplicate_ids(),
        })
    }
}
