use crate::artifacts::{ArtifactStore, Stage};
use crate::config::TemplatePolicy;
use crate::error::StageError;
use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Similarity search returning candidate structure ids, most relevant first.
#[async_trait]
pub trait SequenceSearch: Send + Sync {
    async fn search(&self, sequence: &str) -> Result<Vec<String>>;
}

/// Raw structure file bytes by structure id.
#[async_trait]
pub trait StructureSource: Send + Sync {
    async fn fetch(&self, structure_id: &str) -> Result<Vec<u8>>;
}

pub struct RemoteResolver {
    search: Arc<dyn SequenceSearch>,
    source: Arc<dyn StructureSource>,
    store: ArtifactStore,
    policy: TemplatePolicy,
}

impl RemoteResolver {
    pub fn new(
        search: Arc<dyn SequenceSearch>,
        source: Arc<dyn StructureSource>,
        store: ArtifactStore,
        policy: TemplatePolicy,
    ) -> Self {
        Self {
            search,
            source,
            store,
            policy,
        }
    }

    /// Finds a template for `gene` and stores it at `<blast_dir>/<gene>.pdb`.
    /// Candidates are tried in the order the search service ranked them and
    /// the first one that downloads wins.
    pub async fn resolve(&self, gene: &str, sequence: &str) -> Result<PathBuf, StageError> {
        let template = self.store.path(Stage::Template, gene);
        if self.policy == TemplatePolicy::ReuseExisting && template.is_file() {
            info!("Template for {} already exists. Skipping search.", gene);
            return Ok(template);
        }

        info!("Searching templates for gene: {}", gene);
        let candidates = self
            .search
            .search(sequence)
            .await
            .map_err(|e| StageError::Search {
                gene: gene.to_string(),
                reason: format!("{:#}", e),
            })?;
        if candidates.is_empty() {
            return Err(StageError::Search {
                gene: gene.to_string(),
                reason: "no candidate structures returned".to_string(),
            });
        }

        for candidate in &candidates {
            match self.source.fetch(candidate).await {
                Ok(bytes) => {
                    write_atomic(&template, &bytes).await?;
                    info!("Stored template {} for gene {} at {:?}", candidate, gene, template);
                    return Ok(template);
                }
                Err(e) => warn!("Failed to download {} for gene {}: {:#}", candidate, gene, e),
            }
        }

        Err(StageError::Download {
            gene: gene.to_string(),
            tried: candidates.len(),
        })
    }
}

/// Writes through a temporary sibling so readers never see a partial file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StageError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| StageError::io(dir, e))?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| StageError::io(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StageError::io(path, e));
    }
    Ok(())
}
