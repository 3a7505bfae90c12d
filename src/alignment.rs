use crate::artifacts::{ArtifactStore, Stage};
use crate::error::StageError;
use crate::runners::{AlignRequest, AlignmentEngine, EngineContext};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// PIR entry for the target sequence, terminated by `*`.
pub fn render_description(id: &str, sequence: &str) -> String {
    format!(
        ">P1;{id}\nsequence:{id}:::::::0.00: 0.00\n{sequence}*\n",
        id = id,
        sequence = sequence
    )
}

pub struct AlignmentBuilder {
    engine: Arc<dyn AlignmentEngine>,
    store: ArtifactStore,
    work_dir: PathBuf,
}

impl AlignmentBuilder {
    pub fn new(engine: Arc<dyn AlignmentEngine>, store: ArtifactStore, work_dir: &Path) -> Self {
        Self {
            engine,
            store,
            work_dir: work_dir.to_path_buf(),
        }
    }

    /// Always rewrites `<description_dir>/<id>.txt`.
    pub async fn build_description(
        &self,
        id: &str,
        sequence: &str,
        template: &Path,
    ) -> Result<PathBuf, StageError> {
        if !template.is_file() {
            return Err(StageError::MissingPrerequisite {
                id: id.to_string(),
                what: "template file",
                path: template.to_path_buf(),
            });
        }

        let path = self.store.path(Stage::Description, id);
        let dir = self.store.dir(Stage::Description);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StageError::io(&dir, e))?;
        tokio::fs::write(&path, render_description(id, sequence))
            .await
            .map_err(|e| StageError::io(&path, e))?;
        info!("Generated description file: {:?}", path);
        Ok(path)
    }

    /// Returns an existing `<alignment_dir>/<id>.ali` untouched; otherwise
    /// aligns the description against the `gene` template.
    pub async fn build_alignment(
        &self,
        id: &str,
        gene: &str,
        description: &Path,
    ) -> Result<PathBuf, StageError> {
        let output = self.store.path(Stage::Alignment, id);
        if output.is_file() {
            info!("Alignment file for {} already exists. Skipping.", id);
            return Ok(output);
        }

        if !description.is_file() {
            return Err(StageError::MissingPrerequisite {
                id: id.to_string(),
                what: "description file",
                path: description.to_path_buf(),
            });
        }

        let dir = self.store.dir(Stage::Alignment);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StageError::io(&dir, e))?;

        let template = self.store.path(Stage::Template, gene);
        let ctx = EngineContext::new(&self.work_dir).with_atom_dir(self.store.dir(Stage::Template));
        let request = AlignRequest {
            template_file: &template,
            template_code: gene,
            description_file: description,
            target_code: id,
            output: &output,
        };
        self.engine
            .align(&ctx, &request)
            .await
            .map_err(|e| StageError::engine("alignment", id, &e))?;

        if !output.is_file() {
            return Err(StageError::Engine {
                engine: "alignment",
                id: id.to_string(),
                reason: format!("no alignment written to {}", output.display()),
            });
        }
        info!("Generated alignment file: {:?}", output);
        Ok(output)
    }
}
