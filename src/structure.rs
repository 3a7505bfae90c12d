use crate::artifacts::{ArtifactStore, Stage};
use crate::error::{CleanupWarning, StageError};
use crate::runners::{EngineContext, ModelRequest, ModelingEngine};
use log::{info, warn};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

#[derive(Debug)]
pub struct StructureBuild {
    pub path: PathBuf,
    pub warnings: Vec<CleanupWarning>,
}

pub struct StructureBuilder {
    engine: Arc<dyn ModelingEngine>,
    store: ArtifactStore,
    work_dir: PathBuf,
}

/// What AutoModel appends to the sequence name: `ini`, `rsr`, `sch` and
/// `<letters><8 digits>` with an optional `.pdb` (`B99990001.pdb`,
/// `D00000001`, `V99990001`, `BL00010001.pdb`).
const ENGINE_SUFFIX: &str = r"^(?:[A-Z]{1,2}\d{8}(?:\.pdb)?|ini|rsr|sch)$";

fn engine_suffix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(ENGINE_SUFFIX).expect("valid suffix regex"))
}

/// Entries the engine left in `work_dir` for `id`. Only `{id}.<engine suffix>`
/// matches, so neither `M12` nor `p.R175H` is mistaken for output of `M1` or `p`.
fn engine_outputs(work_dir: &Path, id: &str) -> Result<Vec<PathBuf>, String> {
    let pattern = format!(
        "{}/{}.*",
        glob::Pattern::escape(&work_dir.to_string_lossy()),
        glob::Pattern::escape(id)
    );
    let paths = glob::glob(&pattern).map_err(|e| format!("bad pattern {}: {}", pattern, e))?;
    let prefix = format!("{}.", id);
    let mut outputs: Vec<PathBuf> = paths
        .filter_map(Result::ok)
        .filter(|p| {
            p.file_name()
                .and_then(|name| name.to_str()?.strip_prefix(prefix.as_str()))
                .map_or(false, |suffix| engine_suffix_regex().is_match(suffix))
        })
        .collect();
    outputs.sort();
    Ok(outputs)
}

fn is_pdb(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "pdb")
}

impl StructureBuilder {
    pub fn new(engine: Arc<dyn ModelingEngine>, store: ArtifactStore, work_dir: &Path) -> Self {
        Self {
            engine,
            store,
            work_dir: work_dir.to_path_buf(),
        }
    }

    pub async fn build(
        &self,
        id: &str,
        gene: &str,
        alignment: &Path,
    ) -> Result<StructureBuild, StageError> {
        if !alignment.is_file() {
            return Err(StageError::MissingPrerequisite {
                id: id.to_string(),
                what: "alignment file",
                path: alignment.to_path_buf(),
            });
        }

        info!("Generating structure for {}", id);
        let ctx = EngineContext::new(&self.work_dir).with_atom_dir(self.store.dir(Stage::Template));
        let request = ModelRequest {
            alignment_file: alignment,
            knowns: gene,
            sequence: id,
            starting_model: 1,
            ending_model: 1,
        };
        self.engine
            .build_model(&ctx, &request)
            .await
            .map_err(|e| StageError::engine("modeling", id, &e))?;

        let outputs = engine_outputs(&self.work_dir, id).map_err(|reason| StageError::Engine {
            engine: "modeling",
            id: id.to_string(),
            reason,
        })?;
        let path = self.relocate_model(id, &outputs).await?;
        let warnings = self.purge_scratch(&outputs).await;
        for warning in &warnings {
            warn!("Cleanup for {}: {}", id, warning);
        }
        Ok(StructureBuild { path, warnings })
    }

    async fn relocate_model(&self, id: &str, outputs: &[PathBuf]) -> Result<PathBuf, StageError> {
        let model = outputs
            .iter()
            .find(|p| is_pdb(p) && p.is_file())
            .ok_or_else(|| StageError::Engine {
                engine: "modeling",
                id: id.to_string(),
                reason: format!("no model file {}.*.pdb in {}", id, self.work_dir.display()),
            })?;

        let dir = self.store.dir(Stage::Structure);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StageError::io(&dir, e))?;
        let destination = self.store.path(Stage::Structure, id);

        if tokio::fs::rename(model, &destination).await.is_err() {
            // rename fails across filesystems
            tokio::fs::copy(model, &destination)
                .await
                .map_err(|e| StageError::io(&destination, e))?;
            if let Err(e) = tokio::fs::remove_file(model).await {
                warn!("Could not remove {:?} after copy: {}", model, e);
            }
        }
        info!("Moved file: {:?} to {:?}", model, destination);
        Ok(destination)
    }

    async fn purge_scratch(&self, outputs: &[PathBuf]) -> Vec<CleanupWarning> {
        let mut warnings = Vec::new();
        for file in outputs.iter().filter(|p| !is_pdb(p)) {
            match tokio::fs::remove_file(file).await {
                Ok(()) => info!("Deleted file: {:?}", file),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warnings.push(CleanupWarning {
                    path: file.clone(),
                    reason: e.to_string(),
                }),
            }
        }
        warnings
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mimics AutoModel's working directory output for `request.sequence`.
    #[derive(Default)]
    pub struct FakeModeler {
        pub error: Option<String>,
        pub skip_model_file: bool,
        /// Leaves `{id}.sch` behind as a directory, which cannot be unlinked.
        pub scratch_dir: bool,
        pub panic_for: Option<String>,
        pub calls: AtomicUsize,
    }

    impl FakeModeler {
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelingEngine for FakeModeler {
        async fn build_model(&self, ctx: &EngineContext, request: &ModelRequest<'_>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = &self.error {
                anyhow::bail!("{}", error);
            }
            let dir = &ctx.working_dir;
            let id = request.sequence;
            if self.panic_for.as_deref() == Some(id) {
                panic!("modeling crashed for {}", id);
            }
            for ext in ["ini", "rsr", "sch", "D00000001", "V99990001"] {
                let path = dir.join(format!("{}.{}", id, ext));
                if ext == "sch" && self.scratch_dir {
                    std::fs::create_dir_all(&path)?;
                } else {
                    std::fs::write(path, "scratch")?;
                }
            }
            if !self.skip_model_file {
                std::fs::write(
                    dir.join(format!("{}.B99990001.pdb", id)),
                    format!("MODEL {} from {}", id, request.knowns),
                )?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::FakeModeler;
    use super::*;
    use tempfile::tempdir;

    struct Fixture {
        _td: tempfile::TempDir,
        work_dir: PathBuf,
        store: ArtifactStore,
    }

    fn fixture() -> Fixture {
        let td = tempdir().unwrap();
        let work_dir = td.path().join("work");
        std::fs::create_dir_all(&work_dir).unwrap();
        let store = ArtifactStore::new(td.path().join("assets"));
        store.ensure_dirs().unwrap();
        Fixture {
            _td: td,
            work_dir,
            store,
        }
    }

    #[tokio::test]
    async fn missing_alignment_fails_before_the_engine_runs() {
        let fx = fixture();
        let engine = Arc::new(FakeModeler::default());
        let builder = StructureBuilder::new(engine.clone(), fx.store.clone(), &fx.work_dir);

        let err = builder
            .build("TP53", "TP53", &fx.store.path(Stage::Alignment, "TP53"))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("alignment file not found for TP53"));
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn model_is_relocated_and_scratch_purged() {
        let fx = fixture();
        let alignment = fx.store.path(Stage::Alignment, "M1");
        std::fs::write(&alignment, "ali").unwrap();
        // another record's scratch sharing the prefix
        std::fs::write(fx.work_dir.join("M12.rsr"), "other").unwrap();
        let engine = Arc::new(FakeModeler::default());
        let builder = StructureBuilder::new(engine.clone(), fx.store.clone(), &fx.work_dir);

        let build = builder.build("M1", "TP53", &alignment).await.unwrap();
        assert_eq!(build.path, fx.store.path(Stage::Structure, "M1"));
        assert_eq!(
            std::fs::read_to_string(&build.path).unwrap(),
            "MODEL M1 from TP53"
        );
        assert!(build.warnings.is_empty());

        let left: Vec<String> = std::fs::read_dir(&fx.work_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(left, vec!["M12.rsr".to_string()]);
    }

    #[tokio::test]
    async fn engine_error_is_reported_with_its_message() {
        let fx = fixture();
        let alignment = fx.store.path(Stage::Alignment, "TP53");
        std::fs::write(&alignment, "ali").unwrap();
        let engine = Arc::new(FakeModeler {
            error: Some("Sequence difference between alignment and pdb".into()),
            ..Default::default()
        });
        let builder = StructureBuilder::new(engine, fx.store.clone(), &fx.work_dir);

        let err = builder.build("TP53", "TP53", &alignment).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "modeling engine failed for TP53: Sequence difference between alignment and pdb"
        );
        assert!(!fx.store.exists(Stage::Structure, "TP53"));
    }

    #[tokio::test]
    async fn missing_model_output_is_a_failure() {
        let fx = fixture();
        let alignment = fx.store.path(Stage::Alignment, "TP53");
        std::fs::write(&alignment, "ali").unwrap();
        let engine = Arc::new(FakeModeler {
            skip_model_file: true,
            ..Default::default()
        });
        let builder = StructureBuilder::new(engine, fx.store.clone(), &fx.work_dir);

        let err = builder.build("TP53", "TP53", &alignment).await.unwrap_err();
        assert!(err.to_string().contains("no model file TP53.*.pdb"));
    }

    #[tokio::test]
    async fn undeletable_scratch_is_a_warning_not_a_failure() {
        let fx = fixture();
        let alignment = fx.store.path(Stage::Alignment, "M1");
        std::fs::write(&alignment, "ali").unwrap();
        let engine = Arc::new(FakeModeler {
            scratch_dir: true,
            ..Default::default()
        });
        let builder = StructureBuilder::new(engine, fx.store.clone(), &fx.work_dir);

        let build = builder.build("M1", "TP53", &alignment).await.unwrap();
        assert!(fx.store.exists(Stage::Structure, "M1"));
        assert_eq!(build.warnings.len(), 1);
        assert_eq!(build.warnings[0].path, fx.work_dir.join("M1.sch"));
        assert!(!build.warnings[0].reason.is_empty());
        assert!(!fx.work_dir.join("M1.rsr").exists());
    }

    #[tokio::test]
    async fn purge_reports_entries_it_cannot_remove() {
        let fx = fixture();
        let engine = Arc::new(FakeModeler::default());
        let builder = StructureBuilder::new(engine, fx.store.clone(), &fx.work_dir);
        let stuck = fx.work_dir.join("M1.rsr");
        std::fs::create_dir_all(&stuck).unwrap();
        let gone = fx.work_dir.join("M1.ini");

        let warnings = builder.purge_scratch(&[stuck.clone(), gone]).await;
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].path, stuck);
    }

    #[tokio::test]
    async fn dotted_ids_do_not_claim_each_others_outputs() {
        let fx = fixture();
        let alignment = fx.store.path(Stage::Alignment, "p");
        std::fs::write(&alignment, "ali").unwrap();
        std::fs::write(fx.work_dir.join("p.R175H.B99990001.pdb"), "other model").unwrap();
        std::fs::write(fx.work_dir.join("p.R175H.rsr"), "other").unwrap();
        let builder = StructureBuilder::new(
            Arc::new(FakeModeler::default()),
            fx.store.clone(),
            &fx.work_dir,
        );

        let build = builder.build("p", "TP53", &alignment).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&build.path).unwrap(),
            "MODEL p from TP53"
        );
        let mut left: Vec<String> = std::fs::read_dir(&fx.work_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        left.sort();
        assert_eq!(left, vec!["p.R175H.B99990001.pdb", "p.R175H.rsr"]);
    }

    #[test]
    fn engine_outputs_skip_foreign_files_and_escape_glob_characters() {
        let td = tempdir().unwrap();
        for name in [
            "p.[A]1.B99990001.pdb",
            "p.[A]1.D00000001",
            "p.A1.B99990001.pdb",
            "p.[A]1.notes.txt",
        ] {
            std::fs::write(td.path().join(name), "x").unwrap();
        }

        let files = engine_outputs(td.path(), "p.[A]1").unwrap();
        assert_eq!(
            files,
            vec![
                td.path().join("p.[A]1.B99990001.pdb"),
                td.path().join("p.[A]1.D00000001"),
            ]
        );
    }
}
