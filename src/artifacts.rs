use crate::records::{Record, RecordTable, Status};
use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Template,
    Description,
    Alignment,
    Structure,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Template,
        Stage::Description,
        Stage::Alignment,
        Stage::Structure,
    ];

    fn dir_name(self) -> &'static str {
        match self {
            Stage::Template => "blast",
            Stage::Description => "pir",
            Stage::Alignment => "ali",
            Stage::Structure => "pdbs",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Stage::Template | Stage::Structure => "pdb",
            Stage::Description => "txt",
            Stage::Alignment => "ali",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Template => "template",
            Stage::Description => "description",
            Stage::Alignment => "alignment",
            Stage::Structure => "structure",
        };
        f.write_str(name)
    }
}

/// Deterministic on-disk layout of every stage output under the assets root.
/// Presence of a file is the only record of a finished stage.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self, stage: Stage) -> PathBuf {
        self.root.join(stage.dir_name())
    }

    /// `key` is the gene for [`Stage::Template`] and the record id otherwise.
    pub fn path(&self, stage: Stage, key: &str) -> PathBuf {
        self.dir(stage).join(format!("{}.{}", key, stage.extension()))
    }

    pub fn exists(&self, stage: Stage, key: &str) -> bool {
        self.path(stage, key).is_file()
    }

    pub fn is_complete(&self, record: &Record) -> bool {
        self.exists(Stage::Structure, record.id())
    }

    /// Safe to call concurrently and repeatedly.
    pub fn ensure_dirs(&self) -> Result<()> {
        for stage in Stage::ALL {
            let dir = self.dir(stage);
            std::fs::create_dir_all(&dir)
                .context(format!("Failed to create {} directory {:?}", stage, dir))?;
        }
        Ok(())
    }

    pub fn mark_complete(&self, table: &mut RecordTable, row: usize) {
        table.set_status(row, &Status::Ok);
    }
}
