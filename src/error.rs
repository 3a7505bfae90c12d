use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of one pipeline stage for one record. The rendered message is what
/// lands in the status column.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("similarity search failed for {gene}: {reason}")]
    Search { gene: String, reason: String },

    #[error("no template could be downloaded for {gene} ({tried} candidates tried)")]
    Download { gene: String, tried: usize },

    #[error("{what} not found for {id}: {}", .path.display())]
    MissingPrerequisite {
        id: String,
        what: &'static str,
        path: PathBuf,
    },

    #[error("{engine} engine failed for {id}: {reason}")]
    Engine {
        engine: &'static str,
        id: String,
        reason: String,
    },

    #[error("i/o error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid record in row {row}: {reason}")]
    InvalidRecord { row: usize, reason: String },

    #[error("duplicate id {id}: already used by row {first_row}")]
    DuplicateId { id: String, first_row: usize },

    #[error("worker for {id} did not finish: {reason}")]
    Worker { id: String, reason: String },
}

impl StageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StageError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn engine(engine: &'static str, id: &str, err: &anyhow::Error) -> Self {
        StageError::Engine {
            engine,
            id: id.to_string(),
            reason: format!("{:#}", err),
        }
    }
}

/// Post-build housekeeping problem. Never turns a successful build into a
/// failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWarning {
    pub path: PathBuf,
    pub reason: String,
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}
