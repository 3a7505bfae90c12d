use anyhow::{anyhow, Context, Result};
use log::info;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const WILD_TYPE: &str = "wild";
pub const OK_STATUS: &str = "ok";

const GENE_COLUMN: &str = "gene";
const VARIANT_COLUMN: &str = "variant";
const FASTA_COLUMN: &str = "fasta";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub gene: String,
    pub variant: String,
    pub fasta: String,
}

impl Record {
    /// Key for every artifact of this record except the template.
    pub fn id(&self) -> &str {
        if self.variant == WILD_TYPE {
            &self.gene
        } else {
            &self.variant
        }
    }

    /// Every field must be present, and the gene and id must be usable as
    /// plain file names.
    pub fn validate(&self) -> Result<(), String> {
        for (column, value) in [
            (GENE_COLUMN, &self.gene),
            (VARIANT_COLUMN, &self.variant),
            (FASTA_COLUMN, &self.fasta),
        ] {
            if value.is_empty() {
                return Err(format!("empty {}", column));
            }
        }
        for key in [self.gene.as_str(), self.id()] {
            if key.starts_with('.') || key.contains(['/', '\\']) {
                return Err(format!("{:?} is not usable as a file name", key));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Absent,
    Ok,
    Failed(String),
}

impl Status {
    pub fn parse(cell: &str) -> Self {
        match cell.trim() {
            "" | "nan" | "NaN" => Status::Absent,
            OK_STATUS => Status::Ok,
            other => Status::Failed(other.to_string()),
        }
    }

    /// Failure messages are kept on a single line so the table stays greppable.
    pub fn failed(message: impl AsRef<str>) -> Self {
        let flat = message
            .as_ref()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if flat.is_empty() {
            Status::Failed("unknown failure".to_string())
        } else {
            Status::Failed(flat)
        }
    }

    pub fn as_cell(&self) -> &str {
        match self {
            Status::Absent => "",
            Status::Ok => OK_STATUS,
            Status::Failed(message) => message,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }
}

/// Two rows that resolve to the same artifact id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateId {
    pub id: String,
    pub first_row: usize,
    pub row: usize,
}

/// The persisted, semicolon-separated record table. Every column is kept as
/// text so that a rewrite only ever touches the status column.
#[derive(Debug)]
pub struct RecordTable {
    path: PathBuf,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    status_column: String,
    gene_idx: usize,
    variant_idx: usize,
    fasta_idx: usize,
}

impl RecordTable {
    pub fn load(path: impl AsRef<Path>, status_column: &str) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .from_path(path)
            .context(format!("Failed to open record table: {:?}", path))?;

        let headers: Vec<String> = reader
            .headers()
            .context(format!("Failed to read header of {:?}", path))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for (i, row) in reader.records().enumerate() {
            let row = row.context(format!("Failed to parse row {} of {:?}", i, path))?;
            rows.push(row.iter().map(str::to_string).collect());
        }

        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| anyhow!("Record table {:?} has no '{}' column", path, name))
        };

        Ok(Self {
            gene_idx: column(GENE_COLUMN)?,
            variant_idx: column(VARIANT_COLUMN)?,
            fasta_idx: column(FASTA_COLUMN)?,
            path: path.to_path_buf(),
            headers,
            rows,
            status_column: status_column.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn record(&self, row: usize) -> Option<Record> {
        let fields = self.rows.get(row)?;
        Some(Record {
            gene: fields[self.gene_idx].trim().to_string(),
            variant: fields[self.variant_idx].trim().to_string(),
            fasta: fields[self.fasta_idx].trim().to_string(),
        })
    }

    pub fn records(&self) -> impl Iterator<Item = (usize, Record)> + '_ {
        (0..self.rows.len()).filter_map(move |row| self.record(row).map(|r| (row, r)))
    }

    fn status_idx(&self) -> Option<usize> {
        self.headers.iter().position(|h| *h == self.status_column)
    }

    /// Adds an empty status column if the table has none. Returns whether the
    /// column was added.
    pub fn ensure_status_column(&mut self) -> bool {
        if self.status_idx().is_some() {
            return false;
        }
        self.headers.push(self.status_column.clone());
        for row in &mut self.rows {
            row.push(String::new());
        }
        info!("Added '{}' column to record table.", self.status_column);
        true
    }

    pub fn status(&self, row: usize) -> Status {
        match (self.status_idx(), self.rows.get(row)) {
            (Some(idx), Some(fields)) => Status::parse(&fields[idx]),
            _ => Status::Absent,
        }
    }

    pub fn set_status(&mut self, row: usize, status: &Status) {
        self.ensure_status_column();
        if let (Some(idx), Some(fields)) = (self.status_idx(), self.rows.get_mut(row)) {
            fields[idx] = status.as_cell().to_string();
        }
    }

    /// Rows whose status is anything but `ok`, in table order.
    pub fn eligible_rows(&self) -> Vec<usize> {
        (0..self.rows.len())
            .filter(|&row| !self.status(row).is_ok())
            .collect()
    }

    /// Rows that cannot be processed, with the reason.
    pub fn invalid_rows(&self) -> Vec<(usize, String)> {
        self.records()
            .filter_map(|(row, record)| record.validate().err().map(|reason| (row, reason)))
            .collect()
    }

    /// Invalid rows never claim an id.
    pub fn duplicate_ids(&self) -> Vec<DuplicateId> {
        let mut first_seen: HashMap<String, usize> = HashMap::new();
        let mut duplicates = Vec::new();
        for (row, record) in self.records() {
            if record.validate().is_err() {
                continue;
            }
            let id = record.id().to_string();
            match first_seen.get(&id) {
                Some(&first_row) => duplicates.push(DuplicateId { id, first_row, row }),
                None => {
                    first_seen.insert(id, row);
                }
            }
        }
        duplicates
    }

    /// Rewrites the table in place through a temporary sibling file.
    pub fn save(&self) -> Result<()> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| anyhow!("Record table path has no file name: {:?}", self.path))?;
        let tmp_path = self.path.with_file_name(format!(
            ".{}.{}.tmp",
            file_name.to_string_lossy(),
            uuid::Uuid::new_v4()
        ));

        {
            let mut writer = csv::WriterBuilder::new()
                .delimiter(b';')
                .from_path(&tmp_path)
                .context(format!("Failed to create {:?}", tmp_path))?;
            writer.write_record(&self.headers)?;
            for row in &self.rows {
                writer.write_record(row)?;
            }
            writer
                .flush()
                .context(format!("Failed to write {:?}", tmp_path))?;
        }

        std::fs::rename(&tmp_path, &self.path).context(format!(
            "Failed to move {:?} over {:?}",
            tmp_path, self.path
        ))?;
        Ok(())
    }
}
