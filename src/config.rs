use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// What to do when `<blast_dir>/<gene>.pdb` is already on disk.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TemplatePolicy {
    /// Always query the search service again and overwrite the template.
    #[default]
    AlwaysResolve,
    /// Keep an existing template and skip the remote calls for it.
    ReuseExisting,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BlastConfig {
    pub url: String,
    pub program: String,
    pub database: String,
    pub poll_interval_secs: u64,
    pub max_wait_secs: u64,
}

impl Default for BlastConfig {
    fn default() -> Self {
        Self {
            url: "https://blast.ncbi.nlm.nih.gov/Blast.cgi".to_string(),
            program: "blastp".to_string(),
            database: "pdb".to_string(),
            poll_interval_secs: 60,
            max_wait_secs: 3600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub assets_root: PathBuf,
    pub table_path: PathBuf,
    pub status_column: String,
    pub work_dir: PathBuf,
    pub concurrency: usize,
    pub template_policy: TemplatePolicy,
    pub blast: BlastConfig,
    pub rcsb_url: String,
    pub http_timeout_secs: u64,
    pub python_path: String,
    pub align_script: String,
    pub model_script: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            assets_root: PathBuf::from("assets"),
            table_path: PathBuf::from("fastas.csv"),
            status_column: "modeller".to_string(),
            work_dir: PathBuf::from("."),
            concurrency: 4,
            template_policy: TemplatePolicy::default(),
            blast: BlastConfig::default(),
            rcsb_url: "https://files.rcsb.org/download".to_string(),
            http_timeout_secs: 120,
            python_path: "python".to_string(),
            align_script: "scripts/modeller_align.py".to_string(),
            model_script: "scripts/modeller_model.py".to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {:?}", path))?;
        let config: Config =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;
        Ok(config)
    }

    pub fn load(file_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = file_path {
            info!("Loading config from file: {:?}", path);
            Self::from_file(path)?
        } else {
            Config::default()
        };

        // Override with environment variables if set
        if let Ok(val) = env::var("HOMOLOGY_ASSETS_ROOT") {
            config.assets_root = PathBuf::from(val);
        }
        if let Ok(val) = env::var("HOMOLOGY_TABLE") {
            config.table_path = PathBuf::from(val);
        }
        if let Ok(val) = env::var("HOMOLOGY_STATUS_COLUMN") {
            config.status_column = val;
        }
        if let Ok(val) = env::var("HOMOLOGY_WORK_DIR") {
            config.work_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("HOMOLOGY_CONCURRENCY") {
            config.concurrency = val
                .parse()
                .context(format!("HOMOLOGY_CONCURRENCY is not a number: {:?}", val))?;
        }
        if let Ok(val) = env::var("HOMOLOGY_PYTHON") {
            config.python_path = val;
        }
        if let Ok(val) = env::var("MODELLER_ALIGN_SCRIPT") {
            config.align_script = val;
        }
        if let Ok(val) = env::var("MODELLER_MODEL_SCRIPT") {
            config.model_script = val;
        }
        if let Ok(val) = env::var("BLAST_URL") {
            config.blast.url = val;
        }
        if let Ok(val) = env::var("RCSB_URL") {
            config.rcsb_url = val;
        }

        config.concurrency = config.concurrency.max(1);
        Ok(config)
    }
}
