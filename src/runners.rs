use anyhow::{Context, Result};
use log::{debug, error};
use std::path::{Path, PathBuf};
use tokio::process::Command;

use async_trait::async_trait;

/// Per-invocation engine environment. Built fresh for every call and never
/// shared between concurrent invocations.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub working_dir: PathBuf,
    pub atom_files_directory: Vec<PathBuf>,
}

impl EngineContext {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        let working_dir = working_dir.as_ref().to_path_buf();
        Self {
            atom_files_directory: vec![working_dir.clone()],
            working_dir,
        }
    }

    pub fn with_atom_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.atom_files_directory.push(dir.as_ref().to_path_buf());
        self
    }
}

#[derive(Debug, Clone)]
pub struct AlignRequest<'a> {
    pub template_file: &'a Path,
    pub template_code: &'a str,
    pub description_file: &'a Path,
    pub target_code: &'a str,
    pub output: &'a Path,
}

#[derive(Debug, Clone)]
pub struct ModelRequest<'a> {
    pub alignment_file: &'a Path,
    pub knowns: &'a str,
    pub sequence: &'a str,
    pub starting_model: u32,
    pub ending_model: u32,
}

/// Target/template alignment engine. Writes `request.output` on success.
#[async_trait]
pub trait AlignmentEngine: Send + Sync {
    async fn align(&self, ctx: &EngineContext, request: &AlignRequest<'_>) -> Result<()>;
}

/// Homology modeling engine. Writes its models into `ctx.working_dir` under
/// names starting with `{request.sequence}.`.
#[async_trait]
pub trait ModelingEngine: Send + Sync {
    async fn build_model(&self, ctx: &EngineContext, request: &ModelRequest<'_>) -> Result<()>;
}

pub struct LocalJobStarter;

impl LocalJobStarter {
    pub async fn run_args(args: &[String], working_dir: &Path) -> Result<()> {
        if args.is_empty() {
            return Err(anyhow::anyhow!("Command string is empty"));
        }
        let cmd_str = shell_words::join(args);
        debug!("Running command: {}", cmd_str);

        let output = Command::new(&args[0])
            .args(&args[1..])
            .current_dir(working_dir)
            .output()
            .await
            .context(format!("Failed to execute command: {}", args[0]))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Command failed: {}\nStderr: {}", cmd_str, stderr);
            return Err(anyhow::anyhow!(
                "Command failed with status: {}. Stderr: {}",
                output.status,
                stderr.trim()
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn run_command(cmd_str: &str, working_dir: &Path) -> Result<()> {
        let args = shell_words::split(cmd_str).context("Failed to parse command string")?;
        LocalJobStarter::run_args(&args, working_dir).await
    }

    #[tokio::test]
    async fn successful_command_runs_in_working_dir() {
        let td = tempdir().unwrap();
        run_command("sh -c 'echo done > marker.txt'", td.path())
            .await
            .unwrap();
        assert!(td.path().join("marker.txt").exists());
    }

    #[tokio::test]
    async fn failing_command_reports_stderr() {
        let td = tempdir().unwrap();
        let err = run_command("sh -c 'echo boom >&2; exit 3'", td.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let td = tempdir().unwrap();
        assert!(run_command("   ", td.path()).await.is_err());
    }

    #[test]
    fn context_searches_working_dir_first() {
        let ctx = EngineContext::new("/work").with_atom_dir("/assets/blast");
        assert_eq!(
            ctx.atom_files_directory,
            vec![PathBuf::from("/work"), PathBuf::from("/assets/blast")]
        );
    }
}
