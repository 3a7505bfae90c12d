use crate::runners::{
    AlignRequest, AlignmentEngine, EngineContext, LocalJobStarter, ModelRequest, ModelingEngine,
};
use anyhow::Result;
use async_trait::async_trait;
use log::info;
use std::path::Path;

/// MODELLER driven through its Python helper scripts, one subprocess per call.
pub struct Modeller {
    pub python_path: String,
    pub align_script: String,
    pub model_script: String,
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

impl Modeller {
    pub fn new(python_path: &str, align_script: &str, model_script: &str) -> Self {
        Self {
            python_path: python_path.to_string(),
            align_script: align_script.to_string(),
            model_script: model_script.to_string(),
        }
    }

    fn atom_dir_args(ctx: &EngineContext, args: &mut Vec<String>) {
        for dir in &ctx.atom_files_directory {
            args.push("--atom-dir".to_string());
            args.push(path_arg(dir));
        }
    }

    fn align_args(&self, ctx: &EngineContext, request: &AlignRequest<'_>) -> Vec<String> {
        let mut args = vec![
            self.python_path.clone(),
            self.align_script.clone(),
            "--template".to_string(),
            path_arg(request.template_file),
            "--template-code".to_string(),
            request.template_code.to_string(),
            "--description".to_string(),
            path_arg(request.description_file),
            "--target-code".to_string(),
            request.target_code.to_string(),
            "--output".to_string(),
            path_arg(request.output),
        ];
        Self::atom_dir_args(ctx, &mut args);
        args
    }

    fn model_args(&self, ctx: &EngineContext, request: &ModelRequest<'_>) -> Vec<String> {
        let mut args = vec![
            self.python_path.clone(),
            self.model_script.clone(),
            "--alignment".to_string(),
            path_arg(request.alignment_file),
            "--knowns".to_string(),
            request.knowns.to_string(),
            "--sequence".to_string(),
            request.sequence.to_string(),
            "--starting-model".to_string(),
            request.starting_model.to_string(),
            "--ending-model".to_string(),
            request.ending_model.to_string(),
        ];
        Self::atom_dir_args(ctx, &mut args);
        args
    }
}

#[async_trait]
impl AlignmentEngine for Modeller {
    async fn align(&self, ctx: &EngineContext, request: &AlignRequest<'_>) -> Result<()> {
        info!(
            "Aligning {} against template {}",
            request.target_code, request.template_code
        );
        let args = self.align_args(ctx, request);
        LocalJobStarter::run_args(&args, &ctx.working_dir).await
    }
}

#[async_trait]
impl ModelingEngine for Modeller {
    async fn build_model(&self, ctx: &EngineContext, request: &ModelRequest<'_>) -> Result<()> {
        info!(
            "Modeling {} from {} ({} model(s))",
            request.sequence,
            request.knowns,
            request.ending_model + 1 - request.starting_model
        );
        let args = self.model_args(ctx, request);
        LocalJobStarter::run_args(&args, &ctx.working_dir).await
    }
}
