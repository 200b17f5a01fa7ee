//! Validate command implementation

use std::path::PathBuf;
use std::sync::Arc;

use buildd_build::{
    BinaryPackageBuild, BuildManager, BuildVariant, CollectingReporter,
    SourcePackageRecipeBuild, TranslationTemplatesBuild,
};
use buildd_config::Config;
use buildd_core::{BuildType, JobDescription};
use color_eyre::eyre::{eyre, Context, Result};
use tracing::info;

/// Validate command implementation
pub struct ValidateCommand {
    config_path: Option<PathBuf>,
    job_path: PathBuf,
}

impl ValidateCommand {
    pub fn new(config_path: Option<PathBuf>, job_path: PathBuf) -> Self {
        Self { config_path, job_path }
    }

    pub async fn execute(&self) -> Result<()> {
        info!("Validating job {}", self.job_path.display());

        let config = Arc::new(super::load_config(self.config_path.as_deref())?);
        println!("✓ Configuration loaded");

        let job = JobDescription::from_file(&self.job_path)
            .with_context(|| format!("Failed to load job from {}", self.job_path.display()))?;
        println!("✓ Job {} parsed ({} build)", job.build_id, job.build_type);

        let steps = plan_job(config, job)?;
        println!("✓ Parameters valid, planned steps:");
        for line in steps {
            println!("  {line}");
        }

        Ok(())
    }
}

/// Validate a job and describe the steps a successful build would run
pub(crate) fn plan_job(config: Arc<Config>, job: JobDescription) -> Result<Vec<String>> {
    match job.build_type {
        BuildType::BinaryPackage => plan(BinaryPackageBuild::new(config), job),
        BuildType::SourcePackageRecipe => plan(SourcePackageRecipeBuild::new(config), job),
        BuildType::TranslationTemplates => plan(TranslationTemplatesBuild::new(config), job),
    }
}

fn plan<V: BuildVariant>(variant: V, job: JobDescription) -> Result<Vec<String>> {
    let mut manager = BuildManager::new(variant, CollectingReporter::new());
    manager.initiate(job).map_err(|e| eyre!("Invalid job: {e}"))?;
    let context = manager.job().ok_or_else(|| eyre!("Job was not accepted"))?;

    let mut lines = Vec::new();
    for step in manager.pipeline().success_path() {
        let line = match manager.variant().invocation(step, context)? {
            Some(invocation) => {
                let privilege = if invocation.as_root { "[root] " } else { "" };
                format!("{:<12} {privilege}{}", step.as_str(), invocation.command_line())
            }
            None => format!("{:<12} (skipped)", step.as_str()),
        };
        lines.push(line);
    }
    Ok(lines)
}
