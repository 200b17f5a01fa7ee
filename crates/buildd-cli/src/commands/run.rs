//! Run command implementation

use std::path::PathBuf;
use std::sync::Arc;

use buildd_build::{
    setup_signal_handlers, AbortHandle, BinaryPackageBuild, BuildError, BuildManager,
    BuildSession, BuildVariant, CollectingReporter, ProcessRunner, ProgressUIFactory,
    SourcePackageRecipeBuild, TranslationTemplatesBuild,
};
use buildd_config::Config;
use buildd_core::{BuildSummary, BuildType, Disposition, JobDescription};
use chrono::Utc;
use color_eyre::eyre::{Context, Result};
use tracing::{info, warn};

/// Run command implementation
pub struct RunCommand {
    config_path: Option<PathBuf>,
    job_path: PathBuf,
    result_path: Option<PathBuf>,
    interactive: bool,
}

impl RunCommand {
    pub fn new(
        config_path: Option<PathBuf>,
        job_path: PathBuf,
        result_path: Option<PathBuf>,
        interactive: bool,
    ) -> Self {
        Self { config_path, job_path, result_path, interactive }
    }

    pub async fn execute(&self) -> Result<()> {
        let config = Arc::new(super::load_config(self.config_path.as_deref())?);
        let job = JobDescription::from_file(&self.job_path)
            .with_context(|| format!("Failed to load job from {}", self.job_path.display()))?;

        info!(build_id = %job.build_id, build_type = %job.build_type, "Starting build");

        let abort = AbortHandle::new();
        setup_signal_handlers(abort.clone());

        let start_time = Utc::now();
        let build_id = job.build_id.clone();
        let (disposition, result_files) = match job.build_type {
            BuildType::BinaryPackage => {
                let variant = BinaryPackageBuild::new(config.clone());
                self.run_build(variant, config, abort, job).await?
            }
            BuildType::SourcePackageRecipe => {
                let variant = SourcePackageRecipeBuild::new(config.clone());
                self.run_build(variant, config, abort, job).await?
            }
            BuildType::TranslationTemplates => {
                let variant = TranslationTemplatesBuild::new(config.clone());
                self.run_build(variant, config, abort, job).await?
            }
        };

        let summary = BuildSummary::new(build_id, disposition, result_files, start_time);
        println!("\nBuild {}: {}", summary.build_id, summary.disposition);
        for file in &summary.result_files {
            println!("  {}", file.display());
        }

        if let Some(path) = &self.result_path {
            let json = serde_json::to_string_pretty(&summary)
                .with_context(|| "Failed to serialize build summary")?;
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write result to {}", path.display()))?;
            info!("Wrote build summary to {}", path.display());
        }

        Ok(())
    }

    async fn run_build<V: BuildVariant>(
        &self,
        variant: V,
        config: Arc<Config>,
        abort: AbortHandle,
        job: JobDescription,
    ) -> Result<(Disposition, Vec<PathBuf>)> {
        let reporter = CollectingReporter::new();
        let manager = BuildManager::new(variant, reporter.clone());
        let runner = Arc::new(ProcessRunner::new(config, abort.clone()));
        let mut session = BuildSession::new(manager, runner, abort)
            .with_progress(ProgressUIFactory::create(self.interactive));

        let disposition = match session.run(job).await {
            Ok(disposition) => disposition,
            Err(BuildError::Validation(e)) => {
                warn!("Job rejected: {}", e);
                Disposition::BuilderFailed
            }
            Err(e) => return Err(e).with_context(|| "Build driver failed"),
        };

        let result_files = reporter.last().map(|n| n.result_files).unwrap_or_default();
        Ok((disposition, result_files))
    }
}
