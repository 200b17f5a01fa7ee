//! Source package recipe builds

use std::path::PathBuf;
use std::sync::Arc;

use buildd_config::Config;
use buildd_core::{BuildType, Disposition, JobContext, JobDescription, ValidationError};
use serde::Deserialize;

use super::{require_fields, BuildVariant, CommonSteps};
use crate::artifact::ArtifactCollector;
use crate::classify::{OutcomeClassifier, RecipeClassifier};
use crate::error::{BuildError, Result};
use crate::executor::StepInvocation;
use crate::pipeline::{Pipeline, StepName};

/// Parameters of a recipe build
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RecipeParams {
    /// Recipe text written into the sandbox before the build
    pub recipe_text: String,
    pub author_name: String,
    pub author_email: String,
    pub suite: String,
    pub distroseries_name: String,
    #[serde(default = "default_component")]
    pub component: String,
    pub archive_purpose: String,
    #[serde(default)]
    pub archives: Vec<String>,
}

fn default_component() -> String {
    "main".to_string()
}

/// Builds a source package from a recipe
#[derive(Debug, Clone)]
pub struct SourcePackageRecipeBuild {
    steps: CommonSteps,
    classifier: Arc<dyn OutcomeClassifier>,
    collector: ArtifactCollector,
}

impl SourcePackageRecipeBuild {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            steps: CommonSteps::new(config),
            classifier: Arc::new(RecipeClassifier::new()),
            collector: ArtifactCollector::new(),
        }
    }
}

impl BuildVariant for SourcePackageRecipeBuild {
    type Request = RecipeParams;
    type Params = RecipeParams;

    fn build_type(&self) -> BuildType {
        BuildType::SourcePackageRecipe
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::builder(BuildType::SourcePackageRecipe)
            .setup(StepName::Init, Disposition::BuilderFailed, StepName::Cleanup)
            .setup(StepName::Unpack, Disposition::ChrootFailed, StepName::Cleanup)
            .setup(StepName::Mount, Disposition::ChrootFailed, StepName::Umount)
            .setup(StepName::Sources, Disposition::ChrootFailed, StepName::Reap)
            .setup(StepName::Update, Disposition::ChrootFailed, StepName::Reap)
            .build_classified(StepName::BuildRecipe, Arc::clone(&self.classifier), StepName::Reap)
            .teardown_ignoring_failure(StepName::Reap)
            .teardown(StepName::Umount)
            .teardown(StepName::Cleanup)
            .build()
    }

    fn check_parameters(
        &self,
        _job: &JobDescription,
        request: RecipeParams,
    ) -> std::result::Result<RecipeParams, ValidationError> {
        require_fields(&[
            ("recipe_text", request.recipe_text.as_str()),
            ("author_name", request.author_name.as_str()),
            ("author_email", request.author_email.as_str()),
            ("suite", request.suite.as_str()),
            ("distroseries_name", request.distroseries_name.as_str()),
            ("component", request.component.as_str()),
            ("archive_purpose", request.archive_purpose.as_str()),
        ])?;
        Ok(request)
    }

    /// The recipe text is written right before BUILD_RECIPE starts, once
    /// UPDATE has finished, and by the worker user rather than root. The
    /// unpacked chroot must leave the build user's home writable by the
    /// worker, which holds when the worker runs as that same user.
    fn invocation(
        &self,
        step: StepName,
        job: &JobContext<RecipeParams>,
    ) -> Result<Option<StepInvocation>> {
        let params = job.parameters();
        match step {
            StepName::BuildRecipe => {
                let recipe_path = self.steps.layout(job).work_dir().join("recipe");
                let args = vec![
                    job.build_id().to_string(),
                    params.author_name.clone(),
                    params.author_email.clone(),
                    params.suite.clone(),
                    params.distroseries_name.clone(),
                    params.component.clone(),
                    params.archive_purpose.clone(),
                ];
                let helper = &self.steps.config().helpers.build_recipe;
                let invocation = self
                    .steps
                    .helper_step(job, step, helper, args)
                    .stage_file(recipe_path, params.recipe_text.clone());
                Ok(Some(invocation))
            }
            other => self.steps.invocation(self.build_type(), other, job, &params.archives),
        }
    }

    fn gather_results(&self, job: &JobContext<RecipeParams>) -> Result<Vec<PathBuf>> {
        let work_dir = self.steps.layout(job).work_dir();
        let mut files = self.collector.collect_changes(&work_dir, "_source.changes")?;

        let manifest = work_dir.join("manifest");
        let manifest = self.collector.optional_file(&manifest).ok_or_else(|| {
            BuildError::artifact_collection(format!("{} is missing", manifest.display()))
        })?;
        files.push(manifest);

        self.collector.log_summary(&files);
        Ok(files)
    }
}
