//! Translation template generation from a source branch

use std::path::PathBuf;
use std::sync::Arc;

use buildd_config::Config;
use buildd_core::{BuildType, Disposition, JobContext, JobDescription, ValidationError};
use serde::Deserialize;

use super::{require_fields, BuildVariant, CommonSteps};
use crate::error::Result;
use crate::executor::StepInvocation;
use crate::pipeline::{Pipeline, StepName};

/// Parameters of a translation templates build
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TranslationTemplatesParams {
    /// Branch to generate templates from
    pub branch_url: String,
}

/// Generates translation templates inside a sandbox
#[derive(Debug, Clone)]
pub struct TranslationTemplatesBuild {
    steps: CommonSteps,
}

impl TranslationTemplatesBuild {
    pub fn new(config: Arc<Config>) -> Self {
        Self { steps: CommonSteps::new(config) }
    }
}

impl BuildVariant for TranslationTemplatesBuild {
    type Request = TranslationTemplatesParams;
    type Params = TranslationTemplatesParams;

    fn build_type(&self) -> BuildType {
        BuildType::TranslationTemplates
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::builder(BuildType::TranslationTemplates)
            .setup(StepName::Init, Disposition::BuilderFailed, StepName::Cleanup)
            .setup(StepName::Unpack, Disposition::ChrootFailed, StepName::Cleanup)
            .setup(StepName::Mount, Disposition::ChrootFailed, StepName::Cleanup)
            .setup(StepName::Update, Disposition::ChrootFailed, StepName::Cleanup)
            .setup(StepName::Install, Disposition::ChrootFailed, StepName::Cleanup)
            .build_fixed(StepName::Generate, Disposition::PackageFailed, StepName::Cleanup)
            .teardown(StepName::Cleanup)
            .build()
    }

    fn check_parameters(
        &self,
        _job: &JobDescription,
        request: TranslationTemplatesParams,
    ) -> std::result::Result<TranslationTemplatesParams, ValidationError> {
        require_fields(&[("branch_url", request.branch_url.as_str())])?;
        Ok(request)
    }

    fn invocation(
        &self,
        step: StepName,
        job: &JobContext<TranslationTemplatesParams>,
    ) -> Result<Option<StepInvocation>> {
        let config = self.steps.config();
        let templates = &config.translation_templates;
        match step {
            StepName::Install => {
                let args = std::iter::once(job.build_id().to_string())
                    .chain(templates.packages.iter().cloned())
                    .collect();
                let invocation =
                    self.steps.helper_step(job, step, &config.helpers.install, args).as_root();
                Ok(Some(invocation))
            }
            StepName::Generate => {
                let args = vec![
                    job.build_id().to_string(),
                    job.parameters().branch_url.clone(),
                    templates.result_name.clone(),
                ];
                let helper = &config.helpers.generate_templates;
                Ok(Some(self.steps.helper_step(job, step, helper, args)))
            }
            other => self.steps.invocation(self.build_type(), other, job, &[]),
        }
    }

    fn gather_results(&self, _job: &JobContext<TranslationTemplatesParams>) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}
