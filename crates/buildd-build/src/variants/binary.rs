//! Binary package builds driven by sbuild

use std::path::PathBuf;
use std::sync::Arc;

use buildd_config::Config;
use buildd_core::{BuildType, Disposition, JobContext, JobDescription, ValidationError};
use serde::Deserialize;

use super::{require_fields, BuildVariant, CommonSteps};
use crate::artifact::ArtifactCollector;
use crate::classify::{BinaryPackageClassifier, OutcomeClassifier};
use crate::error::Result;
use crate::executor::StepInvocation;
use crate::pipeline::{Pipeline, StepName};

/// Parameters of a binary build as sent by the dispatcher
#[derive(Debug, Clone, Deserialize)]
pub struct BinaryPackageRequest {
    /// Source package description; derived from the input files when absent
    #[serde(default)]
    pub dsc_file: Option<String>,
    pub suite: String,
    pub archive_purpose: String,
    #[serde(default = "default_component")]
    pub component: String,
    #[serde(default = "default_archive")]
    pub archive: String,
    #[serde(default, alias = "arch_indep")]
    pub architecture_independent: bool,
    #[serde(default)]
    pub build_debug_symbols: bool,
    /// Extra archive lines for the sandbox's sources list
    #[serde(default)]
    pub archives: Vec<String>,
}

/// Validated binary build parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPackageParams {
    pub dsc_file: String,
    pub suite: String,
    pub archive_purpose: String,
    pub component: String,
    pub archive: String,
    pub architecture_independent: bool,
    pub build_debug_symbols: bool,
    pub archives: Vec<String>,
}

fn default_component() -> String {
    "main".to_string()
}

fn default_archive() -> String {
    "ubuntu".to_string()
}

/// Builds binary packages from a source package with sbuild
#[derive(Debug, Clone)]
pub struct BinaryPackageBuild {
    steps: CommonSteps,
    classifier: Arc<dyn OutcomeClassifier>,
    collector: ArtifactCollector,
}

impl BinaryPackageBuild {
    pub fn new(config: Arc<Config>) -> Self {
        Self::with_classifier(config, Arc::new(BinaryPackageClassifier::new()))
    }

    /// Use a custom classifier for the sbuild step
    pub fn with_classifier(config: Arc<Config>, classifier: Arc<dyn OutcomeClassifier>) -> Self {
        Self { steps: CommonSteps::new(config), classifier, collector: ArtifactCollector::new() }
    }

    fn sbuild_args(&self, build_id: &str, params: &BinaryPackageParams) -> Vec<String> {
        let mut args = vec![
            build_id.to_string(),
            self.steps.config().architecture.clone(),
            params.suite.clone(),
            "-c".to_string(),
            "chroot:autobuild".to_string(),
            format!("--archive={}", params.archive),
            format!("--dist={}", params.suite),
        ];
        if params.architecture_independent {
            args.push("-A".to_string());
        }
        args.push(format!("--purpose={}", params.archive_purpose));
        if params.build_debug_symbols {
            args.push("--build-debug-symbols".to_string());
        }
        args.push(format!("--comp={}", params.component));
        args.push(params.dsc_file.clone());
        args
    }
}

impl BuildVariant for BinaryPackageBuild {
    type Request = BinaryPackageRequest;
    type Params = BinaryPackageParams;

    fn build_type(&self) -> BuildType {
        BuildType::BinaryPackage
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::builder(BuildType::BinaryPackage)
            .setup(StepName::Init, Disposition::BuilderFailed, StepName::Cleanup)
            .setup(StepName::Unpack, Disposition::ChrootFailed, StepName::Cleanup)
            .setup(StepName::Mount, Disposition::ChrootFailed, StepName::Umount)
            .setup(StepName::Sources, Disposition::ChrootFailed, StepName::Reap)
            .setup(StepName::Update, Disposition::ChrootFailed, StepName::Reap)
            .build_classified(StepName::Sbuild, Arc::clone(&self.classifier), StepName::Reap)
            .teardown_ignoring_failure(StepName::Reap)
            .teardown(StepName::Umount)
            .teardown(StepName::Cleanup)
            .build()
    }

    fn check_parameters(
        &self,
        job: &JobDescription,
        request: BinaryPackageRequest,
    ) -> std::result::Result<BinaryPackageParams, ValidationError> {
        let build_type = self.build_type().to_string();
        require_fields(&[
            ("suite", request.suite.as_str()),
            ("archive_purpose", request.archive_purpose.as_str()),
            ("component", request.component.as_str()),
            ("archive", request.archive.as_str()),
        ])?;

        let dsc_file = match request.dsc_file {
            Some(file) => {
                if !job.has_input_file(&file) {
                    return Err(ValidationError::MissingInputFile { file });
                }
                file
            }
            None => {
                let mut candidates = job.input_files.iter().filter(|f| f.ends_with(".dsc"));
                match (candidates.next(), candidates.next()) {
                    (Some(file), None) => file.clone(),
                    (None, _) => return Err(ValidationError::missing_field(build_type, "dsc_file")),
                    (Some(_), Some(_)) => {
                        return Err(ValidationError::invalid_parameters(
                            build_type,
                            "several .dsc input files; dsc_file must name one",
                        ))
                    }
                }
            }
        };

        Ok(BinaryPackageParams {
            dsc_file,
            suite: request.suite,
            archive_purpose: request.archive_purpose,
            component: request.component,
            archive: request.archive,
            architecture_independent: request.architecture_independent,
            build_debug_symbols: request.build_debug_symbols,
            archives: request.archives,
        })
    }

    fn invocation(
        &self,
        step: StepName,
        job: &JobContext<BinaryPackageParams>,
    ) -> Result<Option<StepInvocation>> {
        match step {
            StepName::Sbuild => {
                let helper = &self.steps.config().helpers.sbuild;
                let args = self.sbuild_args(job.build_id(), job.parameters());
                Ok(Some(self.steps.helper_step(job, step, helper, args)))
            }
            other => {
                self.steps.invocation(self.build_type(), other, job, &job.parameters().archives)
            }
        }
    }

    fn gather_results(&self, job: &JobContext<BinaryPackageParams>) -> Result<Vec<PathBuf>> {
        let build_dir = self.steps.layout(job).build_dir();
        let mut files = self.collector.collect_changes(&build_dir, ".changes")?;
        let log = self.steps.config().build_log(job.build_id());
        files.extend(self.collector.optional_file(&log));
        self.collector.log_summary(&files);
        Ok(files)
    }
}
