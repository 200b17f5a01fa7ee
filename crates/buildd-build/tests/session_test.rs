//! Integration tests for build sessions
//!
//! Covers the async loop with a scripted runner (abort handling, runner
//! errors) and a full run through `ProcessRunner` with shell helpers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use buildd_build::{
    AbortHandle, AbortSignal, BuildError, BuildManager, BuildSession, CollectingReporter,
    Result, StepInvocation, StepName, StepRole, StepRunner, TranslationTemplatesBuild,
};
use buildd_config::Config;
use buildd_core::{Disposition, JobDescription, StepOutcome};
use serde_json::json;

/// Runner answering each step from a table; unlisted steps succeed
#[derive(Default)]
struct ScriptedRunner {
    outcomes: HashMap<StepName, StepOutcome>,
    failing: Vec<StepName>,
    abort_during: Option<(StepName, AbortHandle)>,
    calls: Mutex<Vec<(StepName, StepRole)>>,
}

impl ScriptedRunner {
    fn calls(&self) -> Vec<StepName> {
        self.calls.lock().unwrap().iter().map(|(step, _)| *step).collect()
    }
}

#[async_trait]
impl StepRunner for ScriptedRunner {
    async fn run_step(&self, invocation: &StepInvocation) -> Result<StepOutcome> {
        self.calls.lock().unwrap().push((invocation.step, invocation.role));

        if let Some((step, abort)) = &self.abort_during {
            if *step == invocation.step {
                abort.request(AbortSignal::user_request());
            }
        }
        if self.failing.contains(&invocation.step) {
            return Err(BuildError::step_execution(invocation.step, "spawn failed: not found"));
        }
        Ok(self.outcomes.get(&invocation.step).cloned().unwrap_or_else(StepOutcome::success))
    }
}

fn job() -> JobDescription {
    JobDescription::from_json(
        &json!({
            "build_id": "tt-9",
            "sandbox_id": "base-noble-amd64",
            "build_type": "translation_templates",
            "extra_parameters": { "branch_url": "lp:project" },
        })
        .to_string(),
    )
    .unwrap()
}

fn session(
    config: Config,
    runner: Arc<ScriptedRunner>,
    abort: AbortHandle,
) -> BuildSession<TranslationTemplatesBuild, CollectingReporter> {
    let manager = BuildManager::new(
        TranslationTemplatesBuild::new(Arc::new(config)),
        CollectingReporter::new(),
    );
    BuildSession::new(manager, runner, abort)
}

#[tokio::test]
async fn test_session_runs_to_ok() {
    let runner = Arc::new(ScriptedRunner::default());
    let mut session = session(Config::default(), runner.clone(), AbortHandle::new());

    let disposition = session.run(job()).await.unwrap();

    assert_eq!(disposition, Disposition::Ok);
    assert_eq!(
        runner.calls(),
        vec![
            StepName::Init,
            StepName::Unpack,
            StepName::Mount,
            StepName::Update,
            StepName::Install,
            StepName::Generate,
            StepName::Cleanup,
        ]
    );
    let roles: Vec<StepRole> = runner.calls.lock().unwrap().iter().map(|(_, role)| *role).collect();
    assert_eq!(roles.last(), Some(&StepRole::Teardown));
    assert_eq!(roles[5], StepRole::Build);
}

#[tokio::test]
async fn test_abort_falls_through_to_teardown() {
    let abort = AbortHandle::new();
    let runner = Arc::new(ScriptedRunner {
        abort_during: Some((StepName::Update, abort.clone())),
        ..Default::default()
    });
    let mut session = session(Config::default(), runner.clone(), abort);

    let disposition = session.run(job()).await.unwrap();

    assert_eq!(disposition, Disposition::ChrootFailed);
    assert_eq!(
        runner.calls(),
        vec![StepName::Init, StepName::Unpack, StepName::Mount, StepName::Update, StepName::Cleanup]
    );
    let notifications = session.manager().reporter().notifications();
    assert_eq!(notifications.len(), 1);
}

#[tokio::test]
async fn test_abort_before_start_still_cleans_up() {
    let abort = AbortHandle::new();
    abort.request(AbortSignal::external(Some("shutdown".to_string())));
    let runner = Arc::new(ScriptedRunner::default());
    let mut session = session(Config::default(), runner.clone(), abort);

    let disposition = session.run(job()).await.unwrap();

    assert_eq!(disposition, Disposition::BuilderFailed);
    assert_eq!(runner.calls(), vec![StepName::Cleanup]);
    assert_eq!(session.manager().visited(), &[StepName::Init, StepName::Cleanup]);
}

#[tokio::test]
async fn test_runner_error_is_a_failed_step() {
    let runner =
        Arc::new(ScriptedRunner { failing: vec![StepName::Unpack], ..Default::default() });
    let mut session = session(Config::default(), runner.clone(), AbortHandle::new());

    let disposition = session.run(job()).await.unwrap();

    assert_eq!(disposition, Disposition::ChrootFailed);
    assert_eq!(runner.calls(), vec![StepName::Init, StepName::Unpack, StepName::Cleanup]);
}

#[tokio::test]
async fn test_generate_failure_reports_package_failed() {
    let mut outcomes = HashMap::new();
    outcomes.insert(StepName::Generate, StepOutcome::exit(2).with_log("bzr: ERROR: Not a branch"));
    let runner = Arc::new(ScriptedRunner { outcomes, ..Default::default() });
    let mut session = session(Config::default(), runner, AbortHandle::new());

    assert_eq!(session.run(job()).await.unwrap(), Disposition::PackageFailed);
    let manager = session.into_manager();
    assert_eq!(manager.visited().last(), Some(&StepName::Cleanup));
}

#[tokio::test]
async fn test_invalid_job_fails_session() {
    let runner = Arc::new(ScriptedRunner::default());
    let mut session = session(Config::default(), runner.clone(), AbortHandle::new());
    let mut description = job();
    description.build_id = String::new();

    assert!(matches!(session.run(description).await, Err(BuildError::Validation(_))));
    assert!(runner.calls().is_empty());
}

#[cfg(unix)]
mod process {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use buildd_build::ProcessRunner;
    use tempfile::TempDir;

    use super::*;

    fn helper(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn config(root: &TempDir) -> Config {
        let helpers_dir = root.path().join("slavebin");
        fs::create_dir_all(&helpers_dir).unwrap();
        for name in [
            "slave-prep",
            "unpack-chroot",
            "mount-chroot",
            "update-debian-chroot",
            "install-packages",
            "remove-build",
        ] {
            helper(&helpers_dir, name, "echo \"$0 $*\"");
        }

        Config {
            build_root: root.path().join("build"),
            helpers_dir,
            root_command: Vec::new(),
            ..Config::default()
        }
    }

    async fn run(config: Config) -> (Disposition, CollectingReporter) {
        let config = Arc::new(config);
        let abort = AbortHandle::new();
        let reporter = CollectingReporter::new();
        let manager =
            BuildManager::new(TranslationTemplatesBuild::new(config.clone()), reporter.clone());
        let runner = Arc::new(ProcessRunner::new(config, abort.clone()));
        let mut session = BuildSession::new(manager, runner, abort);
        (session.run(job()).await.unwrap(), reporter)
    }

    #[tokio::test]
    async fn test_translation_build_with_helpers() {
        let root = TempDir::new().unwrap();
        let config = config(&root);
        helper(&config.helpers_dir, "generate-translation-templates", "echo generated $2");
        let log = config.build_log("tt-9");

        let (disposition, reporter) = run(config).await;

        assert_eq!(disposition, Disposition::Ok);
        assert_eq!(reporter.notifications().len(), 1);
        let log = fs::read_to_string(log).unwrap();
        assert!(log.contains("generated lp:project"));
        assert!(log.contains("install-packages tt-9 bzr intltool"));
    }

    #[tokio::test]
    async fn test_missing_helper_fails_the_step() {
        let root = TempDir::new().unwrap();
        let config = config(&root);

        let (disposition, reporter) = run(config).await;

        assert_eq!(disposition, Disposition::PackageFailed);
        assert_eq!(reporter.notifications().len(), 1);
    }
}
