//! Integration tests for the build manager state machine
//!
//! Every build type is driven with scripted step outcomes, checking the
//! visited steps and the single disposition reported to the dispatcher.

use std::fs;
use std::sync::Arc;

use buildd_build::{
    BinaryPackageBuild, BuildError, BuildManager, BuildVariant, CollectingReporter, Notification,
    SourcePackageRecipeBuild, StepName, Transition, TranslationTemplatesBuild,
};
use buildd_config::Config;
use buildd_core::{Disposition, JobDescription, StepOutcome};
use serde_json::json;
use tempfile::TempDir;

use StepName::*;

/// Drive a build to completion, answering each step with `outcome`
fn drive<V, F>(manager: &mut BuildManager<V, CollectingReporter>, job: JobDescription, outcome: F) -> Disposition
where
    V: BuildVariant,
    F: Fn(StepName) -> StepOutcome,
{
    let mut transition = manager.initiate(job).unwrap();
    loop {
        match transition {
            Transition::Finished(disposition) => return disposition,
            Transition::Run(invocation) => {
                transition = manager.advance(outcome(invocation.step)).unwrap();
            }
        }
    }
}

fn all_succeed(_: StepName) -> StepOutcome {
    StepOutcome::success()
}

fn fail_at(failing: &'static [StepName]) -> impl Fn(StepName) -> StepOutcome {
    move |step| if failing.contains(&step) { StepOutcome::exit(1) } else { StepOutcome::success() }
}

fn only(disposition: Disposition) -> Vec<Notification> {
    vec![Notification { disposition, result_files: Vec::new() }]
}

fn translation_job() -> JobDescription {
    JobDescription::from_json(
        &json!({
            "build_id": "tt-1",
            "sandbox_id": "base-noble-amd64",
            "build_type": "translation_templates",
            "extra_parameters": { "branch_url": "lp:~team/project/trunk" },
        })
        .to_string(),
    )
    .unwrap()
}

fn translation_manager() -> BuildManager<TranslationTemplatesBuild, CollectingReporter> {
    let variant = TranslationTemplatesBuild::new(Arc::new(Config::default()));
    BuildManager::new(variant, CollectingReporter::new())
}

fn binary_job() -> JobDescription {
    JobDescription::from_json(
        &json!({
            "build_id": "42",
            "sandbox_id": "base-jammy-amd64",
            "build_type": "binary_package",
            "input_files": ["hello_2.10-2.dsc", "hello_2.10.orig.tar.gz"],
            "extra_parameters": { "suite": "jammy", "archive_purpose": "PRIMARY" },
        })
        .to_string(),
    )
    .unwrap()
}

/// Binary manager whose build root contains the results of build 42
fn binary_manager(root: &TempDir) -> BuildManager<BinaryPackageBuild, CollectingReporter> {
    let build_dir = root.path().join("build-42");
    fs::create_dir_all(&build_dir).unwrap();
    fs::write(
        build_dir.join("hello_2.10-2_amd64.changes"),
        "Source: hello\nFiles:\n 0123 1024 devel optional hello_2.10-2_amd64.deb\n",
    )
    .unwrap();
    fs::write(build_dir.join("hello_2.10-2_amd64.deb"), "deb").unwrap();

    let config = Config { build_root: root.path().to_path_buf(), ..Config::default() };
    BuildManager::new(BinaryPackageBuild::new(Arc::new(config)), CollectingReporter::new())
}

#[test]
fn test_translation_success_visits_every_step_in_order() {
    let mut manager = translation_manager();
    let disposition = drive(&mut manager, translation_job(), all_succeed);

    assert_eq!(disposition, Disposition::Ok);
    assert_eq!(manager.visited(), &[Init, Unpack, Mount, Update, Install, Generate, Cleanup]);
    assert_eq!(manager.reporter().notifications(), only(Disposition::Ok));
    assert!(manager.is_finished());
}

#[test]
fn test_translation_mount_failure_reports_chroot_failed_once() {
    let mut manager = translation_manager();
    let disposition = drive(&mut manager, translation_job(), fail_at(&[Mount, Cleanup]));

    assert_eq!(disposition, Disposition::ChrootFailed);
    assert_eq!(manager.visited(), &[Init, Unpack, Mount, Cleanup]);
    assert_eq!(manager.reporter().notifications(), only(Disposition::ChrootFailed));
}

#[test]
fn test_translation_generate_failure_is_package_failure() {
    let mut manager = translation_manager();
    let disposition = drive(&mut manager, translation_job(), fail_at(&[Generate]));

    assert_eq!(disposition, Disposition::PackageFailed);
    assert_eq!(manager.visited(), &[Init, Unpack, Mount, Update, Install, Generate, Cleanup]);
}

#[test]
fn test_translation_cleanup_failure_alone_is_builder_failure() {
    let mut manager = translation_manager();
    let disposition = drive(&mut manager, translation_job(), fail_at(&[Cleanup]));

    assert_eq!(disposition, Disposition::BuilderFailed);
    assert_eq!(manager.reporter().notifications(), only(Disposition::BuilderFailed));
}

#[test]
fn test_advance_after_finish_is_an_error() {
    let mut manager = translation_manager();
    drive(&mut manager, translation_job(), all_succeed);

    let err = manager.advance(StepOutcome::success()).unwrap_err();
    assert!(matches!(err, BuildError::AlreadyFinished { ref build_id } if build_id == "tt-1"));
    assert!(err.is_defect());
    assert_eq!(manager.reporter().notifications().len(), 1);
}

#[test]
fn test_invalid_job_is_rejected_before_any_step() {
    let mut manager = translation_manager();
    let mut job = translation_job();
    job.extra_parameters.clear();

    let err = manager.initiate(job).unwrap_err();
    assert!(matches!(err, BuildError::Validation(_)));
    assert!(!err.is_defect());
    assert!(manager.visited().is_empty());
    assert!(manager.is_finished());
    assert_eq!(manager.reporter().notifications(), only(Disposition::BuilderFailed));
}

#[test]
fn test_binary_success_gathers_results() {
    let root = TempDir::new().unwrap();
    let mut manager = binary_manager(&root);
    let disposition = drive(&mut manager, binary_job(), all_succeed);

    assert_eq!(disposition, Disposition::Ok);
    assert_eq!(manager.visited(), &[Init, Unpack, Mount, Update, Sbuild, Reap, Umount, Cleanup]);

    let build_dir = root.path().join("build-42");
    assert_eq!(
        manager.reporter().notifications(),
        vec![Notification {
            disposition: Disposition::Ok,
            result_files: vec![
                build_dir.join("hello_2.10-2_amd64.deb"),
                build_dir.join("hello_2.10-2_amd64.changes"),
            ],
        }]
    );
}

#[test]
fn test_binary_dependency_wait() {
    let root = TempDir::new().unwrap();
    let mut manager = binary_manager(&root);
    let disposition = drive(&mut manager, binary_job(), |step| match step {
        Sbuild => StepOutcome::exit(1).with_log("E: Couldn't find package libfoo-dev\n"),
        _ => StepOutcome::success(),
    });

    assert_eq!(disposition, Disposition::dependency_wait("libfoo-dev"));
    assert_eq!(manager.visited(), &[Init, Unpack, Mount, Update, Sbuild, Reap, Umount, Cleanup]);
}

#[test]
fn test_binary_give_back() {
    let root = TempDir::new().unwrap();
    let mut manager = binary_manager(&root);
    let disposition = drive(&mut manager, binary_job(), |step| match step {
        Sbuild => StepOutcome::exit(3)
            .with_log("E: There are problems and -y was used without --force-yes\n"),
        _ => StepOutcome::success(),
    });

    assert_eq!(disposition, Disposition::GivenBack);
}

#[test]
fn test_binary_mount_failure_skips_reap() {
    let root = TempDir::new().unwrap();
    let mut manager = binary_manager(&root);
    let disposition = drive(&mut manager, binary_job(), fail_at(&[Mount]));

    assert_eq!(disposition, Disposition::ChrootFailed);
    assert_eq!(manager.visited(), &[Init, Unpack, Mount, Umount, Cleanup]);
}

#[test]
fn test_binary_unpack_failure_goes_straight_to_cleanup() {
    let root = TempDir::new().unwrap();
    let mut manager = binary_manager(&root);
    let disposition = drive(&mut manager, binary_job(), fail_at(&[Unpack]));

    assert_eq!(disposition, Disposition::ChrootFailed);
    assert_eq!(manager.visited(), &[Init, Unpack, Cleanup]);
}

#[test]
fn test_binary_reap_failure_is_ignored() {
    let root = TempDir::new().unwrap();
    let mut manager = binary_manager(&root);
    let disposition = drive(&mut manager, binary_job(), fail_at(&[Reap]));

    assert_eq!(disposition, Disposition::Ok);
}

#[test]
fn test_binary_umount_failure_after_success_is_builder_failure() {
    let root = TempDir::new().unwrap();
    let mut manager = binary_manager(&root);
    let disposition = drive(&mut manager, binary_job(), fail_at(&[Umount]));

    assert_eq!(disposition, Disposition::BuilderFailed);
    assert_eq!(manager.visited(), &[Init, Unpack, Mount, Update, Sbuild, Reap, Umount, Cleanup]);
    assert_eq!(manager.reporter().notifications(), only(Disposition::BuilderFailed));
}

#[test]
fn test_binary_missing_results_is_builder_failure() {
    let root = TempDir::new().unwrap();
    let config = Config { build_root: root.path().to_path_buf(), ..Config::default() };
    let mut manager =
        BuildManager::new(BinaryPackageBuild::new(Arc::new(config)), CollectingReporter::new());

    let disposition = drive(&mut manager, binary_job(), all_succeed);

    assert_eq!(disposition, Disposition::BuilderFailed);
    assert_eq!(manager.visited().last(), Some(&Cleanup));
    assert_eq!(manager.reporter().notifications(), only(Disposition::BuilderFailed));
}

#[test]
fn test_binary_sources_step_runs_with_archives() {
    let root = TempDir::new().unwrap();
    let mut manager = binary_manager(&root);
    let mut job = binary_job();
    job.extra_parameters
        .insert("archives".to_string(), json!(["deb http://ppa.example/ubuntu jammy main"]));

    drive(&mut manager, job, all_succeed);
    assert_eq!(
        manager.visited(),
        &[Init, Unpack, Mount, Sources, Update, Sbuild, Reap, Umount, Cleanup]
    );
}

fn recipe_job() -> JobDescription {
    JobDescription::from_json(
        &json!({
            "build_id": "7",
            "sandbox_id": "base-noble-amd64",
            "build_type": "source_package_recipe",
            "extra_parameters": {
                "recipe_text": "# bzr-builder format 0.3 deb-version 1.0\nlp:hello\n",
                "author_name": "Jane Doe",
                "author_email": "jane@example.com",
                "suite": "noble",
                "distroseries_name": "noble",
                "archive_purpose": "PPA",
            },
        })
        .to_string(),
    )
    .unwrap()
}

fn recipe_manager() -> BuildManager<SourcePackageRecipeBuild, CollectingReporter> {
    let variant = SourcePackageRecipeBuild::new(Arc::new(Config::default()));
    BuildManager::new(variant, CollectingReporter::new())
}

#[test]
fn test_recipe_dependency_wait() {
    let mut manager = recipe_manager();
    let disposition = drive(&mut manager, recipe_job(), |step| match step {
        BuildRecipe => StepOutcome::exit(202)
            .with_log("The following packages have unmet dependencies:\n Depends: libbar (>= 2.0) but it is not installable\n"),
        _ => StepOutcome::success(),
    });

    assert_eq!(disposition, Disposition::dependency_wait("libbar (>= 2.0)"));
    assert_eq!(manager.reporter().notifications().len(), 1);
}

const FAILURE_STATUSES: [i32; 6] = [1, 2, 100, 137, 255, -1];

const TRANSLATION_ORDER: [StepName; 7] = [Init, Unpack, Mount, Update, Install, Generate, Cleanup];

/// Full step order of a chroot build with extra archives
fn chroot_order(build: StepName) -> Vec<StepName> {
    vec![Init, Unpack, Mount, Sources, Update, build, Reap, Umount, Cleanup]
}

/// Setup steps of a chroot build with their disposition and visited steps
fn chroot_routes() -> Vec<(StepName, Disposition, Vec<StepName>)> {
    vec![
        (Init, Disposition::BuilderFailed, vec![Init, Cleanup]),
        (Unpack, Disposition::ChrootFailed, vec![Init, Unpack, Cleanup]),
        (Mount, Disposition::ChrootFailed, vec![Init, Unpack, Mount, Umount, Cleanup]),
        (Sources, Disposition::ChrootFailed, vec![Init, Unpack, Mount, Sources, Reap, Umount, Cleanup]),
        (
            Update,
            Disposition::ChrootFailed,
            vec![Init, Unpack, Mount, Sources, Update, Reap, Umount, Cleanup],
        ),
    ]
}

fn translation_routes() -> Vec<(StepName, Disposition, Vec<StepName>)> {
    vec![
        (Init, Disposition::BuilderFailed, vec![Init, Cleanup]),
        (Unpack, Disposition::ChrootFailed, vec![Init, Unpack, Cleanup]),
        (Mount, Disposition::ChrootFailed, vec![Init, Unpack, Mount, Cleanup]),
        (Update, Disposition::ChrootFailed, vec![Init, Unpack, Mount, Update, Cleanup]),
        (Install, Disposition::ChrootFailed, vec![Init, Unpack, Mount, Update, Install, Cleanup]),
        (Generate, Disposition::PackageFailed, TRANSLATION_ORDER.to_vec()),
    ]
}

fn with_archives(mut job: JobDescription) -> JobDescription {
    job.extra_parameters
        .insert("archives".to_string(), json!(["deb http://ppa.example/ubuntu noble main"]));
    job
}

fn binary_job_with_archives() -> JobDescription {
    with_archives(binary_job())
}

fn recipe_job_with_archives() -> JobDescription {
    with_archives(recipe_job())
}

fn binary_default_manager() -> BuildManager<BinaryPackageBuild, CollectingReporter> {
    BuildManager::new(BinaryPackageBuild::new(Arc::new(Config::default())), CollectingReporter::new())
}

/// Steps from `first` to the end of `order`
fn failing_from(order: &[StepName], first: StepName) -> Vec<StepName> {
    let start = order.iter().position(|step| *step == first).unwrap();
    order[start..].to_vec()
}

/// Fail `failing` with `status` and check the single report and the steps taken
fn assert_route<V, M, J>(
    new_manager: M,
    job: J,
    failing: &[StepName],
    status: i32,
    expected: &Disposition,
    visited: &[StepName],
) where
    V: BuildVariant,
    M: Fn() -> BuildManager<V, CollectingReporter>,
    J: Fn() -> JobDescription,
{
    let mut manager = new_manager();
    let disposition = drive(&mut manager, job(), |step| {
        if failing.contains(&step) {
            StepOutcome::exit(status)
        } else {
            StepOutcome::success()
        }
    });

    let context = format!("{failing:?} failing with exit {status}");
    assert_eq!(&disposition, expected, "{context}");
    assert_eq!(manager.visited(), visited, "{context}");
    assert_eq!(manager.reporter().notifications(), only(expected.clone()), "{context}");
}

#[test]
fn test_translation_fixed_rules_hold_for_every_status() {
    for (step, expected, visited) in translation_routes() {
        for status in FAILURE_STATUSES {
            assert_route(translation_manager, translation_job, &[step], status, &expected, &visited);
        }
    }
}

#[test]
fn test_binary_setup_rules_hold_for_every_status() {
    for (step, expected, visited) in chroot_routes() {
        for status in FAILURE_STATUSES {
            assert_route(
                binary_default_manager,
                binary_job_with_archives,
                &[step],
                status,
                &expected,
                &visited,
            );
        }
    }
}

#[test]
fn test_recipe_setup_rules_hold_for_every_status() {
    for (step, expected, visited) in chroot_routes() {
        for status in FAILURE_STATUSES {
            assert_route(recipe_manager, recipe_job_with_archives, &[step], status, &expected, &visited);
        }
    }
}

#[test]
fn test_translation_later_failures_never_change_the_report() {
    for (step, expected, visited) in translation_routes() {
        let failing = failing_from(&TRANSLATION_ORDER, step);
        assert_route(translation_manager, translation_job, &failing, 1, &expected, &visited);
    }
}

#[test]
fn test_binary_later_failures_never_change_the_report() {
    let order = chroot_order(Sbuild);
    let mut routes = chroot_routes();
    // Exit 1 without a recognisable dependency is a package failure
    routes.push((Sbuild, Disposition::PackageFailed, order.clone()));

    for (step, expected, visited) in routes {
        let failing = failing_from(&order, step);
        assert_route(
            binary_default_manager,
            binary_job_with_archives,
            &failing,
            1,
            &expected,
            &visited,
        );
    }
}

#[test]
fn test_recipe_later_failures_never_change_the_report() {
    let order = chroot_order(BuildRecipe);
    let mut routes = chroot_routes();
    routes.push((BuildRecipe, Disposition::BuilderFailed, order.clone()));

    for (step, expected, visited) in routes {
        let failing = failing_from(&order, step);
        assert_route(recipe_manager, recipe_job_with_archives, &failing, 1, &expected, &visited);
    }
}
