//! Outcome classifiers for build steps
//!
//! A build tool's exit status alone is ambiguous: the same status can mean a
//! missing dependency, a transient archive problem or a genuine package
//! failure depending on what the log says. The classifiers here map an
//! `(exit status, log excerpt)` pair to a terminal [`Disposition`] using
//! ordered rule lists where the first matching rule wins and an explicit
//! fallback applies when nothing matches.

use std::fmt;

use buildd_core::Disposition;
use regex::Regex;
use tracing::debug;

/// Maps the completion of a build step to a disposition
pub trait OutcomeClassifier: Send + Sync + fmt::Debug {
    /// Classify one step completion. Must be deterministic and side-effect free.
    fn classify(&self, exit_status: i32, log: &str) -> Disposition;
}

/// Exit statuses of the binary packaging tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbuildExit {
    Ok,
    DepFail,
    GivenBack,
    PackageFail,
    BuilderFail,
}

impl SbuildExit {
    /// Interpret a raw exit status
    pub fn from_status(status: i32) -> Self {
        match status {
            0 => Self::Ok,
            1 => Self::DepFail,
            2 => Self::GivenBack,
            3 => Self::PackageFail,
            _ => Self::BuilderFail,
        }
    }
}

/// Which occurrence of a pattern supplies the dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurrence {
    First,
    Last,
}

/// Pattern extracting a "package (constraint)" string from a log
#[derive(Debug, Clone)]
pub struct DependencyRule {
    pattern: Regex,
    template: String,
    occurrence: Occurrence,
}

impl DependencyRule {
    /// Create a rule; `template` uses `${name}` references to named groups
    pub fn new(
        pattern: &str,
        template: impl Into<String>,
        occurrence: Occurrence,
    ) -> std::result::Result<Self, regex::Error> {
        Ok(Self { pattern: Regex::new(pattern)?, template: template.into(), occurrence })
    }

    /// Extract the dependency description, if the pattern matches
    pub fn extract(&self, log: &str) -> Option<String> {
        let captures = match self.occurrence {
            Occurrence::First => self.pattern.captures(log),
            Occurrence::Last => self.pattern.captures_iter(log).last(),
        }?;
        let mut expanded = String::new();
        captures.expand(&self.template, &mut expanded);
        Some(expanded)
    }
}

/// Classifier for binary package builds.
///
/// Status table: 0 OK, 1 dependency failure, 2 give-back, 3 package failure,
/// anything else builder failure. Dependency and package failures are then
/// refined against the log: a give-back pattern turns either into
/// `GIVEN_BACK`; otherwise a dependency failure needs a dependency rule to
/// match or it is downgraded to `PACKAGE_FAILED`.
#[derive(Debug, Clone)]
pub struct BinaryPackageClassifier {
    give_back: Vec<Regex>,
    dependency: Vec<DependencyRule>,
}

impl BinaryPackageClassifier {
    /// Create the classifier with the standard rule lists
    pub fn new() -> Self {
        let give_back = [
            r"(?m)^E: There are problems and -y was used without --force-yes",
            r"(?m)^E: Failed to fetch .*Hash Sum mismatch",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("Valid regex"))
        .collect();

        let dependency = [
            (
                r"(?P<pk>[\-+.\w]+)\(inst [^ ]+ ! >> wanted (?P<v>[\-.+\w:~]+)\)",
                "${pk} (>> ${v})",
                Occurrence::First,
            ),
            (
                r"(?P<pk>[\-+.\w]+)\(inst [^ ]+ ! >?= wanted (?P<v>[\-.+\w:~]+)\)",
                "${pk} (>= ${v})",
                Occurrence::First,
            ),
            (r"(?m)^E: Couldn't find package (?P<pk>[\-+.\w]+)", "${pk}", Occurrence::Last),
            (
                r"(?m)^E: Package '?(?P<pk>[\-+.\w]+)'? has no installation candidate",
                "${pk}",
                Occurrence::Last,
            ),
            (r"(?m)^E: Unable to locate package (?P<pk>[\-+.\w]+)", "${pk}", Occurrence::Last),
        ]
        .into_iter()
        .map(|(pattern, template, occurrence)| {
            DependencyRule::new(pattern, template, occurrence).expect("Valid regex")
        })
        .collect();

        Self { give_back, dependency }
    }

    /// Create a classifier with custom rule lists
    pub fn with_rules(give_back: Vec<Regex>, dependency: Vec<DependencyRule>) -> Self {
        Self { give_back, dependency }
    }

    fn is_given_back(&self, log: &str) -> bool {
        self.give_back.iter().any(|rx| rx.is_match(log))
    }

    fn missing_dependency(&self, log: &str) -> Option<String> {
        self.dependency.iter().find_map(|rule| rule.extract(log))
    }
}

impl Default for BinaryPackageClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl OutcomeClassifier for BinaryPackageClassifier {
    fn classify(&self, exit_status: i32, log: &str) -> Disposition {
        match SbuildExit::from_status(exit_status) {
            SbuildExit::Ok => Disposition::Ok,
            SbuildExit::GivenBack => Disposition::GivenBack,
            SbuildExit::BuilderFail => Disposition::BuilderFailed,
            status @ (SbuildExit::DepFail | SbuildExit::PackageFail) => {
                if self.is_given_back(log) {
                    debug!(exit_status, "Log matched a give-back pattern");
                    return Disposition::GivenBack;
                }
                if status == SbuildExit::PackageFail {
                    return Disposition::PackageFailed;
                }
                match self.missing_dependency(log) {
                    Some(dependencies) => Disposition::DependencyWait { dependencies },
                    None => {
                        debug!("Dependency failure without a recognisable dependency");
                        Disposition::PackageFailed
                    }
                }
            }
        }
    }
}

/// Exit statuses of the recipe build tool
pub mod recipe_exit {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE_INSTALL: i32 = 200;
    pub const FAILURE_BUILD_TREE: i32 = 201;
    pub const FAILURE_INSTALL_BUILD_DEPS: i32 = 202;
    pub const FAILURE_BUILD_SOURCE_PACKAGE: i32 = 203;
}

/// Classifier for source package recipe builds
#[derive(Debug, Clone)]
pub struct RecipeClassifier {
    unmet_dependency: Regex,
}

impl RecipeClassifier {
    /// Create the classifier
    pub fn new() -> Self {
        Self {
            unmet_dependency: Regex::new(r"Depends: ([^ \n]+(?: \([^)\n]*\))?)")
                .expect("Valid regex"),
        }
    }
}

impl Default for RecipeClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl OutcomeClassifier for RecipeClassifier {
    fn classify(&self, exit_status: i32, log: &str) -> Disposition {
        use recipe_exit::*;

        match exit_status {
            SUCCESS => Disposition::Ok,
            FAILURE_INSTALL_BUILD_DEPS => match self.unmet_dependency.captures(log) {
                Some(caps) => Disposition::dependency_wait(&caps[1]),
                None => Disposition::PackageFailed,
            },
            FAILURE_INSTALL..=FAILURE_BUILD_SOURCE_PACKAGE => Disposition::PackageFailed,
            _ => Disposition::BuilderFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(status: i32, log: &str) -> Disposition {
        BinaryPackageClassifier::new().classify(status, log)
    }

    fn recipe(status: i32, log: &str) -> Disposition {
        RecipeClassifier::new().classify(status, log)
    }

    #[test]
    fn test_binary_status_table() {
        assert_eq!(binary(0, ""), Disposition::Ok);
        assert_eq!(binary(2, ""), Disposition::GivenBack);
        assert_eq!(binary(3, ""), Disposition::PackageFailed);
        assert_eq!(binary(4, ""), Disposition::BuilderFailed);
        assert_eq!(binary(5, ""), Disposition::BuilderFailed);
        assert_eq!(binary(-1, ""), Disposition::BuilderFailed);
    }

    #[test]
    fn test_binary_dependency_wait() {
        assert_eq!(
            binary(1, "E: Couldn't find package libfoo-dev"),
            Disposition::dependency_wait("libfoo-dev")
        );
        assert_eq!(binary(1, "no matching regex"), Disposition::PackageFailed);
    }

    #[test]
    fn test_binary_version_constraints() {
        let log = "After installing, the following source dependencies are still unsatisfied:\n\
                   libglib2.0-dev(inst 2.30.0-1 ! >= wanted 2.32.0)\n";
        assert_eq!(binary(1, log), Disposition::dependency_wait("libglib2.0-dev (>= 2.32.0)"));

        let log = "debhelper(inst 8.0 ! >> wanted 9)\n";
        assert_eq!(binary(1, log), Disposition::dependency_wait("debhelper (>> 9)"));
    }

    #[test]
    fn test_binary_last_occurrence_wins() {
        let log = "E: Unable to locate package libold\nsome noise\nE: Unable to locate package libnew\n";
        assert_eq!(binary(1, log), Disposition::dependency_wait("libnew"));

        let log = "E: Package 'libquoted' has no installation candidate\n";
        assert_eq!(binary(1, log), Disposition::dependency_wait("libquoted"));
    }

    #[test]
    fn test_binary_pattern_must_start_line() {
        assert_eq!(binary(1, "note: E: Couldn't find package libfoo"), Disposition::PackageFailed);
    }

    #[test]
    fn test_binary_give_back() {
        let log = "E: There are problems and -y was used without --force-yes";
        assert_eq!(binary(3, log), Disposition::GivenBack);
        // Give-back wins over an extractable dependency
        let log = "E: Couldn't find package libfoo\nE: There are problems and -y was used without --force-yes\n";
        assert_eq!(binary(1, log), Disposition::GivenBack);
        // Only dependency and package failures are refined
        assert_eq!(binary(4, log), Disposition::BuilderFailed);
        assert_eq!(binary(0, log), Disposition::Ok);
    }

    #[test]
    fn test_recipe_classifier() {
        assert_eq!(recipe(0, ""), Disposition::Ok);
        assert_eq!(
            recipe(202, "...Depends: libbar (>= 2.0)..."),
            Disposition::dependency_wait("libbar (>= 2.0)")
        );
        assert_eq!(recipe(202, "no depends line"), Disposition::PackageFailed);
        assert_eq!(recipe(200, ""), Disposition::PackageFailed);
        assert_eq!(recipe(201, ""), Disposition::PackageFailed);
        assert_eq!(recipe(203, ""), Disposition::PackageFailed);
        assert_eq!(recipe(204, ""), Disposition::BuilderFailed);
        assert_eq!(recipe(999, ""), Disposition::BuilderFailed);
        assert_eq!(recipe(1, ""), Disposition::BuilderFailed);
    }

    #[test]
    fn test_recipe_apt_output() {
        let log = "The following packages have unmet dependencies:\n \
                   pbuilder-satisfydepends-dummy : Depends: libbar-dev but it is not installable\n";
        assert_eq!(recipe(202, log), Disposition::dependency_wait("libbar-dev"));
    }
}
