//! Configuration management for the buildd worker
//!
//! This crate handles YAML configuration parsing, validation,
//! and environment variable substitution.

use std::path::{Path, PathBuf};
use std::time::Duration;

use buildd_core::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Parent directory of the per-build directories
    #[serde(default = "default_build_root")]
    pub build_root: PathBuf,

    /// Directory holding the helper executables
    #[serde(default = "default_helpers_dir")]
    pub helpers_dir: PathBuf,

    /// Architecture tag passed to the packaging tool
    #[serde(default = "default_architecture")]
    pub architecture: String,

    /// Size of the log excerpt handed to the outcome classifiers
    #[serde(default = "default_log_tail_bytes")]
    pub log_tail_bytes: usize,

    /// Per-step timeout; steps run unbounded when unset
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,

    /// Command prefix for steps that run as root
    #[serde(default = "default_root_command")]
    pub root_command: Vec<String>,

    /// Unprivileged sandbox user; its home holds the build work directory
    #[serde(default = "default_build_user")]
    pub build_user: String,

    /// Helper executable names
    #[serde(default)]
    pub helpers: HelperNames,

    /// Translation templates settings
    #[serde(default)]
    pub translation_templates: TranslationTemplatesConfig,
}

/// Names of the helper executables, relative to `helpers_dir`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HelperNames {
    pub prep: String,
    pub unpack: String,
    pub mount: String,
    pub sources: String,
    pub update: String,
    pub sbuild: String,
    pub build_recipe: String,
    pub install: String,
    pub generate_templates: String,
    pub reap: String,
    pub umount: String,
    pub cleanup: String,
}

impl Default for HelperNames {
    fn default() -> Self {
        Self {
            prep: "slave-prep".to_string(),
            unpack: "unpack-chroot".to_string(),
            mount: "mount-chroot".to_string(),
            sources: "override-sources-list".to_string(),
            update: "update-debian-chroot".to_string(),
            sbuild: "sbuild-package".to_string(),
            build_recipe: "buildrecipe".to_string(),
            install: "install-packages".to_string(),
            generate_templates: "generate-translation-templates".to_string(),
            reap: "scan-for-processes".to_string(),
            umount: "umount-chroot".to_string(),
            cleanup: "remove-build".to_string(),
        }
    }
}

/// Translation templates configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranslationTemplatesConfig {
    /// Packages installed into the sandbox before templates are generated
    #[serde(default = "default_template_packages")]
    pub packages: Vec<String>,

    /// Name of the tarball the generator writes
    #[serde(default = "default_result_name")]
    pub result_name: String,
}

impl Default for TranslationTemplatesConfig {
    fn default() -> Self {
        Self { packages: default_template_packages(), result_name: default_result_name() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            build_root: default_build_root(),
            helpers_dir: default_helpers_dir(),
            architecture: default_architecture(),
            log_tail_bytes: default_log_tail_bytes(),
            step_timeout_secs: None,
            root_command: default_root_command(),
            build_user: default_build_user(),
            helpers: HelperNames::default(),
            translation_templates: TranslationTemplatesConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::ConfigError {
            message: format!("Failed to read config file {path:?}: {e}"),
        })?;

        let mut config = Self::from_yaml(&content)?;

        // Expand environment variables
        config.expand_env_vars()?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from YAML without touching the filesystem
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::ConfigError { message: format!("Failed to parse YAML: {e}") })
    }

    /// Serialize configuration to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::ConfigError { message: format!("Failed to write YAML: {e}") })
    }

    /// Expand environment variables in paths
    fn expand_env_vars(&mut self) -> Result<()> {
        self.build_root = expand_path(&self.build_root)?;
        self.helpers_dir = expand_path(&self.helpers_dir)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.architecture.trim().is_empty() {
            return Err(Error::ConfigError {
                message: "architecture cannot be empty".to_string(),
            });
        }

        if self.log_tail_bytes == 0 {
            return Err(Error::ConfigError {
                message: "log_tail_bytes must be at least 1".to_string(),
            });
        }

        if self.step_timeout_secs == Some(0) {
            return Err(Error::ConfigError {
                message: "step_timeout_secs must be at least 1 when set".to_string(),
            });
        }

        if self.build_user.trim().is_empty() {
            return Err(Error::ConfigError {
                message: "build_user cannot be empty".to_string(),
            });
        }

        if self.translation_templates.packages.is_empty() {
            return Err(Error::ConfigError {
                message: "translation_templates.packages cannot be empty".to_string(),
            });
        }

        // Create build_root if it doesn't exist
        if !self.build_root.exists() {
            std::fs::create_dir_all(&self.build_root).map_err(|e| Error::ConfigError {
                message: format!("Failed to create build_root: {e}"),
            })?;
        }

        Ok(())
    }

    /// Full path of a helper executable
    pub fn helper(&self, name: &str) -> PathBuf {
        self.helpers_dir.join(name)
    }

    /// Per-step timeout
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_secs.map(Duration::from_secs)
    }

    /// Directory of one build
    pub fn build_dir(&self, build_id: &str) -> PathBuf {
        self.build_root.join(format!("build-{build_id}"))
    }

    /// Log file collecting the output of every step of one build
    pub fn build_log(&self, build_id: &str) -> PathBuf {
        self.build_root.join(format!("buildlog-{build_id}"))
    }
}

/// Expand environment variables in a path
fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path.to_string_lossy();
    let env_var_re =
        Regex::new(r"\$\{([^}]+)\}|\$([A-Za-z_][A-Za-z0-9_]*)").expect("Invalid regex");

    let mut result = path_str.to_string();
    for cap in env_var_re.captures_iter(&path_str) {
        let Some(var_name) = cap.get(1).or_else(|| cap.get(2)).map(|m| m.as_str()) else {
            continue;
        };
        let var_value = std::env::var(var_name).map_err(|_| Error::ConfigError {
            message: format!("Environment variable not found: {var_name}"),
        })?;

        result = result.replace(&cap[0], &var_value);
    }

    Ok(PathBuf::from(result))
}

fn default_build_root() -> PathBuf {
    PathBuf::from("/home/buildd")
}

fn default_helpers_dir() -> PathBuf {
    PathBuf::from("/usr/share/buildd/slavebin")
}

fn default_architecture() -> String {
    "amd64".to_string()
}

fn default_log_tail_bytes() -> usize {
    4096
}

fn default_root_command() -> Vec<String> {
    vec!["sudo".to_string()]
}

fn default_build_user() -> String {
    "buildd".to_string()
}

fn default_template_packages() -> Vec<String> {
    vec!["bzr".to_string(), "intltool".to_string()]
}

fn default_result_name() -> String {
    "translation-templates.tar.gz".to_string()
}
