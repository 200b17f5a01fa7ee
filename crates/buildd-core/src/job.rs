//! Job descriptions and the per-build job context

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, ValidationError};

/// Kind of build requested by the dispatcher
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuildType {
    /// Binary packages built from a source package (.dsc)
    BinaryPackage,

    /// Source package generated from a recipe
    SourcePackageRecipe,

    /// Translation templates extracted from a branch
    TranslationTemplates,
}

impl BuildType {
    /// Get the wire name of this build type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BinaryPackage => "binary_package",
            Self::SourcePackageRecipe => "source_package_recipe",
            Self::TranslationTemplates => "translation_templates",
        }
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job as received from the dispatcher, before validation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDescription {
    /// Dispatcher-assigned build identifier
    pub build_id: String,

    /// Sandbox (chroot tarball) the build runs in
    pub sandbox_id: String,

    /// Files shipped to the worker for this build
    #[serde(default)]
    pub input_files: Vec<String>,

    /// Build type selecting the pipeline
    pub build_type: BuildType,

    /// Type-specific parameters
    #[serde(default)]
    pub extra_parameters: serde_json::Map<String, serde_json::Value>,
}

impl JobDescription {
    /// Parse a job description from JSON
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load a job description from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::ParseError {
            message: format!("Failed to read job file {path:?}: {e}"),
        })?;
        Self::from_json(&content)
    }

    /// Check the fields every build type needs
    pub fn validate_identity(&self) -> std::result::Result<(), ValidationError> {
        require_non_empty("build_id", &self.build_id)?;
        require_non_empty("sandbox_id", &self.sandbox_id)?;
        Ok(())
    }

    /// Interpret the extra parameters as the typed parameters of a build type
    pub fn parameters<P: DeserializeOwned>(&self) -> std::result::Result<P, ValidationError> {
        let value = serde_json::Value::Object(self.extra_parameters.clone());
        serde_json::from_value(value).map_err(|e| {
            let message = e.to_string();
            match missing_field_name(&message) {
                Some(field) => ValidationError::missing_field(self.build_type.as_str(), field),
                None => ValidationError::invalid_parameters(self.build_type.as_str(), message),
            }
        })
    }

    /// Check whether a file was shipped with the job
    pub fn has_input_file(&self, name: &str) -> bool {
        self.input_files.iter().any(|f| f == name)
    }
}

/// Immutable record of one accepted build job.
///
/// Created once `initiate` has validated the description; a new build
/// always gets a new context.
#[derive(Debug, Clone)]
pub struct JobContext<P> {
    build_id: String,
    sandbox_id: String,
    input_files: Vec<String>,
    build_type: BuildType,
    parameters: P,
    accepted_at: DateTime<Utc>,
}

impl<P> JobContext<P> {
    /// Create a context from a validated description and its typed parameters
    pub fn new(description: JobDescription, parameters: P) -> Self {
        Self {
            build_id: description.build_id,
            sandbox_id: description.sandbox_id,
            input_files: description.input_files,
            build_type: description.build_type,
            parameters,
            accepted_at: Utc::now(),
        }
    }

    /// Dispatcher-assigned build identifier
    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    /// Sandbox the build runs in
    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    /// Files shipped with the job
    pub fn input_files(&self) -> &[String] {
        &self.input_files
    }

    /// Build type
    pub fn build_type(&self) -> BuildType {
        self.build_type
    }

    /// Typed build parameters
    pub fn parameters(&self) -> &P {
        &self.parameters
    }

    /// When the build was accepted
    pub fn accepted_at(&self) -> DateTime<Utc> {
        self.accepted_at
    }
}

/// Reject empty required strings
pub fn require_non_empty(field: &str, value: &str) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::empty_field(field));
    }
    Ok(())
}

fn missing_field_name(message: &str) -> Option<&str> {
    let rest = message.strip_prefix("missing field `")?;
    rest.split('`').next()
}
