//! Init command implementation

use std::path::PathBuf;

use buildd_config::Config;
use color_eyre::eyre::{Context, Result};
use tracing::info;

/// Init command implementation
pub struct InitCommand {
    output_path: PathBuf,
    force: bool,
}

impl InitCommand {
    pub fn new(output_path: PathBuf, force: bool) -> Self {
        Self { output_path, force }
    }

    pub async fn execute(&self) -> Result<()> {
        info!("Initializing configuration file at {}", self.output_path.display());

        if self.output_path.exists() && !self.force {
            return Err(color_eyre::eyre::eyre!(
                "Configuration file already exists: {}. Use --force to overwrite.",
                self.output_path.display()
            ));
        }

        let yaml_content =
            Config::default().to_yaml().with_context(|| "Failed to serialize config to YAML")?;

        std::fs::write(&self.output_path, yaml_content)
            .with_context(|| format!("Failed to write config to {}", self.output_path.display()))?;

        println!("✓ Created configuration file: {}", self.output_path.display());
        println!("\nNext steps:");
        println!("1. Point build_root and helpers_dir at the worker's directories");
        println!("2. Check the job with: buildd-slave validate --job job.json");
        println!("3. Run it with: buildd-slave run --job job.json");

        Ok(())
    }
}
