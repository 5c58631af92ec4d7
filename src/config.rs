use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub vcs: VcsConfig,
}

// ---------------------------------------------------------------------------
// VCS command
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct VcsConfig {
    /// Shell command line run for every operation.  The request is described
    /// to it entirely through environment variables (`MODULE`, `ACTION`,
    /// `VERSION`, ...) and its stdout is taken as the response.
    pub command: String,
    /// Shell binary used to interpret `command`.
    #[serde(default = "default_shell")]
    pub shell: String,
}

fn default_shell() -> String {
    "sh".to_string()
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        !config.vcs.command.trim().is_empty(),
        "vcs.command must not be empty"
    );
    anyhow::ensure!(
        !config.vcs.shell.trim().is_empty(),
        "vcs.shell must not be empty"
    );
    Ok(())
}
