//! Configuration loading and schema definitions for sortie.
//!
//! Configuration comes from a TOML file; every section is optional.
//! See [`schema`] for the full format.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads sortie configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use sortie::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("sortie.toml"))?;
/// println!("Parallel: {}", config.harness.parallel);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads sortie configuration from a TOML string.
///
/// # Example
///
/// ```
/// use sortie::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [harness]
///     parallel = 4
///
///     [target]
///     distro = "fcos"
/// "#)?;
///
/// assert_eq!(config.harness.parallel, 4);
/// assert_eq!(config.target.distro, "fcos");
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}
