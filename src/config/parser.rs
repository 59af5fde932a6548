use crate::config::overrides::ConfigOverrides;
use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Reads and parses a configuration file without validating it
///
/// Used when the file is only one layer of the final configuration.
pub fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let config = read_config(path)?;
    validate(&config)?;
    Ok(config)
}

/// Assembles the run configuration by explicit precedence
///
/// Command-line values override the file, the file overrides built-in defaults.
/// The merged result is validated as a whole.
pub fn assemble_config(
    file: Option<&Path>,
    overrides: ConfigOverrides,
) -> Result<Config, ConfigError> {
    let base = match file {
        Some(path) => read_config(path)?,
        None => Config::default(),
    };

    let config = overrides.apply(base);
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the effective configuration
///
/// Recorded with each run so runs made with different settings can be told apart.
/// Hashes the merged values, so a flag given on the command line counts the same
/// as one read from the file.
pub fn config_hash(config: &Config) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{:?}", config).as_bytes());
    hex::encode(hasher.finalize())
}
