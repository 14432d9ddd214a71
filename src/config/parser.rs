use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Reads, parses and validates a configuration file
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - A configuration that passed validation
/// * `Err(ConfigError)` - The file is unreadable, not TOML, or invalid
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use spindle::config::load_config;
///
/// let config = load_config(Path::new("spindle.toml")).unwrap();
/// println!("Queue: {}", config.queue.name);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    parse_config(&std::fs::read_to_string(path)?)
}

/// SHA-256 of a configuration file, hex encoded
///
/// Logged at startup so a crawl can be tied to the exact configuration it ran with.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    Ok(hash_content(&std::fs::read(path)?))
}

/// Loads a configuration together with the hash of the bytes it was parsed from
///
/// The file is read once, so the hash always matches the returned config.
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok((config, hash_content(content.as_bytes())))
}

fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn hash_content(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}
