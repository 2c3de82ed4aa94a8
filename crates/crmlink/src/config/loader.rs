use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

/// Largest batch a single scanner cycle may request per tenant.
pub const MAX_BATCH_SIZE: usize = 1000;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    // An empty document is a valid all-defaults config.
    let config: Config = if content.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(content)?
    };

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let scanner = &config.scanner;

    if scanner.interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "scanner.interval_secs must be greater than 0".to_string(),
        });
    }

    if scanner.batch_size == 0 || scanner.batch_size > MAX_BATCH_SIZE {
        return Err(ConfigError::Validation {
            message: format!(
                "scanner.batch_size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, scanner.batch_size
            ),
        });
    }

    if scanner.folders.is_empty() {
        return Err(ConfigError::Validation {
            message: "scanner.folders must name at least one folder".to_string(),
        });
    }

    if config.logging.filter.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "logging.filter must not be empty".to_string(),
        });
    }

    Ok(())
}
