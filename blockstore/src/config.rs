//! Store configuration module.
//!
//! This module provides configuration loading for the blockstore shell from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `BLOCKSTORE_DATA_DIRECTORY`: Directory where image files are stored (default: `.`)
//! - `BLOCKSTORE_MIN_DEGREE`: Minimum degree of new file indexes (default: `3`)
//!
//! # Invariants
//!
//! - `data_directory` is always a valid path (may not exist yet)
//! - `min_degree` is always at least 2

use std::path::PathBuf;

use crate::storage::btree::DEFAULT_MIN_DEGREE;

/// Environment variable naming the image directory.
pub const DATA_DIRECTORY_VAR: &str = "BLOCKSTORE_DATA_DIRECTORY";
/// Environment variable holding the B-tree minimum degree.
pub const MIN_DEGREE_VAR: &str = "BLOCKSTORE_MIN_DEGREE";

/// Store configuration.
///
/// # Post-conditions
///
/// When constructed via `from_env()`, `min_degree >= 2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory holding image files.
    /// Image `name` lives at `{data_directory}/{name}.db0`.
    pub data_directory: PathBuf,
    /// Minimum degree `t` of every file index.
    pub min_degree: usize,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl StoreConfig {
    /// Default image directory.
    pub const DEFAULT_DATA_DIRECTORY: &'static str = ".";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `BLOCKSTORE_MIN_DEGREE` is set but is not an
    /// integer of at least 2.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_directory = std::env::var(DATA_DIRECTORY_VAR).ok();
        let min_degree = std::env::var(MIN_DEGREE_VAR).ok();
        Self::from_vars(data_directory.as_deref(), min_degree.as_deref())
    }

    /// Build configuration from raw variable values (`None` if unset).
    pub fn from_vars(
        data_directory: Option<&str>,
        min_degree: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let data_directory = data_directory
            .map_or_else(|| PathBuf::from(Self::DEFAULT_DATA_DIRECTORY), PathBuf::from);
        let min_degree = match min_degree {
            Some(value) => parse_min_degree(value)?,
            None => DEFAULT_MIN_DEGREE,
        };

        Ok(Self {
            data_directory,
            min_degree,
        })
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from(Self::DEFAULT_DATA_DIRECTORY),
            min_degree: DEFAULT_MIN_DEGREE,
        }
    }
}

fn parse_min_degree(value: &str) -> Result<usize, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        name: MIN_DEGREE_VAR.to_string(),
        message: format!("'{value}' is not a valid minimum degree (must be an integer >= 2)"),
    };
    let degree = value.trim().parse::<usize>().map_err(|_| invalid())?;
    if degree < 2 {
        return Err(invalid());
    }
    Ok(degree)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = StoreConfig::from_vars(None, None).expect("defaults");
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.data_directory, PathBuf::from("."));
        assert_eq!(config.min_degree, 3);
    }

    #[test]
    fn test_explicit_values() {
        let config = StoreConfig::from_vars(Some("/tmp/images"), Some("5"))
            .expect("valid");
        assert_eq!(config.data_directory, PathBuf::from("/tmp/images"));
        assert_eq!(config.min_degree, 5);
    }

    #[test]
    fn test_invalid_min_degree() {
        for value in ["1", "0", "-3", "three", ""] {
            let err = StoreConfig::from_vars(None, Some(value)).expect_err("invalid");
            assert!(matches!(err, ConfigError::InvalidValue { ref name, .. } if name == MIN_DEGREE_VAR));
        }
    }

    #[test]
    fn test_config_error_display_invalid() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
