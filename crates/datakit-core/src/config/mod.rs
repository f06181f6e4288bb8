//! Configuration schemas.
//!
//! All configuration structs are deserialized via the `config` crate from an
//! optional TOML file overlaid with `DATAKIT__*` environment variables.

pub mod database;
pub mod logging;

use serde::{Deserialize, Serialize};

pub use self::database::DatabaseConfig;
pub use self::logging::LoggingConfig;

use crate::error::DataError;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Database connection settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DataConfig {
    /// Load configuration from a TOML file and the environment.
    ///
    /// The file is optional; environment variables prefixed with `DATAKIT`
    /// (separator `__`, e.g. `DATAKIT__DATABASE__URL`) override it.
    pub fn load(path: &str) -> Result<Self, DataError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("DATAKIT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| DataError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| DataError::configuration(format!("Failed to deserialize config: {e}")))
    }

    /// Build configuration from an in-memory TOML document.
    pub fn from_toml(document: &str) -> Result<Self, DataError> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(document, config::FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}
