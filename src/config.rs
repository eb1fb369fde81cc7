//! Service configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. `config/iio-service.toml` (or an explicit path)
//! 2. Environment variables prefixed with `IIO_SERVICE_`, nested keys
//!    separated by `__`
//!
//! Every section has defaults, so an empty or missing file is valid.
//!
//! # Example
//! ```no_run
//! use iio_service::config::ServiceConfig;
//!
//! let config = ServiceConfig::load()?;
//! println!("Sysfs root: {}", config.sysfs.devices_root.display());
//! # Ok::<(), figment::Error>(())
//! ```

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::engine::WindowAverage;
use crate::error::{ServiceError, ServiceResult};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/iio-service.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "IIO_SERVICE_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Fan-out engine settings
    pub engine: EngineConfig,
    /// Linux sysfs driver settings
    pub sysfs: SysfsConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "iio-service".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Fan-out engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of the engine's bounded command queue
    pub mailbox_capacity: usize,
    /// Weighting applied inside a decimation window
    pub window_average: WindowAverage,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 64,
            window_average: WindowAverage::default(),
        }
    }
}

/// Sysfs driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SysfsConfig {
    /// Directory holding `iio:deviceN` and `triggerN` entries
    pub devices_root: PathBuf,
    /// Directory holding the `iio:deviceN` character devices
    pub dev_root: PathBuf,
    /// Records requested through `buffer/length`
    pub buffer_length: u32,
}

impl Default for SysfsConfig {
    fn default() -> Self {
        Self {
            devices_root: PathBuf::from(iio_driver_sysfs::DEFAULT_DEVICES_ROOT),
            dev_root: PathBuf::from(iio_driver_sysfs::DEFAULT_DEV_ROOT),
            buffer_length: 1,
        }
    }
}

impl ServiceConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    ///
    /// Example override: `IIO_SERVICE_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// The provider stack, for callers that merge further sources.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if !LOG_LEVELS.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            ));
        }

        if self.engine.mailbox_capacity == 0 {
            return Err("engine.mailbox_capacity must be greater than 0".to_string());
        }

        if self.sysfs.buffer_length == 0 {
            return Err("sysfs.buffer_length must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Load, then validate.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> ServiceResult<Self> {
        let config = Self::load_from(path)?;
        config.validate().map_err(ServiceError::Configuration)?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> ServiceResult<String> {
        toml::to_string_pretty(self).map_err(|e| ServiceError::Configuration(e.to_string()))
    }
}
