//! Configuration management for the sync engine.
//!
//! Provides hierarchical configuration loading from multiple sources with
//! priority:
//! 1. Default values (hardcoded)
//! 2. Host-provided settings file
//! 3. Local overrides
//! 4. Environment variables (highest priority)

mod engine;
mod retry;
mod watch;
pub use engine::*;
pub use retry::*;
pub use watch::*;

//---
use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SyncSettings {
    /// Tree layout and refresh behavior
    #[serde(default)]
    pub engine: EngineConfig,
    /// Watch hub tuning
    #[serde(default)]
    pub watch: WatchConfig,
    /// Retry policies for cluster operations
    #[serde(default)]
    pub retry: RetryPolicies,
}

impl SyncSettings {
    /// Load configuration with priority:
    /// 1. Explicit settings file, when the host passes one
    /// 2. `config/kubesync.*` in the working directory
    /// 3. `config/local.*` overrides
    /// 4. Environment variables
    ///
    /// # Arguments
    /// * `path` - Optional path to a host-provided settings file
    ///
    /// # Returns
    /// Merged and validated settings
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = Config::builder();

        // 1. Host-provided file is authoritative over bundled defaults
        if let Some(path) = path {
            config = config.add_source(File::with_name(path).required(true));
        } else {
            config = config.add_source(File::with_name("config/kubesync").required(false));
        }

        // 2. Local overrides
        config = config.add_source(File::with_name("config/local").required(false));

        // 3. Environment variables (highest priority)
        config = config.add_source(
            Environment::with_prefix("KUBESYNC")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let settings: SyncSettings = config.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject combinations no component can run with.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate().map_err(Error::InvalidSettings)?;
        self.watch.validate().map_err(Error::InvalidSettings)?;
        self.retry.validate().map_err(Error::InvalidSettings)?;
        Ok(())
    }
}

#[cfg(test)]
mod config_test;
