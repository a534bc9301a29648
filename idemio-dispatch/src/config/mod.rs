use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Sizing for a single worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub name: String,
    pub workers: usize,
}

impl WorkerPoolConfig {
    pub fn new(name: impl Into<String>, workers: usize) -> Self {
        Self {
            name: name.into(),
            workers,
        }
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            workers: 10,
        }
    }
}

/// Configuration for a dispatch template and its destinations.
///
/// `pool` sizes the shared pool used by every destination that does not have an entry in
/// `destinations`. A destination listed there gets a dedicated pool when it is registered.
///
/// ```json
/// {
///   "pool": { "name": "shared", "workers": 10 },
///   "destinations": {
///     "threads": { "name": "threads", "workers": 5 }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub pool: WorkerPoolConfig,
    pub destinations: HashMap<String, WorkerPoolConfig>,
}

impl DispatchConfig {
    pub fn builder() -> DispatchConfigBuilder {
        DispatchConfigBuilder::new()
    }

    pub fn destination_pool(&self, destination: &str) -> Option<&WorkerPoolConfig> {
        self.destinations.get(destination)
    }

    /// Checks that every pool has at least one worker.
    pub fn validate(&self) -> Result<(), ConfigProviderError> {
        std::iter::once(&self.pool)
            .chain(self.destinations.values())
            .find(|pool| pool.workers == 0)
            .map_or(Ok(()), |pool| {
                Err(ConfigProviderError::invalid_error(format!(
                    "Worker pool '{}' must have at least one worker",
                    pool.name
                )))
            })
    }
}

pub struct DispatchConfigBuilder {
    config: DispatchConfig,
}

impl DispatchConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: DispatchConfig::default(),
        }
    }

    pub fn pool(mut self, name: impl Into<String>, workers: usize) -> Self {
        self.config.pool = WorkerPoolConfig::new(name, workers);
        self
    }

    pub fn destination_pool(
        mut self,
        destination: impl Into<String>,
        workers: usize,
    ) -> Self {
        let destination = destination.into();
        self.config.destinations.insert(
            destination.clone(),
            WorkerPoolConfig::new(destination, workers),
        );
        self
    }

    pub fn build(self) -> DispatchConfig {
        self.config
    }
}

impl Default for DispatchConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub trait ConfigProvider<C>
where
    C: Default + DeserializeOwned,
{
    fn load(&self) -> Result<C, ConfigProviderError>;
}

pub struct DefaultConfigProvider;

impl<C> ConfigProvider<C> for DefaultConfigProvider
where
    C: Default + DeserializeOwned,
{
    fn load(&self) -> Result<C, ConfigProviderError> {
        Ok(C::default())
    }
}

/// Loads a JSON configuration file from `base_path/config_name`.
pub struct FileConfigProvider {
    pub base_path: String,
    pub config_name: String,
}

impl<C> ConfigProvider<C> for FileConfigProvider
where
    C: Default + DeserializeOwned,
{
    fn load(&self) -> Result<C, ConfigProviderError> {
        let config_path = Path::new(&self.base_path).join(&self.config_name);
        let file = File::open(&config_path).map_err(|e| {
            let msg = format!("Could not open config file {}: {}", config_path.display(), e);
            ConfigProviderError::load_error(msg)
        })?;
        serde_json::from_reader(file).map_err(|e| {
            let msg = format!("Could not load config file from reader: {}", e);
            ConfigProviderError::load_error(msg)
        })
    }
}

pub struct ProgrammaticConfigProvider<C> {
    pub config: C,
}

impl<C> ConfigProvider<C> for ProgrammaticConfigProvider<C>
where
    C: Default + DeserializeOwned + Clone + Serialize,
{
    fn load(&self) -> Result<C, ConfigProviderError> {
        Ok(self.config.clone())
    }
}

/// Loads a dispatch configuration from `provider` and validates it.
pub fn load_dispatch_config(
    provider: &impl ConfigProvider<DispatchConfig>,
) -> Result<DispatchConfig, ConfigProviderError> {
    let config = provider.load()?;
    config.validate()?;
    Ok(config)
}

#[derive(Error, Debug)]
pub enum ConfigProviderError {
    #[error("Could not load config file. {message}")]
    Load { message: String },

    #[error("Invalid configuration. {message}")]
    Invalid { message: String },
}

impl ConfigProviderError {
    #[inline]
    pub(crate) fn load_error(msg: impl Into<String>) -> Self {
        Self::Load {
            message: msg.into(),
        }
    }

    #[inline]
    pub(crate) fn invalid_error(msg: impl Into<String>) -> Self {
        Self::Invalid {
            message: msg.into(),
        }
    }
}
