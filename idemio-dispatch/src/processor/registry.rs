use crate::config::{DispatchConfig, WorkerPoolConfig};
use crate::error::DispatchError;
use crate::logger::{self, Component};
use crate::pool::WorkerPool;
use crate::processor::{Processor, SharedProcessor};
use dashmap::{DashMap, Entry};
use fnv::FnvBuildHasher;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Destination '{name}' not found.")]
    MissingDestination { name: String },

    #[error("Destination '{name}' already exists.")]
    ConflictingDestination { name: String },

    #[error("Could not start worker pool for destination '{name}'. {message}")]
    PoolUnavailable { name: String, message: String },
}

impl RegistryError {
    #[inline]
    pub(crate) fn missing_destination(name: impl Into<String>) -> Self {
        Self::MissingDestination { name: name.into() }
    }

    #[inline]
    pub(crate) fn conflicting_destination(name: impl Into<String>) -> Self {
        Self::ConflictingDestination { name: name.into() }
    }

    #[inline]
    pub(crate) fn pool_unavailable(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PoolUnavailable {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// A named processor, optionally bound to its own worker pool.
#[derive(Clone)]
pub struct Destination {
    name: String,
    processor: SharedProcessor,
    pool: Option<WorkerPool>,
}

impl Destination {
    pub fn new(name: impl Into<String>, processor: SharedProcessor) -> Self {
        Self {
            name: name.into(),
            processor,
            pool: None,
        }
    }

    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn processor(&self) -> &SharedProcessor {
        &self.processor
    }

    /// The dedicated pool, if any. Destinations without one run on the caller's default pool.
    pub fn pool(&self) -> Option<&WorkerPool> {
        self.pool.as_ref()
    }
}

impl Debug for Destination {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destination")
            .field("name", &self.name)
            .field("processor", &self.processor.name())
            .field("pool", &self.pool)
            .finish()
    }
}

/// Maps destination names to destinations.
pub trait DestinationResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<Destination, DispatchError>;
}

/// A thread-safe destination registry.
///
/// Destinations can be registered while dispatches are in progress. A registry built with
/// [`DestinationRegistry::from_config`] gives every destination listed in the configuration a
/// dedicated worker pool when it is registered.
pub struct DestinationRegistry {
    destinations: DashMap<String, Destination, FnvBuildHasher>,
    pools: HashMap<String, WorkerPoolConfig>,
}

impl DestinationRegistry {
    pub fn new() -> Self {
        Self {
            destinations: DashMap::with_hasher(FnvBuildHasher::default()),
            pools: HashMap::new(),
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            destinations: DashMap::with_hasher(FnvBuildHasher::default()),
            pools: config.destinations.clone(),
        }
    }

    /// Registers `processor` under `name`.
    ///
    /// If the registry was built from a configuration that lists `name`, a dedicated pool is
    /// started on the current tokio runtime.
    pub fn register(
        &self,
        name: impl Into<String>,
        processor: impl Processor + 'static,
    ) -> Result<(), RegistryError> {
        self.register_shared(name, Arc::new(processor))
    }

    pub fn register_shared(
        &self,
        name: impl Into<String>,
        processor: SharedProcessor,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let mut destination = Destination::new(name.clone(), processor);
        if let Some(config) = self.pools.get(&name) {
            let runtime = Handle::try_current()
                .map_err(|e| RegistryError::pool_unavailable(&name, e.to_string()))?;
            destination = destination.with_pool(WorkerPool::with_handle(config, runtime));
        }
        self.insert(destination)
    }

    /// Registers `processor` under `name`, running on `pool` instead of the default pool.
    pub fn register_with_pool(
        &self,
        name: impl Into<String>,
        processor: impl Processor + 'static,
        pool: WorkerPool,
    ) -> Result<(), RegistryError> {
        self.insert(Destination::new(name, Arc::new(processor)).with_pool(pool))
    }

    pub fn find(&self, name: &str) -> Result<Destination, RegistryError> {
        match self.destinations.get(name) {
            None => Err(RegistryError::missing_destination(name)),
            Some(destination) => Ok(destination.value().clone()),
        }
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Shuts down every dedicated destination pool and waits for them to drain.
    pub async fn shutdown(&self) {
        let pools: Vec<WorkerPool> = self
            .destinations
            .iter()
            .filter_map(|entry| entry.value().pool().cloned())
            .collect();
        for pool in &pools {
            pool.shutdown();
        }
        for pool in &pools {
            pool.drain().await;
        }
    }

    fn insert(&self, destination: Destination) -> Result<(), RegistryError> {
        match self.destinations.entry(destination.name().to_string()) {
            Entry::Occupied(entry) => Err(RegistryError::conflicting_destination(entry.key())),
            Entry::Vacant(entry) => {
                logger::debug(
                    Component::Registry,
                    None,
                    format!("Registered destination '{}'", destination.name()),
                );
                entry.insert(destination);
                Ok(())
            }
        }
    }
}

impl Default for DestinationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DestinationResolver for DestinationRegistry {
    fn resolve(&self, name: &str) -> Result<Destination, DispatchError> {
        self.find(name).map_err(|_| {
            logger::warn(
                Component::Registry,
                None,
                format!("No destination registered under '{}'", name),
            );
            DispatchError::unknown_destination(name)
        })
    }
}
