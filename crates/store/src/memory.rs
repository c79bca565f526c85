//! A `ConfigStore` held entirely in memory.

use std::collections::BTreeMap;

use async_trait::async_trait;
use domain::{ConfigStore, StoreError, WorkerConfig, WorkerName};
use parking_lot::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    workers: RwLock<BTreeMap<WorkerName, WorkerConfig>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(workers: impl IntoIterator<Item = WorkerConfig>) -> Self {
        Self {
            workers: RwLock::new(workers.into_iter().map(|c| (c.name.clone(), c)).collect()),
        }
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn get_worker_config(&self, name: &WorkerName) -> Result<Option<WorkerConfig>, StoreError> {
        Ok(self.workers.read().get(name).cloned())
    }

    async fn set_worker_config(&self, name: &WorkerName, config: &WorkerConfig) -> Result<(), StoreError> {
        if &config.name != name {
            return Err(StoreError::InvalidEntry {
                key: name.to_string(),
                message: format!("configuration is for worker '{}'", config.name),
            });
        }
        self.workers.write().insert(name.clone(), config.clone());
        Ok(())
    }

    async fn get_all(&self) -> Result<BTreeMap<WorkerName, WorkerConfig>, StoreError> {
        Ok(self.workers.read().clone())
    }
}
