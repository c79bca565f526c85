//! Worker configuration kept in the `[workers]` table of the TOML settings
//! file.
//!
//! Reads parse the whole document; writes rewrite only the `[workers]` table
//! and keep every other section as it was. Keys in the file may use `-` or
//! `_`; both resolve to the same worker.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use domain::{ConfigStore, Settings, StoreError, WorkerConfig, WorkerName};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::file::{read_optional, write_atomically};

const WORKERS: &str = "workers";

#[derive(Debug)]
pub struct TomlConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TomlConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse_error(&self, message: impl ToString) -> StoreError {
        StoreError::Parse {
            path: self.path.display().to_string(),
            message: message.to_string(),
        }
    }

    /// The full settings document. A missing file yields the defaults.
    pub async fn load_settings(&self) -> Result<Settings, StoreError> {
        match read_optional(&self.path).await? {
            Some(contents) => toml::from_str(&contents).map_err(|e| self.parse_error(e)),
            None => {
                debug!(path = %self.path.display(), "settings file absent, using defaults");
                Ok(Settings::default())
            }
        }
    }

    async fn read_document(&self) -> Result<toml::Table, StoreError> {
        match read_optional(&self.path).await? {
            Some(contents) => toml::from_str::<toml::Table>(&contents).map_err(|e| self.parse_error(e)),
            None => Ok(toml::Table::new()),
        }
    }
}

fn resolve(settings: Settings) -> Result<BTreeMap<WorkerName, WorkerConfig>, StoreError> {
    settings
        .workers
        .iter()
        .map(|(key, worker)| {
            let name = WorkerName::new(key).ok_or_else(|| StoreError::InvalidEntry {
                key: key.clone(),
                message: "not a valid worker name".to_string(),
            })?;
            Ok((name.clone(), WorkerConfig::from_settings(name, worker)))
        })
        .collect()
}

#[async_trait]
impl ConfigStore for TomlConfigStore {
    async fn get_worker_config(&self, name: &WorkerName) -> Result<Option<WorkerConfig>, StoreError> {
        Ok(resolve(self.load_settings().await?)?.remove(name))
    }

    async fn set_worker_config(&self, name: &WorkerName, config: &WorkerConfig) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.read_document().await?;

        let entry = toml::Value::try_from(config.to_settings()).map_err(|e| StoreError::Serialize {
            message: e.to_string(),
        })?;

        let workers = document
            .entry(WORKERS)
            .or_insert(toml::Value::Table(toml::Table::new()));
        let toml::Value::Table(workers) = workers else {
            return Err(self.parse_error("'workers' is not a table"));
        };
        // Drop spellings that normalize to the same worker, e.g. `seo-analyzer`.
        workers.retain(|key, _| WorkerName::new(key).as_ref() != Some(name));
        workers.insert(name.to_string(), entry);

        let rendered = toml::to_string(&document).map_err(|e| StoreError::Serialize {
            message: e.to_string(),
        })?;
        write_atomically(&self.path, &rendered).await?;
        info!(worker = %name, path = %self.path.display(), "worker configuration written");
        Ok(())
    }

    async fn get_all(&self) -> Result<BTreeMap<WorkerName, WorkerConfig>, StoreError> {
        resolve(self.load_settings().await?)
    }
}
