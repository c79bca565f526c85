//! Orchestrator state persisted as one JSON document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use domain::{PersistedState, StateStore, StoreError};
use tracing::debug;

use crate::file::{read_optional, write_atomically};

pub const STATE_FILE_NAME: &str = "state.json";

#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A store writing `state.json` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(STATE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load(&self) -> Result<Option<PersistedState>, StoreError> {
        let Some(contents) = read_optional(&self.path).await? else {
            debug!(path = %self.path.display(), "no saved state");
            return Ok(None);
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| StoreError::Parse {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        let rendered = serde_json::to_string_pretty(state).map_err(|e| StoreError::Serialize {
            message: e.to_string(),
        })?;
        write_atomically(&self.path, &rendered).await?;
        debug!(
            path = %self.path.display(),
            rate_windows = state.rate_windows.len(),
            usage_events = state.usage_events.len(),
            "state saved"
        );
        Ok(())
    }
}
