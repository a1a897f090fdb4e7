//! Applications read from a YAML file.

use crate::core::Application;
use crate::source::{ApplicationRepository, SourceError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Loads the application list from disk on every call, so edits to the file
/// are picked up by the next scheduler tick.
#[derive(Debug, Clone)]
pub struct FileApplicationRepository {
    path: PathBuf,
}

impl FileApplicationRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ApplicationRepository for FileApplicationRepository {
    async fn list_applications(&self) -> Result<Vec<Application>, SourceError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SourceError::ListFailed(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let apps: Vec<Application> =
            serde_yml::from_str(&content).map_err(|e| SourceError::Decode {
                what: self.path.display().to_string(),
                reason: e.to_string(),
            })?;
        debug!(path = %self.path.display(), count = apps.len(), "Loaded applications");
        Ok(apps)
    }
}
