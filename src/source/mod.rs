//! Collaborators the scheduler reads from: the list of monitored
//! applications and the attack-event search backend.

pub mod file_repo;
pub mod search;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use crate::core::{AlarmBatch, Application};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to list applications: {0}")]
    ListFailed(String),

    #[error("attack event query for app {app_id} failed: {reason}")]
    QueryFailed { app_id: String, reason: String },

    #[error("failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },
}

/// A half-open time range `[from_ms, until_ms)` in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from_ms: i64,
    pub until_ms: i64,
}

impl TimeWindow {
    pub fn new(from_ms: i64, until_ms: i64) -> Self {
        Self { from_ms, until_ms }
    }

    pub fn contains(&self, ts_ms: i64) -> bool {
        ts_ms >= self.from_ms && ts_ms < self.until_ms
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from_ms, self.until_ms)
    }
}

/// Read access to the monitored applications.
#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    /// Returns a fresh snapshot of every application.
    async fn list_applications(&self) -> Result<Vec<Application>, SourceError>;

    async fn find_application(&self, id: &str) -> Result<Option<Application>, SourceError> {
        Ok(self
            .list_applications()
            .await?
            .into_iter()
            .find(|app| app.id == id))
    }
}

/// Counts and samples the attack events recorded for an application.
#[async_trait]
pub trait AlarmSource: Send + Sync {
    /// Returns the number of events inside `window` and one page of them,
    /// newest first. Pages start at 1.
    async fn query_attack_events(
        &self,
        app_id: &str,
        window: TimeWindow,
        page: u32,
        page_size: u32,
    ) -> Result<AlarmBatch, SourceError>;
}
