//! In-memory repositories and alarm sources for tests.

use crate::core::{AlarmBatch, Application};
use crate::source::{AlarmSource, ApplicationRepository, SourceError, TimeWindow};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// A repository serving a fixed, replaceable list of applications.
#[derive(Default)]
pub struct StaticRepository {
    apps: Mutex<Vec<Application>>,
    failing: AtomicBool,
    list_calls: AtomicUsize,
}

impl StaticRepository {
    pub fn new(apps: Vec<Application>) -> Self {
        Self {
            apps: Mutex::new(apps),
            ..Default::default()
        }
    }

    pub fn set_apps(&self, apps: Vec<Application>) {
        *self.apps.lock().unwrap() = apps;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApplicationRepository for StaticRepository {
    async fn list_applications(&self) -> Result<Vec<Application>, SourceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::ListFailed("repository unavailable".to_string()));
        }
        Ok(self.apps.lock().unwrap().clone())
    }
}

/// An alarm source answering from per-application canned batches.
///
/// Applications without a batch get an empty one.
#[derive(Default)]
pub struct ScriptedAlarmSource {
    batches: Mutex<HashMap<String, AlarmBatch>>,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    queries: Mutex<Vec<(String, TimeWindow)>>,
}

impl ScriptedAlarmSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch(self, app_id: &str, batch: AlarmBatch) -> Self {
        self.set_batch(app_id, batch);
        self
    }

    pub fn set_batch(&self, app_id: &str, batch: AlarmBatch) {
        self.batches.lock().unwrap().insert(app_id.to_string(), batch);
    }

    /// Makes every query for `app_id` fail with `QueryFailed`.
    pub fn fail_for(self, app_id: &str) -> Self {
        self.failing.lock().unwrap().insert(app_id.to_string());
        self
    }

    /// Makes every query for `app_id` panic.
    pub fn panic_for(self, app_id: &str) -> Self {
        self.panicking.lock().unwrap().insert(app_id.to_string());
        self
    }

    pub fn clear_panics(&self) {
        self.panicking.lock().unwrap().clear();
    }

    /// Every `(app_id, window)` queried so far, in call order.
    pub fn queries(&self) -> Vec<(String, TimeWindow)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlarmSource for ScriptedAlarmSource {
    async fn query_attack_events(
        &self,
        app_id: &str,
        window: TimeWindow,
        _page: u32,
        _page_size: u32,
    ) -> Result<AlarmBatch, SourceError> {
        self.queries
            .lock()
            .unwrap()
            .push((app_id.to_string(), window));
        if self.panicking.lock().unwrap().contains(app_id) {
            panic!("scripted panic for {app_id}");
        }
        if self.failing.lock().unwrap().contains(app_id) {
            return Err(SourceError::QueryFailed {
                app_id: app_id.to_string(),
                reason: "backend unavailable".to_string(),
            });
        }
        Ok(self
            .batches
            .lock()
            .unwrap()
            .get(app_id)
            .cloned()
            .unwrap_or_default())
    }
}
