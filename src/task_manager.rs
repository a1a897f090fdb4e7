//! Tracks the long-lived tasks of the service and joins them on shutdown.
use futures::future::join_all;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

type NamedHandle = (&'static str, JoinHandle<()>);

/// Spawns named tasks and waits for all of them during shutdown.
///
/// Clones share the same task list and the same shutdown receiver.
#[derive(Clone, Debug)]
pub struct TaskManager {
    handles: Arc<Mutex<Vec<NamedHandle>>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskManager {
    pub fn new(shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_rx,
        }
    }

    fn handles(&self) -> MutexGuard<'_, Vec<NamedHandle>> {
        // Pushes and drains are single calls, so a poisoned list is still whole.
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(task_name = name, "Spawning task");
        let handle = tokio::spawn(future);
        self.handles().push((name, handle));
    }

    pub fn get_shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Names of the tasks spawned so far.
    pub fn task_names(&self) -> Vec<&'static str> {
        self.handles().iter().map(|(name, _)| *name).collect()
    }

    /// Waits for every spawned task to finish and returns the names of the
    /// ones that panicked.
    pub async fn shutdown(self) -> Vec<&'static str> {
        let handles: Vec<NamedHandle> = self.handles().drain(..).collect();
        info!(tasks = handles.len(), "Waiting for tasks to complete");

        let (names, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let results = join_all(handles).await;

        let panicked: Vec<&'static str> = names
            .into_iter()
            .zip(results)
            .filter_map(|(task_name, result)| match result {
                Ok(()) => {
                    debug!(task_name, "Task shut down gracefully.");
                    None
                }
                Err(e) => {
                    error!(task_name, error = %e, "Task failed during shutdown.");
                    Some(task_name)
                }
            })
            .collect();

        if panicked.is_empty() {
            info!("All tasks shut down gracefully.");
        } else {
            error!(tasks = ?panicked, "{} tasks did not shut down cleanly", panicked.len());
        }
        panicked
    }
}
