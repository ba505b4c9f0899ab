use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use roster_domain::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One in-flight processing job.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    /// Only meaningful once the task completed.
    pub result: Vec<User>,
    pub error_message: String,
    pub created_at: Instant,
    pub expires_at: Instant,
}

#[derive(Debug, Error)]
#[error("task {0} not found")]
pub struct TaskNotFound(pub String);

/// In-memory task lifecycle store with TTL eviction.
#[derive(Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<String, Task>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, task_id: &str, ttl: Duration) {
        let now = Instant::now();
        let mut tasks = self.tasks.write();
        tasks.insert(
            task_id.to_string(),
            Task {
                id: task_id.to_string(),
                status: TaskStatus::Pending,
                result: Vec::new(),
                error_message: String::new(),
                created_at: now,
                expires_at: now + ttl,
            },
        );
    }

    pub fn get(&self, task_id: &str) -> Result<Task, TaskNotFound> {
        self.tasks
            .read()
            .get(task_id)
            .cloned()
            .ok_or_else(|| TaskNotFound(task_id.to_string()))
    }

    pub fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<(), TaskNotFound> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskNotFound(task_id.to_string()))?;
        task.status = status;
        Ok(())
    }

    /// Stores the result and transitions the task to `completed`. A warning
    /// (e.g. partial enrichment) is recorded alongside without failing the
    /// task.
    pub fn set_result(
        &self,
        task_id: &str,
        result: Vec<User>,
        warning: Option<String>,
    ) -> Result<(), TaskNotFound> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskNotFound(task_id.to_string()))?;
        task.status = TaskStatus::Completed;
        task.result = result;
        task.error_message = warning.unwrap_or_default();
        Ok(())
    }

    pub fn set_error(&self, task_id: &str, message: String) -> Result<(), TaskNotFound> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskNotFound(task_id.to_string()))?;
        task.status = TaskStatus::Failed;
        task.error_message = message;
        Ok(())
    }

    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|_, task| now < task.expires_at);
        let removed = before - tasks.len();
        if removed > 0 {
            debug!(removed, "removed expired tasks");
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    pub fn spawn_cleanup(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("task cleanup loop stopping");
                        return;
                    }
                    _ = ticker.tick() => {}
                }
                let Some(store) = store.upgrade() else { return };
                store.cleanup_expired();
            }
        })
    }
}
