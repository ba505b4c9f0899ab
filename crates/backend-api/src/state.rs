use std::sync::Arc;

use roster_config::AppConfig;

use crate::process::ChatProcessor;
use crate::tasks::TaskStore;

/// Shared application state for the task service.
#[derive(Clone)]
pub struct AppState {
    config: Arc<AppConfig>,
    tasks: Arc<TaskStore>,
    processor: Arc<dyn ChatProcessor>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        tasks: Arc<TaskStore>,
        processor: Arc<dyn ChatProcessor>,
    ) -> Self {
        Self {
            config,
            tasks,
            processor,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    pub fn processor(&self) -> Arc<dyn ChatProcessor> {
        self.processor.clone()
    }
}
