//! Task Query Handlers

use std::sync::Arc;

use crate::application::error::ApplicationError;
use crate::application::ports::TaskQueuePort;
use crate::application::queries::GetCurrentTask;
use crate::domain::task::TaskSnapshot;

/// GetCurrentTask Handler
pub struct CurrentTaskHandler {
    task_queue: Arc<dyn TaskQueuePort>,
}

impl CurrentTaskHandler {
    pub fn new(task_queue: Arc<dyn TaskQueuePort>) -> Self {
        Self { task_queue }
    }

    pub fn handle(&self, _query: GetCurrentTask) -> Result<Option<TaskSnapshot>, ApplicationError> {
        Ok(self.task_queue.current_task())
    }
}
