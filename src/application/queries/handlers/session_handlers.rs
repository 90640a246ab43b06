//! Session Query Handlers

use std::sync::Arc;

use crate::application::error::ApplicationError;
use crate::application::ports::{InferencePort, SessionStatus};
use crate::application::queries::GetSessionStatus;

/// GetSessionStatus Handler
pub struct SessionStatusHandler {
    inference: Arc<dyn InferencePort>,
}

impl SessionStatusHandler {
    pub fn new(inference: Arc<dyn InferencePort>) -> Self {
        Self { inference }
    }

    pub fn handle(&self, _query: GetSessionStatus) -> Result<SessionStatus, ApplicationError> {
        Ok(self.inference.status())
    }
}
