//! Inference Command Handlers

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::application::commands::{DisposeSessionCommand, DisposeSessionResponse, PromptCommand};
use crate::application::error::ApplicationError;
use crate::application::ports::{ExecuteOutcome, InferencePort};

/// Prompt Handler - 单次生成
pub struct PromptHandler {
    inference: Arc<dyn InferencePort>,
}

impl PromptHandler {
    pub fn new(inference: Arc<dyn InferencePort>) -> Self {
        Self { inference }
    }

    pub async fn handle(
        &self,
        cmd: PromptCommand,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
        cancel: CancellationToken,
    ) -> Result<ExecuteOutcome, ApplicationError> {
        let request = cmd.into_request()?;
        let session_id = request.session_id.clone();
        let model_id = request.config.model_id.clone();

        let outcome = self.inference.execute(request, on_chunk, cancel).await?;

        tracing::info!(
            session_id = %session_id,
            model_id = %model_id,
            reused = outcome.reused,
            tracked = outcome.history_hash.is_some(),
            "Prompt completed"
        );
        Ok(outcome)
    }
}

/// DisposeSession Handler - 释放逻辑会话
pub struct DisposeSessionHandler {
    inference: Arc<dyn InferencePort>,
}

impl DisposeSessionHandler {
    pub fn new(inference: Arc<dyn InferencePort>) -> Self {
        Self { inference }
    }

    pub async fn handle(
        &self,
        cmd: DisposeSessionCommand,
    ) -> Result<DisposeSessionResponse, ApplicationError> {
        if cmd.session_id.trim().is_empty() {
            return Err(ApplicationError::validation("sessionId cannot be empty"));
        }
        let released = self.inference.dispose(&cmd.session_id).await;
        Ok(DisposeSessionResponse { released })
    }
}
