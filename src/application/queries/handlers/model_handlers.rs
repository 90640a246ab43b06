//! Model Query Handlers

use std::sync::Arc;

use crate::application::error::ApplicationError;
use crate::application::ports::ModelRepositoryPort;
use crate::application::queries::{GetModelStats, ListModels};
use crate::domain::model::{validate_model_id, ModelManifest, ModelStats};

/// ListModels Handler
pub struct ListModelsHandler {
    repository: Arc<dyn ModelRepositoryPort>,
}

impl ListModelsHandler {
    pub fn new(repository: Arc<dyn ModelRepositoryPort>) -> Self {
        Self { repository }
    }

    pub async fn handle(&self, _query: ListModels) -> Result<Vec<ModelManifest>, ApplicationError> {
        Ok(self.repository.installed_models().await?)
    }
}

/// GetModelStats Handler
pub struct ModelStatsHandler {
    repository: Arc<dyn ModelRepositoryPort>,
}

impl ModelStatsHandler {
    pub fn new(repository: Arc<dyn ModelRepositoryPort>) -> Self {
        Self { repository }
    }

    pub async fn handle(&self, query: GetModelStats) -> Result<ModelStats, ApplicationError> {
        validate_model_id(&query.model_id)
            .map_err(|e| ApplicationError::validation(format!("{}: {}", e, query.model_id)))?;
        // 未安装的模型没有统计信息
        self.repository.manifest(&query.model_id).await?;
        Ok(self.repository.stats(&query.model_id).await?)
    }
}
