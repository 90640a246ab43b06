//! Model Command Handlers
//!
//! 安装 / 更新 / 卸载都提交到任务队列串行执行，handler 只做前置校验

use futures_util::FutureExt;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

use crate::application::commands::{InstallModel, UninstallModel, UpdateModel};
use crate::application::error::ApplicationError;
use crate::application::ports::{
    ModelRepositoryPort, RepositoryError, TaskContext, TaskError, TaskQueuePort, TaskTicket,
};
use crate::domain::model::{validate_model_id, ModelManifest, StatsDelta};
use crate::domain::task::TaskType;

/// 逐个导入资源并上报进度
///
/// 源目录中缺失、但资源目录里已经存在的文件视为与其他模型共享，直接复用
async fn import_assets(
    repository: &dyn ModelRepositoryPort,
    ctx: &TaskContext,
    manifest: &ModelManifest,
    source_dir: &Path,
) -> Result<(), TaskError> {
    let total = manifest.assets.len().max(1) as f64;
    ctx.set_progress(Some(0.0));

    for (index, asset) in manifest.assets.iter().enumerate() {
        ctx.set_state(json!({ "modelId": manifest.id, "asset": asset.path }));

        let source = source_dir.join(&asset.path);
        let target = repository.asset_path(&asset.path)?;
        if tokio::fs::metadata(&source).await.is_ok() {
            repository.import_asset(&source, &asset.path).await?;
        } else if tokio::fs::metadata(&target).await.is_ok() {
            tracing::debug!(task_id = %ctx.id(), asset = %asset.path, "Reusing stored asset");
        } else {
            return Err(TaskError::Failed(format!(
                "asset not found: {}",
                source.display()
            )));
        }

        ctx.set_progress(Some((index + 1) as f64 / total));
    }
    Ok(())
}

async fn commit_manifest(
    repository: &dyn ModelRepositoryPort,
    manifest: &ModelManifest,
) -> Result<(), TaskError> {
    repository.write_manifest(manifest).await?;
    repository
        .update_stats(
            &manifest.id,
            StatsDelta::updated_at(chrono::Utc::now().timestamp_millis()),
        )
        .await?;
    Ok(())
}

fn validate_manifest(manifest: &ModelManifest) -> Result<(), ApplicationError> {
    manifest.validate().map_err(ApplicationError::validation)
}

async fn ensure_installed(
    repository: &dyn ModelRepositoryPort,
    model_id: &str,
) -> Result<(), ApplicationError> {
    match repository.manifest(model_id).await {
        Ok(_) => Ok(()),
        Err(RepositoryError::NotFound(id)) => Err(ApplicationError::not_found("Model", id)),
        Err(e) => Err(e.into()),
    }
}

/// InstallModel Handler
pub struct InstallModelHandler {
    repository: Arc<dyn ModelRepositoryPort>,
    task_queue: Arc<dyn TaskQueuePort>,
}

impl InstallModelHandler {
    pub fn new(
        repository: Arc<dyn ModelRepositoryPort>,
        task_queue: Arc<dyn TaskQueuePort>,
    ) -> Self {
        Self {
            repository,
            task_queue,
        }
    }

    pub async fn submit(&self, cmd: InstallModel) -> Result<TaskTicket, ApplicationError> {
        validate_manifest(&cmd.manifest)?;
        if ensure_installed(self.repository.as_ref(), &cmd.manifest.id)
            .await
            .is_ok()
        {
            return Err(ApplicationError::validation(format!(
                "model already installed: {}",
                cmd.manifest.id
            )));
        }

        let repository = self.repository.clone();
        let InstallModel {
            manifest,
            source_dir,
        } = cmd;
        tracing::info!(model_id = %manifest.id, version = %manifest.version, "Install queued");

        Ok(self.task_queue.submit(
            TaskType::Install,
            Box::new(move |ctx: TaskContext| {
                async move {
                    import_assets(repository.as_ref(), &ctx, &manifest, &source_dir).await?;
                    commit_manifest(repository.as_ref(), &manifest).await?;
                    Ok::<Value, TaskError>(json!({
                        "modelId": manifest.id,
                        "version": manifest.version,
                    }))
                }
                .boxed()
            }),
        ))
    }
}

/// UpdateModel Handler
pub struct UpdateModelHandler {
    repository: Arc<dyn ModelRepositoryPort>,
    task_queue: Arc<dyn TaskQueuePort>,
}

impl UpdateModelHandler {
    pub fn new(
        repository: Arc<dyn ModelRepositoryPort>,
        task_queue: Arc<dyn TaskQueuePort>,
    ) -> Self {
        Self {
            repository,
            task_queue,
        }
    }

    pub async fn submit(&self, cmd: UpdateModel) -> Result<TaskTicket, ApplicationError> {
        validate_manifest(&cmd.manifest)?;
        ensure_installed(self.repository.as_ref(), &cmd.manifest.id).await?;

        let repository = self.repository.clone();
        let UpdateModel {
            manifest,
            source_dir,
        } = cmd;
        tracing::info!(model_id = %manifest.id, version = %manifest.version, "Update queued");

        Ok(self.task_queue.submit(
            TaskType::Update,
            Box::new(move |ctx: TaskContext| {
                async move {
                    import_assets(repository.as_ref(), &ctx, &manifest, &source_dir).await?;
                    commit_manifest(repository.as_ref(), &manifest).await?;
                    let report = repository.remove_unused_assets().await?;
                    Ok::<Value, TaskError>(json!({
                        "modelId": manifest.id,
                        "version": manifest.version,
                        "removedAssets": report.removed.len(),
                    }))
                }
                .boxed()
            }),
        ))
    }
}

/// UninstallModel Handler
pub struct UninstallModelHandler {
    repository: Arc<dyn ModelRepositoryPort>,
    task_queue: Arc<dyn TaskQueuePort>,
}

impl UninstallModelHandler {
    pub fn new(
        repository: Arc<dyn ModelRepositoryPort>,
        task_queue: Arc<dyn TaskQueuePort>,
    ) -> Self {
        Self {
            repository,
            task_queue,
        }
    }

    pub async fn submit(&self, cmd: UninstallModel) -> Result<TaskTicket, ApplicationError> {
        validate_model_id(&cmd.model_id)
            .map_err(|e| ApplicationError::validation(format!("{}: {}", e, cmd.model_id)))?;
        ensure_installed(self.repository.as_ref(), &cmd.model_id).await?;

        let repository = self.repository.clone();
        let model_id = cmd.model_id;
        tracing::info!(model_id = %model_id, "Uninstall queued");

        Ok(self.task_queue.submit(
            TaskType::Uninstall,
            Box::new(move |ctx: TaskContext| {
                async move {
                    ctx.set_state(json!({ "modelId": model_id }));
                    repository.remove_model(&model_id).await?;
                    ctx.set_progress(Some(0.5));
                    let report = repository.remove_unused_assets().await?;
                    ctx.set_progress(Some(1.0));
                    Ok::<Value, TaskError>(json!({
                        "modelId": model_id,
                        "removedAssets": report.removed.len(),
                    }))
                }
                .boxed()
            }),
        ))
    }
}
