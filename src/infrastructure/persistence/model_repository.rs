//! File Model Repository
//!
//! - `<models_dir>/<model id>/manifest.json`：临时文件 + rename 原子写入
//! - `<models_dir>/<model id>/stats.json`：文件锁保护的读-合并-写
//! - `<assets_dir>/...`：资源文件，多个清单可共享

use async_trait::async_trait;
use std::collections::HashSet;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tokio::fs;

use super::file_lock::FileLock;
use crate::application::ports::{GcReport, ModelFiles, ModelRepositoryPort, RepositoryError};
use crate::domain::model::{
    validate_asset_path, validate_model_id, ModelManifest, ModelStats, StatsDelta,
};

const MANIFEST_FILE: &str = "manifest.json";
const STATS_FILE: &str = "stats.json";

/// 清单读取失败时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanMode {
    /// 跳过并记录警告（列表展示）
    Lenient,
    /// 直接返回错误（资源回收）
    Strict,
}

/// 文件系统模型仓库
pub struct FileModelRepository {
    models_dir: PathBuf,
    assets_dir: PathBuf,
}

impl FileModelRepository {
    pub fn new(models_dir: impl AsRef<Path>, assets_dir: impl AsRef<Path>) -> Self {
        Self {
            models_dir: models_dir.as_ref().to_path_buf(),
            assets_dir: assets_dir.as_ref().to_path_buf(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    fn model_dir(&self, model_id: &str) -> Result<PathBuf, RepositoryError> {
        validate_model_id(model_id)
            .map_err(|e| RepositoryError::InvalidPath(format!("{}: {}", e, model_id)))?;
        Ok(self.models_dir.join(model_id))
    }

    async fn read_manifest_file(path: &Path) -> Result<Option<ModelManifest>, RepositoryError> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RepositoryError::IoError(e.to_string())),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| RepositoryError::SerializationError(e.to_string()))
    }

    /// 锁内读取，避免读到写了一半的内容
    fn read_stats_blocking(path: &Path) -> Result<ModelStats, RepositoryError> {
        if !path.exists() {
            return Ok(ModelStats::default());
        }
        let lock =
            FileLock::acquire_blocking(path).map_err(|e| RepositoryError::Lock(e.to_string()))?;
        let mut file = lock
            .file()
            .ok_or_else(|| RepositoryError::Lock(format!("lock released: {}", path.display())))?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| RepositoryError::IoError(e.to_string()))?;
        if content.trim().is_empty() {
            return Ok(ModelStats::default());
        }
        serde_json::from_str(&content)
            .map_err(|e| RepositoryError::SerializationError(e.to_string()))
    }

    /// 锁内读-合并-写，在阻塞线程上执行
    fn merge_stats_blocking(path: &Path, delta: &StatsDelta) -> Result<ModelStats, RepositoryError> {
        let lock =
            FileLock::acquire_blocking(path).map_err(|e| RepositoryError::Lock(e.to_string()))?;
        let mut file = lock
            .file()
            .ok_or_else(|| RepositoryError::Lock(format!("lock released: {}", path.display())))?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| RepositoryError::IoError(e.to_string()))?;

        let mut stats = if content.trim().is_empty() {
            ModelStats::default()
        } else {
            serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Resetting corrupt stats file");
                ModelStats::default()
            })
        };
        stats.merge(delta);

        let json = serde_json::to_vec_pretty(&stats)
            .map_err(|e| RepositoryError::SerializationError(e.to_string()))?;
        file.set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| file.write_all(&json))
            .and_then(|_| file.flush())
            .map_err(|e| RepositoryError::IoError(e.to_string()))?;

        Ok(stats)
    }

    /// 遍历所有模型目录下的清单
    async fn scan_manifests(&self, mode: ScanMode) -> Result<Vec<ModelManifest>, RepositoryError> {
        let mut entries = match fs::read_dir(&self.models_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RepositoryError::IoError(e.to_string())),
        };

        let mut manifests = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RepositoryError::IoError(e.to_string()))?
        {
            let path = entry.path().join(MANIFEST_FILE);
            match Self::read_manifest_file(&path).await {
                Ok(Some(manifest)) => manifests.push(manifest),
                Ok(None) => {}
                Err(e) if mode == ScanMode::Lenient => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable manifest");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Unreadable manifest");
                    return Err(e);
                }
            }
        }

        manifests.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(manifests)
    }

    /// 资源目录下的所有文件与目录（不含根目录）
    async fn walk_assets(&self) -> Result<(Vec<PathBuf>, Vec<PathBuf>), RepositoryError> {
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        let mut pending = vec![self.assets_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(RepositoryError::IoError(e.to_string())),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| RepositoryError::IoError(e.to_string()))?
            {
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| RepositoryError::IoError(e.to_string()))?;
                if file_type.is_dir() {
                    dirs.push(entry.path());
                    pending.push(entry.path());
                } else {
                    files.push(entry.path());
                }
            }
        }

        Ok((files, dirs))
    }
}

#[async_trait]
impl ModelRepositoryPort for FileModelRepository {
    async fn manifest(&self, model_id: &str) -> Result<ModelManifest, RepositoryError> {
        let path = self.model_dir(model_id)?.join(MANIFEST_FILE);
        Self::read_manifest_file(&path)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(model_id.to_string()))
    }

    async fn write_manifest(&self, manifest: &ModelManifest) -> Result<(), RepositoryError> {
        manifest
            .validate()
            .map_err(RepositoryError::InvalidManifest)?;
        let dir = self.model_dir(&manifest.id)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| RepositoryError::IoError(e.to_string()))?;

        let json = serde_json::to_vec_pretty(manifest)
            .map_err(|e| RepositoryError::SerializationError(e.to_string()))?;
        let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
        fs::write(&tmp, json)
            .await
            .map_err(|e| RepositoryError::IoError(e.to_string()))?;
        fs::rename(&tmp, dir.join(MANIFEST_FILE))
            .await
            .map_err(|e| RepositoryError::IoError(e.to_string()))?;

        tracing::info!(model_id = %manifest.id, version = %manifest.version, "Manifest written");
        Ok(())
    }

    async fn remove_model(&self, model_id: &str) -> Result<(), RepositoryError> {
        let dir = self.model_dir(model_id)?;
        if fs::metadata(dir.join(MANIFEST_FILE)).await.is_err() {
            return Err(RepositoryError::NotFound(model_id.to_string()));
        }

        fs::remove_dir_all(&dir)
            .await
            .map_err(|e| RepositoryError::IoError(e.to_string()))?;

        tracing::info!(model_id = %model_id, "Model removed");
        Ok(())
    }

    async fn installed_models(&self) -> Result<Vec<ModelManifest>, RepositoryError> {
        self.scan_manifests(ScanMode::Lenient).await
    }

    async fn stats(&self, model_id: &str) -> Result<ModelStats, RepositoryError> {
        let path = self.model_dir(model_id)?.join(STATS_FILE);
        tokio::task::spawn_blocking(move || Self::read_stats_blocking(&path))
            .await
            .map_err(|e| RepositoryError::Lock(e.to_string()))?
    }

    async fn update_stats(
        &self,
        model_id: &str,
        delta: StatsDelta,
    ) -> Result<ModelStats, RepositoryError> {
        let path = self.model_dir(model_id)?.join(STATS_FILE);
        let stats =
            tokio::task::spawn_blocking(move || Self::merge_stats_blocking(&path, &delta))
                .await
                .map_err(|e| RepositoryError::Lock(e.to_string()))??;

        tracing::debug!(model_id = %model_id, stats = ?stats, "Stats updated");
        Ok(stats)
    }

    fn asset_path(&self, relative: &str) -> Result<PathBuf, RepositoryError> {
        validate_asset_path(relative)
            .map_err(|e| RepositoryError::InvalidPath(format!("{}: {}", e, relative)))?;
        Ok(self.assets_dir.join(relative))
    }

    async fn model_files(&self, model_id: &str) -> Result<ModelFiles, RepositoryError> {
        let manifest = self.manifest(model_id).await?;
        let model = manifest.model_asset().ok_or_else(|| {
            RepositoryError::InvalidManifest(format!("model has no weights asset: {}", model_id))
        })?;

        Ok(ModelFiles {
            model: self.asset_path(&model.path)?,
            lora_adapter: manifest
                .lora_asset()
                .map(|asset| self.asset_path(&asset.path))
                .transpose()?,
        })
    }

    async fn import_asset(
        &self,
        source: &Path,
        relative: &str,
    ) -> Result<PathBuf, RepositoryError> {
        let dest = self.asset_path(relative)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| RepositoryError::IoError(e.to_string()))?;
        }

        let mut tmp = dest.clone().into_os_string();
        tmp.push(".part");
        let tmp = PathBuf::from(tmp);
        let bytes = fs::copy(source, &tmp).await.map_err(|e| {
            RepositoryError::IoError(format!("copy {}: {}", source.display(), e))
        })?;
        fs::rename(&tmp, &dest)
            .await
            .map_err(|e| RepositoryError::IoError(e.to_string()))?;

        tracing::debug!(asset = %relative, bytes, "Asset imported");
        Ok(dest)
    }

    async fn remove_unused_assets(&self) -> Result<GcReport, RepositoryError> {
        // 任一清单读不出来就放弃回收，否则它引用的资源会被误删
        let mut referenced = HashSet::new();
        for manifest in self.scan_manifests(ScanMode::Strict).await? {
            for asset in &manifest.assets {
                referenced.insert(self.asset_path(&asset.path)?);
            }
        }

        let (files, mut dirs) = self.walk_assets().await?;
        let mut report = GcReport::default();

        for file in files {
            if referenced.contains(&file) {
                report.retained += 1;
                continue;
            }
            fs::remove_file(&file)
                .await
                .map_err(|e| RepositoryError::IoError(e.to_string()))?;
            report.removed.push(file);
        }

        // 由深到浅删除空目录，非空目录删除失败直接忽略
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        for dir in dirs {
            let _ = fs::remove_dir(&dir).await;
        }

        tracing::info!(
            removed = report.removed.len(),
            retained = report.retained,
            "Unused assets collected"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{AssetRole, ModelAsset};
    use std::sync::Arc;

    fn asset(path: &str, role: AssetRole) -> ModelAsset {
        ModelAsset {
            path: path.to_string(),
            role,
            size: None,
        }
    }

    fn manifest(id: &str, assets: Vec<ModelAsset>) -> ModelManifest {
        ModelManifest {
            id: id.to_string(),
            version: "1".to_string(),
            name: None,
            assets,
        }
    }

    fn repository(root: &Path) -> FileModelRepository {
        FileModelRepository::new(root.join("models"), root.join("assets"))
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[tokio::test]
    async fn test_manifest_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(dir.path());
        let m = manifest("gemma", vec![asset("gemma/w.gguf", AssetRole::Model)]);

        repo.write_manifest(&m).await.unwrap();

        assert_eq!(repo.manifest("gemma").await.unwrap(), m);
        let model_dir = dir.path().join("models/gemma");
        assert!(!model_dir.join("manifest.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_manifest_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(dir.path());

        assert!(matches!(
            repo.manifest("nope").await,
            Err(RepositoryError::NotFound(_))
        ));
        assert!(matches!(
            repo.remove_model("nope").await,
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_manifest_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(dir.path());
        let m = manifest("gemma", vec![asset("../outside", AssetRole::Model)]);

        assert!(matches!(
            repo.write_manifest(&m).await,
            Err(RepositoryError::InvalidManifest(_))
        ));
        assert!(matches!(
            repo.manifest("../etc").await,
            Err(RepositoryError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_installed_models_lists_manifests_only() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(dir.path());
        repo.write_manifest(&manifest("b", vec![asset("b.gguf", AssetRole::Model)]))
            .await
            .unwrap();
        repo.write_manifest(&manifest("a", vec![asset("a.gguf", AssetRole::Model)]))
            .await
            .unwrap();
        // 只有统计、没有清单的目录不算已安装
        repo.update_stats("ghost", StatsDelta::used_at(1))
            .await
            .unwrap();

        let ids: Vec<String> = repo
            .installed_models()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_stats_merge_under_lock() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(repository(dir.path()));
        assert_eq!(repo.stats("gemma").await.unwrap(), ModelStats::default());

        let mut handles = Vec::new();
        for i in 0..8i64 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                let delta = if i % 2 == 0 {
                    StatsDelta::used_at(100 + i)
                } else {
                    StatsDelta::updated_at(200 + i)
                };
                repo.update_stats("gemma", delta).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = repo.stats("gemma").await.unwrap();
        assert!(stats.used_ts.is_some());
        assert!(stats.update_ts.is_some());
    }

    #[tokio::test]
    async fn test_model_files_resolve_assets() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(dir.path());
        repo.write_manifest(&manifest(
            "gemma",
            vec![
                asset("gemma/w.gguf", AssetRole::Model),
                asset("gemma/lora.bin", AssetRole::LoraAdapter),
            ],
        ))
        .await
        .unwrap();

        let files = repo.model_files("gemma").await.unwrap();
        assert_eq!(files.model, dir.path().join("assets/gemma/w.gguf"));
        assert_eq!(
            files.lora_adapter,
            Some(dir.path().join("assets/gemma/lora.bin"))
        );
        assert!(repo.asset_path("/etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_import_asset_copies_file() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(dir.path());
        let source = dir.path().join("download/w.gguf");
        touch(&source);

        let dest = repo.import_asset(&source, "gemma/w.gguf").await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"x");
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_gc_after_uninstall_keeps_shared_assets() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(dir.path());
        let assets = dir.path().join("assets");
        for path in ["shared/tokenizer.json", "m/w.gguf", "n/w.gguf", "stray.tmp"] {
            touch(&assets.join(path));
        }
        repo.write_manifest(&manifest(
            "m",
            vec![
                asset("m/w.gguf", AssetRole::Model),
                asset("shared/tokenizer.json", AssetRole::Other),
            ],
        ))
        .await
        .unwrap();
        repo.write_manifest(&manifest(
            "n",
            vec![
                asset("n/w.gguf", AssetRole::Model),
                asset("shared/tokenizer.json", AssetRole::Other),
            ],
        ))
        .await
        .unwrap();

        repo.remove_model("m").await.unwrap();
        let report = repo.remove_unused_assets().await.unwrap();

        assert_eq!(report.retained, 2);
        assert_eq!(report.removed.len(), 2);
        assert!(!assets.join("m/w.gguf").exists());
        assert!(!assets.join("m").exists());
        assert!(!assets.join("stray.tmp").exists());
        assert!(assets.join("n/w.gguf").exists());
        assert!(assets.join("shared/tokenizer.json").exists());
    }

    #[tokio::test]
    async fn test_gc_aborts_when_a_manifest_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(dir.path());
        let assets = dir.path().join("assets");
        repo.write_manifest(&manifest("a", vec![asset("a/w.gguf", AssetRole::Model)]))
            .await
            .unwrap();
        repo.write_manifest(&manifest("b", vec![asset("b/w.gguf", AssetRole::Model)]))
            .await
            .unwrap();
        touch(&assets.join("a/w.gguf"));
        touch(&assets.join("b/w.gguf"));
        touch(&assets.join("orphan.gguf"));
        std::fs::write(dir.path().join("models/b/manifest.json"), b"{ not json").unwrap();

        assert!(matches!(
            repo.remove_unused_assets().await,
            Err(RepositoryError::SerializationError(_))
        ));
        assert!(assets.join("a/w.gguf").exists());
        assert!(assets.join("b/w.gguf").exists());
        assert!(assets.join("orphan.gguf").exists());

        // 列表仍然可用，只跳过损坏的清单
        let listed = repo.installed_models().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "a");
    }
}
