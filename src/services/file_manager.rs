//! 文件生命周期管理 - 业务能力层
//!
//! 负责把试卷与答案上传到远程存储、校验句柄、清理句柄。
//!
//! - 先传试卷再传答案；答案上传失败时删除已上传的试卷（补偿删除）再上抛错误
//! - 清理是尽力而为：单个句柄删除失败只记日志，不影响其他句柄，也不向上报错

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::{AppError, AppResult, StorageError};
use crate::infrastructure::RemoteStorage;
use crate::models::{DocumentPair, RemoteFileHandle, UploadedPair};

/// 清理结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

/// 文件生命周期管理器
pub struct FileManager {
    storage: Arc<dyn RemoteStorage>,
}

impl FileManager {
    pub fn new(storage: Arc<dyn RemoteStorage>) -> Self {
        Self { storage }
    }

    /// 上传文档对
    pub async fn upload(&self, pair: &DocumentPair) -> AppResult<UploadedPair> {
        let paper = self.upload_one(&pair.paper).await?;

        let solution = match self.upload_one(&pair.solution).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("⚠️ 答案上传失败，回滚已上传的试卷 {}", paper.id);
                if let Err(delete_err) = self.storage.delete(&paper.id).await {
                    error!("补偿删除失败，远程文件 {} 可能残留: {}", paper.id, delete_err);
                }
                return Err(e);
            }
        };

        Ok(UploadedPair { paper, solution })
    }

    async fn upload_one(&self, path: &Path) -> AppResult<RemoteFileHandle> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AppError::file_read_failed(path, e))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());

        info!("📤 上传 {} ({} 字节)", path.display(), bytes.len());
        let id = self
            .storage
            .put(&file_name, bytes)
            .await
            .map_err(|e| match e {
                StorageError::UploadFailed { message, .. } => StorageError::UploadFailed {
                    path: path.to_path_buf(),
                    message,
                },
                other => StorageError::UploadFailed {
                    path: path.to_path_buf(),
                    message: other.to_string(),
                },
            })?;

        info!("✓ 上传完成: {}", id);
        Ok(RemoteFileHandle::new(id, path))
    }

    /// 句柄是否仍然可用；查询出错按不可用处理
    pub async fn verify(&self, handle: &RemoteFileHandle) -> bool {
        match self.storage.exists(&handle.id).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!("⚠️ 无法确认远程文件 {}: {}", handle.id, e);
                false
            }
        }
    }

    /// 删除全部句柄
    pub async fn cleanup(&self, handles: &[&RemoteFileHandle]) -> CleanupReport {
        info!("🗑️ 清理 {} 个远程文件...", handles.len());
        let mut report = CleanupReport::default();

        for handle in handles {
            match self.storage.delete(&handle.id).await {
                Ok(()) => {
                    info!("✓ 已删除远程文件: {}", handle);
                    report.deleted.push(handle.id.clone());
                }
                Err(e) => {
                    warn!("⚠️ 删除远程文件失败 {}: {}", handle, e);
                    report.failed.push(handle.id.clone());
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 第 `fail_put_at` 次 put 失败；`fail_delete` 中的 ID 删除失败
    #[derive(Default)]
    struct ScriptedStorage {
        fail_put_at: Option<usize>,
        fail_delete: Vec<String>,
        puts: Mutex<Vec<String>>,
        deletes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteStorage for ScriptedStorage {
        async fn put(&self, file_name: &str, _bytes: Vec<u8>) -> Result<String, StorageError> {
            let mut puts = self.puts.lock().unwrap();
            if self.fail_put_at == Some(puts.len() + 1) {
                return Err(StorageError::UploadFailed {
                    path: file_name.into(),
                    message: "quota exceeded".to_string(),
                });
            }
            puts.push(file_name.to_string());
            Ok(format!("file-{}", puts.len()))
        }

        async fn delete(&self, handle_id: &str) -> Result<(), StorageError> {
            self.deletes.lock().unwrap().push(handle_id.to_string());
            if self.fail_delete.iter().any(|id| id == handle_id) {
                return Err(StorageError::DeleteFailed {
                    handle: handle_id.to_string(),
                    message: "boom".to_string(),
                });
            }
            Ok(())
        }

        async fn exists(&self, handle_id: &str) -> Result<bool, StorageError> {
            if handle_id == "broken" {
                return Err(StorageError::LookupFailed {
                    handle: handle_id.to_string(),
                    message: "timeout".to_string(),
                });
            }
            Ok(handle_id.starts_with("file-"))
        }
    }

    fn pair_on_disk(dir: &Path) -> DocumentPair {
        let paper = dir.join("paper.pdf");
        let solution = dir.join("solution.pdf");
        std::fs::write(&paper, b"%PDF paper").unwrap();
        std::fs::write(&solution, b"%PDF solution").unwrap();
        DocumentPair::new(paper, solution)
    }

    #[tokio::test]
    async fn test_upload_paper_then_solution() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(ScriptedStorage::default());
        let manager = FileManager::new(storage.clone());

        let uploaded = manager.upload(&pair_on_disk(dir.path())).await.unwrap();
        assert_eq!(uploaded.paper.id, "file-1");
        assert_eq!(uploaded.solution.id, "file-2");
        assert_eq!(
            *storage.puts.lock().unwrap(),
            vec!["paper.pdf".to_string(), "solution.pdf".to_string()]
        );
        assert!(storage.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_solution_failure_rolls_back_paper_once() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(ScriptedStorage {
            fail_put_at: Some(2),
            ..Default::default()
        });
        let manager = FileManager::new(storage.clone());

        let err = manager.upload(&pair_on_disk(dir.path())).await.unwrap_err();
        assert!(err.is_upload_failure());
        assert!(err.to_string().contains("solution.pdf"));
        assert_eq!(*storage.deletes.lock().unwrap(), vec!["file-1".to_string()]);
    }

    #[tokio::test]
    async fn test_paper_failure_needs_no_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(ScriptedStorage {
            fail_put_at: Some(1),
            ..Default::default()
        });
        let manager = FileManager::new(storage.clone());

        assert!(manager.upload(&pair_on_disk(dir.path())).await.is_err());
        assert!(storage.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_continues_after_failure() {
        let storage = Arc::new(ScriptedStorage {
            fail_delete: vec!["file-1".to_string()],
            ..Default::default()
        });
        let manager = FileManager::new(storage.clone());
        let a = RemoteFileHandle::new("file-1", "paper.pdf");
        let b = RemoteFileHandle::new("file-2", "solution.pdf");

        let report = manager.cleanup(&[&a, &b]).await;
        assert_eq!(report.failed, vec!["file-1".to_string()]);
        assert_eq!(report.deleted, vec!["file-2".to_string()]);
        assert_eq!(storage.deletes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_verify_is_best_effort() {
        let manager = FileManager::new(Arc::new(ScriptedStorage::default()));
        assert!(manager.verify(&RemoteFileHandle::new("file-9", "p.pdf")).await);
        assert!(!manager.verify(&RemoteFileHandle::new("gone", "p.pdf")).await);
        assert!(!manager.verify(&RemoteFileHandle::new("broken", "p.pdf")).await);
    }
}
