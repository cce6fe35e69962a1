//! 远程存储 - 基础设施层
//!
//! 只暴露 put / delete / exists 三个能力，句柄是不透明的字符串

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::files::{CreateFileRequestArgs, FileInput, FilePurpose},
    Client,
};
use async_trait::async_trait;
use tracing::debug;

use crate::error::StorageError;

/// 远程存储能力
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// 上传内容，返回远程 ID
    async fn put(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, StorageError>;

    /// 删除远程文件
    async fn delete(&self, handle_id: &str) -> Result<(), StorageError>;

    /// 远程文件是否仍然存在
    async fn exists(&self, handle_id: &str) -> Result<bool, StorageError>;
}

/// 基于 OpenAI Files API 的远程存储
pub struct OpenAiFileStorage {
    client: Client<OpenAIConfig>,
}

impl OpenAiFileStorage {
    pub fn new(client: Client<OpenAIConfig>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteStorage for OpenAiFileStorage {
    async fn put(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        let upload_failed = |message: String| StorageError::UploadFailed {
            path: file_name.into(),
            message,
        };

        debug!("上传 {} ({} 字节)", file_name, bytes.len());
        let request = CreateFileRequestArgs::default()
            .file(FileInput::from_vec_u8(file_name.to_string(), bytes))
            .purpose(FilePurpose::Assistants)
            .build()
            .map_err(|e| upload_failed(e.to_string()))?;

        let file = self
            .client
            .files()
            .create(request)
            .await
            .map_err(|e| upload_failed(e.to_string()))?;

        Ok(file.id)
    }

    async fn delete(&self, handle_id: &str) -> Result<(), StorageError> {
        let response = self
            .client
            .files()
            .delete(handle_id)
            .await
            .map_err(|e| StorageError::DeleteFailed {
                handle: handle_id.to_string(),
                message: e.to_string(),
            })?;

        if response.deleted {
            Ok(())
        } else {
            Err(StorageError::DeleteFailed {
                handle: handle_id.to_string(),
                message: "服务端返回 deleted=false".to_string(),
            })
        }
    }

    async fn exists(&self, handle_id: &str) -> Result<bool, StorageError> {
        match self.client.files().retrieve(handle_id).await {
            Ok(_) => Ok(true),
            // 服务端明确拒绝（通常是 404）视为不存在
            Err(OpenAIError::ApiError(e)) => {
                debug!("远程文件 {} 不可用: {}", handle_id, e.message);
                Ok(false)
            }
            Err(e) => Err(StorageError::LookupFailed {
                handle: handle_id.to_string(),
                message: e.to_string(),
            }),
        }
    }
}
