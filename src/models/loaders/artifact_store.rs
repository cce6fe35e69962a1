//! 阶段产物的读写
//!
//! 每个阶段结束时把产物写到输出目录，下一阶段开始前必须写完。
//! 写入先落到临时文件再 rename，中途崩溃不会留下半截 JSON。

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult, FileError};
use crate::models::{
    ClassificationResult, ExtractionResult, ProcessedDocument, QuestionList, UploadedPair,
};

pub const CLASSIFICATION_FILE: &str = "classification.json";
pub const UPLOADS_FILE: &str = "uploaded_files.json";
pub const QUESTION_LIST_FILE: &str = "question_list.json";
pub const QUESTIONS_DIR: &str = "questions";
pub const WARN_FILE: &str = "warn.txt";

/// 最终结果文件名
pub fn result_file_name(exam_id: &str) -> String {
    format!("{exam_id}_result.json")
}

pub fn question_file_name(index: u32, safe_label: &str) -> String {
    format!("question_{index}_{safe_label}.json")
}

/// 单次运行的产物目录
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// 创建目录（含 `questions/` 子目录）
    pub async fn create(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        let questions = root.join(QUESTIONS_DIR);
        fs::create_dir_all(&questions)
            .await
            .map_err(|e| AppError::file_write_failed(&questions, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn warn_file(&self) -> PathBuf {
        self.root.join(WARN_FILE)
    }

    pub fn result_file(&self, exam_id: &str) -> PathBuf {
        self.root.join(result_file_name(exam_id))
    }

    /// `questions/question_{序号}_{安全标签}.json`，序号保证不同标签不会撞名
    pub fn question_file(&self, result: &ExtractionResult) -> PathBuf {
        self.root
            .join(QUESTIONS_DIR)
            .join(question_file_name(result.index, &result.safe_label()))
    }

    // ========== 各阶段 ==========

    pub async fn save_classification(&self, value: &ClassificationResult) -> AppResult<PathBuf> {
        self.write_json(self.root.join(CLASSIFICATION_FILE), value).await
    }

    pub async fn load_classification(&self) -> AppResult<Option<ClassificationResult>> {
        self.read_json(self.root.join(CLASSIFICATION_FILE)).await
    }

    pub async fn save_uploads(&self, value: &UploadedPair) -> AppResult<PathBuf> {
        self.write_json(self.root.join(UPLOADS_FILE), value).await
    }

    pub async fn load_uploads(&self) -> AppResult<Option<UploadedPair>> {
        self.read_json(self.root.join(UPLOADS_FILE)).await
    }

    pub async fn save_question_list(&self, value: &QuestionList) -> AppResult<PathBuf> {
        self.write_json(self.root.join(QUESTION_LIST_FILE), value).await
    }

    pub async fn load_question_list(&self) -> AppResult<Option<QuestionList>> {
        self.read_json(self.root.join(QUESTION_LIST_FILE)).await
    }

    pub async fn save_question(&self, value: &ExtractionResult) -> AppResult<PathBuf> {
        self.write_json(self.question_file(value), value).await
    }

    pub async fn save_result(&self, value: &ProcessedDocument) -> AppResult<PathBuf> {
        self.write_json(self.result_file(&value.exam_id), value).await
    }

    // ========== 通用读写 ==========

    async fn write_json<T: Serialize>(&self, path: PathBuf, value: &T) -> AppResult<PathBuf> {
        let body = serde_json::to_vec_pretty(value).map_err(|source| {
            AppError::File(FileError::Json {
                path: path.clone(),
                source,
            })
        })?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body)
            .await
            .map_err(|e| AppError::file_write_failed(&tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| AppError::file_write_failed(&path, e))?;

        debug!("产物已写入: {}", path.display());
        Ok(path)
    }

    /// 文件不存在返回 `Ok(None)`；内容损坏时记录警告并当作不存在
    async fn read_json<T: DeserializeOwned>(&self, path: PathBuf) -> AppResult<Option<T>> {
        let content = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::file_read_failed(&path, e)),
        };

        match serde_json::from_slice(&content) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("⚠️ 产物无法解析，忽略: {} ({})", path.display(), e);
                Ok(None)
            }
        }
    }
}
