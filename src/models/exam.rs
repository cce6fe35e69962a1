//! 试卷级别的数据：文档对、分类结果、远程文件句柄

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// 试卷类型，决定题目拆分规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExamType {
    /// 独立答题册：`10(a)` 为一道题，`(i)` 为小问
    #[serde(rename = "type1")]
    Type1,
    /// 在试卷上作答：`Question N` 为一道题
    #[serde(rename = "type2")]
    Type2,
}

impl fmt::Display for ExamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExamType::Type1 => write!(f, "type1"),
            ExamType::Type2 => write!(f, "type2"),
        }
    }
}

/// 试卷与答案两个本地文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPair {
    pub paper: PathBuf,
    pub solution: PathBuf,
}

impl DocumentPair {
    pub fn new(paper: impl Into<PathBuf>, solution: impl Into<PathBuf>) -> Self {
        Self {
            paper: paper.into(),
            solution: solution.into(),
        }
    }

    /// 两个文件都必须存在，否则返回 `FileError::NotFound`
    pub fn ensure_exists(&self) -> AppResult<()> {
        for path in [&self.paper, &self.solution] {
            if !path.is_file() {
                return Err(AppError::input_not_found(path.clone()));
            }
        }
        Ok(())
    }
}

/// 分类结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub exam_type: ExamType,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// 远程文件句柄
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileHandle {
    /// 远程存储返回的不透明 ID
    pub id: String,
    /// 上传前的本地路径
    pub local_path: PathBuf,
}

impl RemoteFileHandle {
    pub fn new(id: impl Into<String>, local_path: impl AsRef<Path>) -> Self {
        Self {
            id: id.into(),
            local_path: local_path.as_ref().to_path_buf(),
        }
    }
}

impl fmt::Display for RemoteFileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.local_path.display())
    }
}

/// 上传完成后的一对句柄
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedPair {
    pub paper: RemoteFileHandle,
    pub solution: RemoteFileHandle,
}

impl UploadedPair {
    pub fn handles(&self) -> [&RemoteFileHandle; 2] {
        [&self.paper, &self.solution]
    }

    /// 是否与给定的文档对一一对应
    pub fn matches(&self, pair: &DocumentPair) -> bool {
        self.paper.local_path == pair.paper && self.solution.local_path == pair.solution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exam_type_serde_names() {
        assert_eq!(serde_json::to_string(&ExamType::Type1).unwrap(), "\"type1\"");
        let parsed: ExamType = serde_json::from_str("\"type2\"").unwrap();
        assert_eq!(parsed, ExamType::Type2);
        assert!(serde_json::from_str::<ExamType>("\"type3\"").is_err());
    }

    #[test]
    fn test_missing_input_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let paper = dir.path().join("paper.pdf");
        std::fs::write(&paper, b"%PDF").unwrap();

        let pair = DocumentPair::new(&paper, dir.path().join("missing.pdf"));
        let err = pair.ensure_exists().unwrap_err();
        assert!(err.is_input_not_found());
        assert!(err.to_string().contains("missing.pdf"));
    }
}
