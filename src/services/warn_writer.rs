//! 警告写入服务 - 业务能力层
//!
//! 只负责"写 warn.txt"能力，不关心流程

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{AppError, AppResult};

/// 警告写入服务
///
/// 职责：
/// - 把失败的题目（标签 + 原因）追加写入 warn.txt
/// - 每次只写一道题
pub struct WarnWriter {
    warn_file_path: PathBuf,
}

impl WarnWriter {
    /// 使用自定义文件路径创建
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            warn_file_path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.warn_file_path
    }

    /// 写入警告信息
    ///
    /// # 参数
    /// - `exam_id`: 试卷ID
    /// - `index`: 题目序号
    /// - `label`: 题目标签
    /// - `reason`: 失败原因
    pub async fn write(&self, exam_id: &str, index: u32, label: &str, reason: &str) -> AppResult<()> {
        debug!("写入警告: 试卷 {} | 题目 {} {}", exam_id, index, label);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.warn_file_path)
            .await
            .map_err(|e| AppError::file_write_failed(&self.warn_file_path, e))?;

        // 原因里的换行压成一行
        let reason = reason.split_whitespace().collect::<Vec<_>>().join(" ");
        let warn_msg = format!(
            "试卷 {} | 题目 {} | 标签 {} | 原因: {}\n",
            exam_id, index, label, reason
        );

        file.write_all(warn_msg.as_bytes())
            .await
            .map_err(|e| AppError::file_write_failed(&self.warn_file_path, e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_appends_one_line_per_failure() {
        let dir = tempfile::tempdir().unwrap();
        let writer = WarnWriter::with_path(dir.path().join("warn.txt"));

        writer.write("exam_1", 2, "10(b)", "verification\nexhausted").await.unwrap();
        writer.write("exam_1", 5, "12", "budget").await.unwrap();

        let content = std::fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "试卷 exam_1 | 题目 2 | 标签 10(b) | 原因: verification exhausted");
        assert!(lines[1].contains("标签 12"));
    }
}
