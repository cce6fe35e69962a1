use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::exam::{ExamType, RemoteFileHandle};
use super::question::ExtractionResult;
use super::usage::UsageReport;

/// 整套试卷的最终结果，流水线结束时一次性生成
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedDocument {
    pub exam_id: String,
    pub exam_type: ExamType,
    /// 进入提取阶段的题目数
    #[serde(rename = "total_questions")]
    pub total_attempted: usize,
    /// 按题目序号排序
    #[serde(rename = "questions")]
    pub successful_results: Vec<ExtractionResult>,
    /// 按题目序号排序
    pub failed_labels: Vec<String>,
    pub paper_pdf_path: PathBuf,
    pub solution_pdf_path: PathBuf,
    pub paper_file: RemoteFileHandle,
    pub solution_file: RemoteFileHandle,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(rename = "processing_time_seconds")]
    pub elapsed_seconds: f64,
    /// 模型用量与估算费用
    #[serde(default, rename = "api_usage")]
    pub usage: UsageReport,
}

impl ProcessedDocument {
    pub fn success_count(&self) -> usize {
        self.successful_results.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed_labels.len()
    }

    /// 成功结果中真正通过校验的数量
    pub fn verified_count(&self) -> usize {
        self.successful_results
            .iter()
            .filter(|r| r.outcome.is_verified())
            .count()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.successful_results
            .iter()
            .map(|r| r.label.as_str())
            .collect()
    }
}
