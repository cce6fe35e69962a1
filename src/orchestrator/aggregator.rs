//! 结果汇总 - 编排层
//!
//! 收集每道题的结局（成功结果或被隔离的失败），按题目序号稳定排序，
//! 生成最终的 `ProcessedDocument` 快照。各阶段与各题的模型用量在这里合并成一份报告。

use std::time::Instant;

use tracing::info;

use crate::models::{
    DocumentPair, ExamType, ExtractionOutcome, ExtractionResult, Pricing, ProcessedDocument,
    UploadedPair, UsageLedger, UsageReport,
};

/// 单题的收集结果
#[derive(Debug, Clone)]
pub enum ItemReport {
    /// 流程正常结束（结局可能是失败）
    Completed(ExtractionResult),
    /// 流程没有产出结果：能力调用出错、任务异常或未被调度
    Failed {
        index: u32,
        label: String,
        reason: String,
    },
}

impl ItemReport {
    pub fn index(&self) -> u32 {
        match self {
            ItemReport::Completed(result) => result.index,
            ItemReport::Failed { index, .. } => *index,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ItemReport::Completed(result) => &result.label,
            ItemReport::Failed { label, .. } => label,
        }
    }
}

/// 最终文档的表头信息
#[derive(Debug, Clone)]
pub struct DocumentHeader {
    pub exam_id: String,
    pub exam_type: ExamType,
    pub documents: DocumentPair,
    pub uploaded: UploadedPair,
    pub warnings: Vec<String>,
    pub model: String,
    pub pricing: Pricing,
    /// 分类、枚举等阶段的用量（不含单题）
    pub stage_usage: UsageLedger,
}

/// 结局是否计入失败
///
/// 预算耗尽总是失败；校验用尽只有在保留草稿时才算成功结果
pub fn counts_as_failure(result: &ExtractionResult, keep_unverified_drafts: bool) -> bool {
    match result.outcome {
        ExtractionOutcome::Verified => false,
        ExtractionOutcome::FailedVerification => !keep_unverified_drafts,
        ExtractionOutcome::FailedBudget => true,
    }
}

/// 结果汇总器
#[derive(Debug, Default)]
pub struct ResultAggregator {
    keep_unverified_drafts: bool,
    items: Vec<ItemReport>,
}

impl ResultAggregator {
    pub fn new(keep_unverified_drafts: bool) -> Self {
        Self {
            keep_unverified_drafts,
            items: Vec::new(),
        }
    }

    /// 收集顺序任意
    pub fn push(&mut self, item: ItemReport) {
        self.items.push(item);
    }

    /// 生成最终快照；`started` 为流水线开始时刻
    pub fn finish(mut self, header: DocumentHeader, started: Instant) -> ProcessedDocument {
        // 稳定排序：与完成顺序无关
        self.items.sort_by_key(ItemReport::index);

        let total_attempted = self.items.len();
        let mut successful_results = Vec::new();
        let mut failed_labels = Vec::new();

        let mut ledger = header.stage_usage;
        for item in &self.items {
            if let ItemReport::Completed(result) = item {
                ledger.merge(&result.usage);
            }
        }

        for item in self.items {
            match item {
                ItemReport::Completed(result)
                    if !counts_as_failure(&result, self.keep_unverified_drafts) =>
                {
                    successful_results.push(result)
                }
                other => failed_labels.push(other.label().to_string()),
            }
        }

        let document = ProcessedDocument {
            exam_id: header.exam_id,
            exam_type: header.exam_type,
            total_attempted,
            successful_results,
            failed_labels,
            paper_pdf_path: header.documents.paper,
            solution_pdf_path: header.documents.solution,
            paper_file: header.uploaded.paper,
            solution_file: header.uploaded.solution,
            warnings: header.warnings,
            elapsed_seconds: started.elapsed().as_secs_f64(),
            usage: UsageReport::new(header.model, header.pricing, ledger),
        };

        info!(
            "[试卷 {}] 题目统计: 成功 {} (通过校验 {}), 失败 {}, 总计 {}",
            document.exam_id,
            document.success_count(),
            document.verified_count(),
            document.failure_count(),
            document.total_attempted
        );
        info!(
            "[试卷 {}] 模型用量: 请求 {} 次, token {}, 估算费用 ${:.4}",
            document.exam_id,
            document.usage.total.requests,
            document.usage.total.total_tokens,
            document.usage.total.estimated_cost_usd
        );

        document
    }
}
