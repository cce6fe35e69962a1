//! 题目处理上下文
//!
//! 封装"我正在处理哪套试卷的第几题"这一信息

use std::fmt::Display;

use crate::models::{ExamType, QuestionDescriptor};

/// 题目处理上下文
///
/// 包含处理单个题目所需的所有上下文信息，可以在并发任务之间自由克隆
#[derive(Debug, Clone)]
pub struct QuestionCtx {
    /// 试卷ID
    pub exam_id: String,

    /// 分类结果决定的试卷类型
    pub exam_type: ExamType,

    /// 当前题目
    pub descriptor: QuestionDescriptor,

    /// 题目总数（仅用于日志显示）
    pub total: usize,
}

impl QuestionCtx {
    /// 创建新的题目上下文
    pub fn new(
        exam_id: impl Into<String>,
        exam_type: ExamType,
        descriptor: QuestionDescriptor,
        total: usize,
    ) -> Self {
        Self {
            exam_id: exam_id.into(),
            exam_type,
            descriptor,
            total,
        }
    }

    pub fn index(&self) -> u32 {
        self.descriptor.index
    }

    pub fn label(&self) -> &str {
        &self.descriptor.label
    }
}

impl Display for QuestionCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[试卷 {} 题目#{}/{} {}]",
            self.exam_id, self.descriptor.index, self.total, self.descriptor.label
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefix() {
        let ctx = QuestionCtx::new(
            "exam_1",
            ExamType::Type1,
            QuestionDescriptor::new(2, "10(b)"),
            3,
        );
        assert_eq!(ctx.to_string(), "[试卷 exam_1 题目#2/3 10(b)]");
    }
}
