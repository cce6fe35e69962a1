//! 题目级别的数据：题目描述、题目列表、图片标注、提取结果

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::exam::ExamType;
use super::usage::UsageLedger;

/// 一道题的最小描述（序号 + 标签）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionDescriptor {
    /// 从 1 开始
    pub index: u32,
    /// 输出中必须原样出现的标签，如 `10(a)` / `Question 3`
    pub label: String,
}

impl QuestionDescriptor {
    pub fn new(index: u32, label: impl Into<String>) -> Self {
        Self {
            index,
            label: label.into(),
        }
    }
}

/// 枚举阶段记录的非致命问题
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnumerationWarning {
    /// 声明的题目数与实际列表长度不一致
    CountMismatch { declared: usize, actual: usize },
    /// 标签格式与试卷类型不符（已重试一次）
    LabelFormat { reason: String },
}

impl fmt::Display for EnumerationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnumerationWarning::CountMismatch { declared, actual } => write!(
                f,
                "声明题目数 {} 与实际列表长度 {} 不一致，按实际列表处理",
                declared, actual
            ),
            EnumerationWarning::LabelFormat { reason } => write!(f, "标签格式异常: {}", reason),
        }
    }
}

/// 题目列表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionList {
    pub exam_type: ExamType,
    /// 能力层声明的题目总数，可能与 `descriptors.len()` 不同
    #[serde(rename = "total_questions")]
    pub declared_total: usize,
    #[serde(rename = "questions")]
    pub descriptors: Vec<QuestionDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<EnumerationWarning>,
}

impl QuestionList {
    /// 实际要处理的题目数
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.label.as_str()).collect()
    }

    /// 检查序号从 1 连续递增、标签唯一
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for (pos, descriptor) in self.descriptors.iter().enumerate() {
            let expected = pos as u32 + 1;
            if descriptor.index != expected {
                return Err(format!(
                    "第 {} 项的序号为 {}，应为 {}",
                    pos + 1,
                    descriptor.index,
                    expected
                ));
            }
            if descriptor.label.trim().is_empty() {
                return Err(format!("序号 {} 的标签为空", descriptor.index));
            }
            if !seen.insert(descriptor.label.as_str()) {
                return Err(format!("标签重复: {}", descriptor.label));
            }
        }
        Ok(())
    }
}

/// 内容片段：题目 / 答案
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Question,
    Answer,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::Question => write!(f, "question"),
            ContentKind::Answer => write!(f, "answer"),
        }
    }
}

/// 图片标注
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageAnnotation {
    /// 从 1 开始
    pub page_number: u32,
    /// `[x1, y1, x2, y2]`，原点在左上角
    pub bbox: [f64; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
}

impl ImageAnnotation {
    pub fn validate(&self) -> Result<(), String> {
        if self.page_number == 0 {
            return Err("page_number 从 1 开始".to_string());
        }
        let [x1, y1, x2, y2] = self.bbox;
        if self.bbox.iter().any(|v| !v.is_finite()) {
            return Err(format!("bbox 含非法数值: {:?}", self.bbox));
        }
        if x1 >= x2 || y1 >= y2 {
            return Err(format!("bbox 需满足 x1<x2 且 y1<y2: {:?}", self.bbox));
        }
        Ok(())
    }
}

/// 单题最终结局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionOutcome {
    Verified,
    FailedVerification,
    FailedBudget,
}

impl ExtractionOutcome {
    pub fn is_verified(self) -> bool {
        matches!(self, ExtractionOutcome::Verified)
    }
}

impl fmt::Display for ExtractionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionOutcome::Verified => write!(f, "verified"),
            ExtractionOutcome::FailedVerification => write!(f, "failed_verification"),
            ExtractionOutcome::FailedBudget => write!(f, "failed_budget"),
        }
    }
}

/// 校验过程记录
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub question_attempts: u32,
    pub answer_attempts: u32,
    /// 片段最终仍未解决的错误；修复后通过校验的片段为 `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_question_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_answer_error: Option<String>,
    /// 预算耗尽时的说明
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_note: Option<String>,
}

impl VerificationSummary {
    pub fn attempts(&self, kind: ContentKind) -> u32 {
        match kind {
            ContentKind::Question => self.question_attempts,
            ContentKind::Answer => self.answer_attempts,
        }
    }

    pub fn last_error(&self, kind: ContentKind) -> Option<&str> {
        match kind {
            ContentKind::Question => self.last_question_error.as_deref(),
            ContentKind::Answer => self.last_answer_error.as_deref(),
        }
    }

    /// 第一个未解决的片段及其错误（题目优先）
    pub fn unresolved(&self) -> Option<(ContentKind, &str)> {
        [ContentKind::Question, ContentKind::Answer]
            .into_iter()
            .find_map(|kind| self.last_error(kind).map(|error| (kind, error)))
    }
}

/// 单题提取结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub index: u32,
    pub label: String,
    pub question_content: String,
    pub answer_content: String,
    #[serde(default)]
    pub question_images: Vec<ImageAnnotation>,
    #[serde(default)]
    pub answer_images: Vec<ImageAnnotation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub outcome: ExtractionOutcome,
    #[serde(default)]
    pub verification: VerificationSummary,
    /// 提取能力返回的标签与请求不一致时，记录其原值（结果已按请求标签纠正）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_label: Option<String>,
    /// 本题各步骤的模型用量
    #[serde(default, skip_serializing_if = "UsageLedger::is_empty")]
    pub usage: UsageLedger,
}

impl ExtractionResult {
    /// 落盘文件名用的标签：去掉括号，空白和路径字符换成下划线
    pub fn safe_label(&self) -> String {
        safe_label(&self.label)
    }
}

/// `10(a)` → `10a`，`Question 3` → `Question_3`，`1/2` → `1_2`
pub fn safe_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| *c != '(' && *c != ')')
        .map(|c| {
            if c.is_whitespace() || c.is_control() || FILE_NAME_RESERVED.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect()
}

const FILE_NAME_RESERVED: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];
