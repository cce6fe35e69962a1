//! 外部能力契约
//!
//! 分类、枚举、提取三种能力都是黑盒，这里只约定输入输出。
//! 输出结构统一 `deny_unknown_fields`，调用方拿到后再做业务校验。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CapabilityError;
use crate::infrastructure::PageImage;
use crate::models::{
    ClassificationResult, ContentKind, ExamType, ImageAnnotation, QuestionDescriptor,
    UploadedPair,
};
use crate::safety::TurnGuard;

/// 分类能力
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        pages: &[PageImage],
        guard: &mut TurnGuard,
    ) -> Result<ClassificationResult, CapabilityError>;
}

/// 枚举能力的原始回复
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListedQuestions {
    pub exam_type: ExamType,
    pub total_questions: usize,
    pub questions: Vec<ListedQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListedQuestion {
    pub question_index: u32,
    pub question_label: String,
}

impl ListedQuestions {
    pub fn descriptors(&self) -> Vec<QuestionDescriptor> {
        self.questions
            .iter()
            .map(|q| QuestionDescriptor::new(q.question_index, q.question_label.trim()))
            .collect()
    }
}

/// 枚举能力
#[async_trait]
pub trait QuestionLister: Send + Sync {
    /// `emphasize_format` 为 true 时，强调标签格式规则（用于重试）
    async fn list_questions(
        &self,
        exam_type: ExamType,
        paper_file_id: &str,
        emphasize_format: bool,
        guard: &mut TurnGuard,
    ) -> Result<ListedQuestions, CapabilityError>;
}

/// 单题提取请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    pub exam_type: ExamType,
    pub descriptor: QuestionDescriptor,
    pub paper_file_id: String,
    pub solution_file_id: String,
}

impl ExtractionRequest {
    pub fn new(exam_type: ExamType, descriptor: QuestionDescriptor, files: &UploadedPair) -> Self {
        Self {
            exam_type,
            descriptor,
            paper_file_id: files.paper.id.clone(),
            solution_file_id: files.solution.id.clone(),
        }
    }

    pub fn label(&self) -> &str {
        &self.descriptor.label
    }
}

/// 提取能力返回的草稿
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractionDraft {
    pub question_label: String,
    pub question_content: String,
    pub answer_content: String,
    #[serde(default)]
    pub question_images: Vec<ImageAnnotation>,
    #[serde(default)]
    pub answer_images: Vec<ImageAnnotation>,
    #[serde(default)]
    pub marks: Option<u32>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl ExtractionDraft {
    /// 图片标注必须合法
    pub fn validate(&self) -> Result<(), String> {
        validate_images(&self.question_images)?;
        validate_images(&self.answer_images)
    }
}

/// 修复请求：把上一次的校验错误作为额外上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRequest {
    pub kind: ContentKind,
    pub previous_content: String,
    pub error_message: String,
    /// 第几次修复（从 1 开始）
    pub attempt: u32,
}

/// 修复后的内容片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RevisedContent {
    pub content: String,
    /// `None` 表示沿用原来的图片标注
    #[serde(default)]
    pub images: Option<Vec<ImageAnnotation>>,
}

impl RevisedContent {
    pub fn validate(&self) -> Result<(), String> {
        match &self.images {
            Some(images) => validate_images(images),
            None => Ok(()),
        }
    }
}

/// 提取能力
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract_content(
        &self,
        request: &ExtractionRequest,
        guard: &mut TurnGuard,
    ) -> Result<ExtractionDraft, CapabilityError>;

    async fn revise_content(
        &self,
        request: &ExtractionRequest,
        revision: &RevisionRequest,
        guard: &mut TurnGuard,
    ) -> Result<RevisedContent, CapabilityError>;
}

fn validate_images(images: &[ImageAnnotation]) -> Result<(), String> {
    images
        .iter()
        .enumerate()
        .try_for_each(|(i, image)| image.validate().map_err(|e| format!("第 {} 张图片: {}", i + 1, e)))
}
