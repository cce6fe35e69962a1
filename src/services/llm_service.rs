//! LLM 服务 - 业务能力层
//!
//! 用同一个 `LlmExecutor` 实现分类、枚举、提取三种能力，不关心流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use tracing::debug;

use crate::error::CapabilityError;
use crate::infrastructure::{InputPart, LlmExecutor, PageImage};
use crate::models::{ClassificationResult, ExamType};
use crate::safety::TurnGuard;
use crate::services::capabilities::{
    Classifier, ContentExtractor, ExtractionDraft, ExtractionRequest, ListedQuestions,
    QuestionLister, RevisedContent, RevisionRequest,
};
use crate::services::prompts;

/// 分类回复
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClassifierReply {
    exam_type: ExamType,
    reasoning: String,
    #[serde(default)]
    confidence: Option<f64>,
}

/// LLM 服务
///
/// 职责：
/// - 构造各能力的输入（文本 / 页面图片 / 远程文件）
/// - 通过执行器拿到结构化回复
/// - 不出现题目列表、不关心并发和重试策略
pub struct LlmService {
    executor: Arc<LlmExecutor>,
}

impl LlmService {
    pub fn new(executor: Arc<LlmExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Classifier for LlmService {
    async fn classify(
        &self,
        pages: &[PageImage],
        guard: &mut TurnGuard,
    ) -> Result<ClassificationResult, CapabilityError> {
        if pages.is_empty() {
            return Err(CapabilityError::InvalidOutput("没有可用于分类的页面".to_string()));
        }
        debug!("使用 Vision API，包含 {} 张页面图片", pages.len());

        let mut parts = vec![InputPart::Text(prompts::CLASSIFIER_USER.to_string())];
        parts.extend(pages.iter().map(|page| {
            InputPart::Image(format!("data:image/png;base64,{}", BASE64.encode(&page.png)))
        }));

        let reply: ClassifierReply = self
            .executor
            .complete_json(prompts::CLASSIFIER_SYSTEM, &parts, guard)
            .await?;

        if let Some(c) = reply.confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(CapabilityError::InvalidOutput(format!(
                    "confidence 超出 [0, 1]: {}",
                    c
                )));
            }
        }

        Ok(ClassificationResult {
            exam_type: reply.exam_type,
            reasoning: reply.reasoning,
            confidence: reply.confidence,
        })
    }
}

#[async_trait]
impl QuestionLister for LlmService {
    async fn list_questions(
        &self,
        exam_type: ExamType,
        paper_file_id: &str,
        emphasize_format: bool,
        guard: &mut TurnGuard,
    ) -> Result<ListedQuestions, CapabilityError> {
        let parts = [
            InputPart::File(paper_file_id.to_string()),
            InputPart::Text(prompts::lister_user(exam_type, emphasize_format)),
        ];
        self.executor
            .complete_json(prompts::LISTER_SYSTEM, &parts, guard)
            .await
    }
}

#[async_trait]
impl ContentExtractor for LlmService {
    async fn extract_content(
        &self,
        request: &ExtractionRequest,
        guard: &mut TurnGuard,
    ) -> Result<ExtractionDraft, CapabilityError> {
        let parts = [
            InputPart::File(request.paper_file_id.clone()),
            InputPart::File(request.solution_file_id.clone()),
            InputPart::Text(prompts::extractor_user(request.exam_type, request.label())),
        ];
        self.executor
            .complete_json(prompts::EXTRACTOR_SYSTEM, &parts, guard)
            .await
    }

    async fn revise_content(
        &self,
        request: &ExtractionRequest,
        revision: &RevisionRequest,
        guard: &mut TurnGuard,
    ) -> Result<RevisedContent, CapabilityError> {
        let parts = [
            InputPart::File(request.paper_file_id.clone()),
            InputPart::File(request.solution_file_id.clone()),
            InputPart::Text(prompts::revision_user(
                request.exam_type,
                request.label(),
                revision.kind,
                &revision.previous_content,
                &revision.error_message,
            )),
        ];
        self.executor
            .complete_json(prompts::EXTRACTOR_SYSTEM, &parts, guard)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_classifier_reply_schema() {
        let reply: ClassifierReply =
            serde_json::from_str(r#"{"exam_type": "type2", "reasoning": "answer lines"}"#)
                .unwrap();
        assert_eq!(reply.exam_type, ExamType::Type2);
        assert!(reply.confidence.is_none());

        assert!(serde_json::from_str::<ClassifierReply>(
            r#"{"exam_type": "type1", "reasoning": "", "score": 1}"#
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_classify_without_pages_is_rejected() {
        let service = LlmService::new(Arc::new(LlmExecutor::new(&Config::default())));
        let mut guard = TurnGuard::new(1);

        let err = service.classify(&[], &mut guard).await.unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidOutput(_)));
        // 没有发出请求
        assert_eq!(guard.used(), 0);
    }
}
