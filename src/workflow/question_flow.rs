//! 题目处理流程 - 流程层
//!
//! 核心职责：定义"一道题"的完整处理流程
//!
//! 流程顺序：
//! 1. 提取草稿（独立轮次预算）
//! 2. 标签对齐：以请求的标签为准
//! 3. 题目 / 答案两个片段各自走"校验 → 修复"循环，互不影响
//! 4. 汇总出唯一的结局：verified / failed_verification / failed_budget
//!
//! 每次能力调用的用量按步骤（extract / fix_question / fix_answer）记入结果

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{CapabilityError, ExtractionError};
use crate::infrastructure::ContentVerifier;
use crate::models::{
    ContentKind, ExtractionOutcome, ExtractionResult, ImageAnnotation, Pricing, UploadedPair,
    UsageLedger, VerificationSummary,
};
use crate::safety::{BudgetExceeded, TurnGuard};
use crate::services::{ContentExtractor, ExtractionRequest, RevisionRequest};
use crate::utils::logging::truncate_text;
use crate::workflow::fix_loop::{FixLoop, FixStep};
use crate::workflow::question_ctx::QuestionCtx;

const STEP_EXTRACT: &str = "extract";

/// 单个片段的处理结果
#[derive(Debug)]
struct PieceOutcome {
    content: String,
    images: Vec<ImageAnnotation>,
    attempts: u32,
    /// 通过校验的片段为 `None`
    last_error: Option<String>,
    status: PieceStatus,
    usage: UsageLedger,
}

#[derive(Debug)]
enum PieceStatus {
    Verified,
    Exhausted,
    OutOfBudget(BudgetExceeded),
}

/// 题目处理流程
///
/// - 编排单题的提取与校验修复
/// - 只依赖能力契约（提取 + 校验），不关心落盘与并发
pub struct QuestionFlow {
    extractor: Arc<dyn ContentExtractor>,
    verifier: Arc<dyn ContentVerifier>,
    max_turns: u32,
    max_fix_attempts: u32,
    verbose_logging: bool,
    pricing: Pricing,
}

impl QuestionFlow {
    /// 创建新的题目处理流程
    pub fn new(
        config: &Config,
        extractor: Arc<dyn ContentExtractor>,
        verifier: Arc<dyn ContentVerifier>,
    ) -> Self {
        Self {
            extractor,
            verifier,
            max_turns: config.max_turns_per_question,
            max_fix_attempts: config.max_fix_attempts,
            verbose_logging: config.verbose_logging,
            pricing: config.pricing(),
        }
    }

    /// 处理一道题
    ///
    /// 预算耗尽和校验用尽都以 `Ok` 返回（结局写在结果里）；
    /// 能力调用本身出错才返回 `Err`
    pub async fn run(
        &self,
        ctx: &QuestionCtx,
        files: &UploadedPair,
    ) -> Result<ExtractionResult, ExtractionError> {
        info!("{} 开始提取", ctx);
        let request = ExtractionRequest::new(ctx.exam_type, ctx.descriptor.clone(), files);

        // ========== 步骤 1: 草稿 ==========
        let mut usage = UsageLedger::default();
        let mut guard = TurnGuard::scoped(format!("extract {}", ctx.label()), self.max_turns);
        let started = Instant::now();
        let draft = self.extractor.extract_content(&request, &mut guard).await;
        usage.record(STEP_EXTRACT, guard.usage(), started.elapsed(), &self.pricing);

        let draft = match draft {
            Ok(draft) => draft,
            Err(CapabilityError::Budget(budget)) => {
                warn!("{} ⚠️ 提取草稿时预算耗尽: {}", ctx, budget);
                return Ok(budget_failure(ctx, budget, usage));
            }
            Err(e) => return Err(e.into()),
        };
        draft.validate().map_err(CapabilityError::InvalidOutput)?;
        debug!("{} 草稿用了 {} 轮", ctx, guard.used());

        // ========== 步骤 2: 标签对齐 ==========
        let reported_label = (draft.question_label.trim() != ctx.label())
            .then(|| draft.question_label.clone());
        if let Some(reported) = &reported_label {
            warn!(
                "{} ⚠️ 返回的标签 {:?} 与请求的不一致，已改为 {:?}",
                ctx,
                reported,
                ctx.label()
            );
        }

        if self.verbose_logging {
            info!("{} 题目: {}", ctx, truncate_text(&draft.question_content, 80));
            info!("{} 答案: {}", ctx, truncate_text(&draft.answer_content, 80));
        }

        // ========== 步骤 3: 两个片段各自校验修复 ==========
        let (question, answer) = tokio::join!(
            self.verify_piece(
                ctx,
                &request,
                ContentKind::Question,
                draft.question_content,
                draft.question_images,
            ),
            self.verify_piece(
                ctx,
                &request,
                ContentKind::Answer,
                draft.answer_content,
                draft.answer_images,
            ),
        );
        let (question, answer) = (question?, answer?);
        usage.merge(&question.usage);
        usage.merge(&answer.usage);

        // ========== 步骤 4: 汇总结局 ==========
        let mut budget_note = None;
        for piece in [&question, &answer] {
            if let PieceStatus::OutOfBudget(budget) = &piece.status {
                budget_note.get_or_insert_with(|| budget.to_string());
            }
        }
        let outcome = if budget_note.is_some() {
            ExtractionOutcome::FailedBudget
        } else if matches!(question.status, PieceStatus::Exhausted)
            || matches!(answer.status, PieceStatus::Exhausted)
        {
            ExtractionOutcome::FailedVerification
        } else {
            ExtractionOutcome::Verified
        };

        match outcome {
            ExtractionOutcome::Verified => info!("{} ✓ 题目与答案均通过校验", ctx),
            other => warn!("{} ⚠️ 提取结束: {}", ctx, other),
        }

        Ok(ExtractionResult {
            index: ctx.index(),
            label: ctx.label().to_string(),
            question_content: question.content,
            answer_content: answer.content,
            question_images: question.images,
            answer_images: answer.images,
            marks: draft.marks,
            reasoning: draft.reasoning,
            outcome,
            verification: VerificationSummary {
                question_attempts: question.attempts,
                answer_attempts: answer.attempts,
                last_question_error: question.last_error,
                last_answer_error: answer.last_error,
                budget_note,
            },
            reported_label,
            usage,
        })
    }

    /// 单个片段的"校验 → 修复"循环
    async fn verify_piece(
        &self,
        ctx: &QuestionCtx,
        request: &ExtractionRequest,
        kind: ContentKind,
        mut content: String,
        mut images: Vec<ImageAnnotation>,
    ) -> Result<PieceOutcome, ExtractionError> {
        let mut fix = FixLoop::new(self.max_fix_attempts);
        let mut usage = UsageLedger::default();
        let step = format!("fix_{kind}");

        loop {
            let report = self.verifier.check(&content, kind).await?;

            let error_message = match fix.record(&report) {
                FixStep::Verified => {
                    debug!("{} {} 第 {} 次校验通过", ctx, kind, fix.attempts());
                    return Ok(PieceOutcome {
                        content,
                        images,
                        attempts: fix.attempts(),
                        last_error: None,
                        status: PieceStatus::Verified,
                        usage,
                    });
                }
                FixStep::Exhausted(error) => {
                    warn!(
                        "{} ⚠️ {} 校验 {} 次仍未通过: {}",
                        ctx,
                        kind,
                        fix.attempts(),
                        error
                    );
                    return Ok(PieceOutcome {
                        content,
                        images,
                        attempts: fix.attempts(),
                        last_error: Some(error),
                        status: PieceStatus::Exhausted,
                        usage,
                    });
                }
                FixStep::NeedsFix(error) => error,
            };

            info!(
                "{} {} 第 {} 次校验未通过，请求修复: {}",
                ctx,
                kind,
                fix.attempts(),
                truncate_text(&error_message, 120)
            );

            let revision = RevisionRequest {
                kind,
                previous_content: content.clone(),
                error_message: error_message.clone(),
                attempt: fix.attempts(),
            };
            let mut guard = TurnGuard::scoped(format!("fix {} {}", kind, ctx.label()), self.max_turns);
            let started = Instant::now();
            let revised = self.extractor.revise_content(request, &revision, &mut guard).await;
            usage.record(&step, guard.usage(), started.elapsed(), &self.pricing);

            match revised {
                Ok(revised) => {
                    revised.validate().map_err(CapabilityError::InvalidOutput)?;
                    content = revised.content;
                    if let Some(new_images) = revised.images {
                        images = new_images;
                    }
                }
                Err(CapabilityError::Budget(budget)) => {
                    warn!("{} ⚠️ 修复 {} 时预算耗尽: {}", ctx, kind, budget);
                    return Ok(PieceOutcome {
                        content,
                        images,
                        attempts: fix.attempts(),
                        last_error: Some(error_message),
                        status: PieceStatus::OutOfBudget(budget),
                        usage,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// 草稿阶段就耗尽预算：没有任何内容可保留
fn budget_failure(
    ctx: &QuestionCtx,
    budget: BudgetExceeded,
    usage: UsageLedger,
) -> ExtractionResult {
    ExtractionResult {
        index: ctx.index(),
        label: ctx.label().to_string(),
        question_content: String::new(),
        answer_content: String::new(),
        question_images: Vec::new(),
        answer_images: Vec::new(),
        marks: None,
        reasoning: None,
        outcome: ExtractionOutcome::FailedBudget,
        verification: VerificationSummary {
            budget_note: Some(budget.to_string()),
            ..Default::default()
        },
        reported_label: None,
        usage,
    }
}

/// 校验用尽的结果转换为错误，指向最终未通过的片段（都未通过时取题目）
pub fn verification_error(result: &ExtractionResult) -> Option<ExtractionError> {
    if result.outcome != ExtractionOutcome::FailedVerification {
        return None;
    }
    let (kind, last_error) = result
        .verification
        .unresolved()
        .unwrap_or((ContentKind::Question, ""));

    Some(ExtractionError::VerificationExhausted {
        kind,
        attempts: result.verification.attempts(kind),
        last_error: last_error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::VerifyReport;
    use crate::models::{ExamType, QuestionDescriptor, RemoteFileHandle};
    use crate::services::{ExtractionDraft, RevisedContent};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 草稿标签固定为 "A1"；修复时把 BAD 替换成 GOOD
    struct StubExtractor {
        draft_turns: u32,
        revise_turns: u32,
        revisions: Mutex<Vec<(ContentKind, u32)>>,
    }

    impl StubExtractor {
        fn new(draft_turns: u32, revise_turns: u32) -> Arc<Self> {
            Arc::new(Self {
                draft_turns,
                revise_turns,
                revisions: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ContentExtractor for StubExtractor {
        async fn extract_content(
            &self,
            _request: &ExtractionRequest,
            guard: &mut TurnGuard,
        ) -> Result<ExtractionDraft, CapabilityError> {
            for _ in 0..self.draft_turns {
                guard.charge()?;
                guard.record_tokens(100, 40);
            }
            Ok(ExtractionDraft {
                question_label: "A1".to_string(),
                question_content: "\\item BAD".to_string(),
                answer_content: "fine".to_string(),
                question_images: Vec::new(),
                answer_images: Vec::new(),
                marks: Some(4),
                reasoning: None,
            })
        }

        async fn revise_content(
            &self,
            _request: &ExtractionRequest,
            revision: &RevisionRequest,
            guard: &mut TurnGuard,
        ) -> Result<RevisedContent, CapabilityError> {
            for _ in 0..self.revise_turns {
                guard.charge()?;
                guard.record_tokens(60, 20);
            }
            self.revisions
                .lock()
                .unwrap()
                .push((revision.kind, revision.attempt));
            Ok(RevisedContent {
                content: revision.previous_content.replace("BAD", "GOOD"),
                images: None,
            })
        }
    }

    /// 内容含 BAD 即失败；`always_fail` 为 true 时全部失败
    struct StubVerifier {
        always_fail: bool,
    }

    #[async_trait]
    impl ContentVerifier for StubVerifier {
        async fn check(&self, content: &str, _kind: ContentKind) -> Result<VerifyReport, CapabilityError> {
            if self.always_fail || content.contains("BAD") {
                Ok(VerifyReport::failed("Undefined control sequence"))
            } else {
                Ok(VerifyReport::passed())
            }
        }
    }

    fn ctx() -> QuestionCtx {
        QuestionCtx::new("exam_1", ExamType::Type1, QuestionDescriptor::new(1, "10(a)"), 1)
    }

    fn files() -> UploadedPair {
        UploadedPair {
            paper: RemoteFileHandle::new("file-p", "paper.pdf"),
            solution: RemoteFileHandle::new("file-s", "solution.pdf"),
        }
    }

    fn flow(extractor: Arc<StubExtractor>, always_fail: bool, max_turns: u32) -> QuestionFlow {
        let config = Config {
            max_turns_per_question: max_turns,
            max_fix_attempts: 2,
            ..Config::default()
        };
        QuestionFlow::new(&config, extractor, Arc::new(StubVerifier { always_fail }))
    }

    #[tokio::test]
    async fn test_fix_then_verified_with_requested_label() {
        let extractor = StubExtractor::new(1, 1);
        let result = flow(extractor.clone(), false, 5).run(&ctx(), &files()).await.unwrap();

        assert_eq!(result.outcome, ExtractionOutcome::Verified);
        assert_eq!(result.label, "10(a)");
        assert_eq!(result.reported_label.as_deref(), Some("A1"));
        assert_eq!(result.question_content, "\\item GOOD");
        assert_eq!(result.verification.last_question_error, None);
        assert_eq!(result.verification.question_attempts, 2);
        assert_eq!(result.verification.answer_attempts, 1);
        assert_eq!(result.marks, Some(4));
        assert_eq!(
            *extractor.revisions.lock().unwrap(),
            vec![(ContentKind::Question, 1)]
        );

        let extract = result.usage.step("extract").unwrap();
        assert_eq!((extract.requests, extract.input_tokens), (1, 100));
        let fix = result.usage.step("fix_question").unwrap();
        assert_eq!((fix.requests, fix.output_tokens), (1, 20));
        assert!(result.usage.step("fix_answer").is_none());
    }

    /// 题目含 BAD 时失败；答案总是失败
    struct AnswerNeverPasses;

    #[async_trait]
    impl ContentVerifier for AnswerNeverPasses {
        async fn check(&self, content: &str, kind: ContentKind) -> Result<VerifyReport, CapabilityError> {
            Ok(match kind {
                ContentKind::Question if content.contains("BAD") => {
                    VerifyReport::failed("stale question error")
                }
                ContentKind::Question => VerifyReport::passed(),
                ContentKind::Answer => VerifyReport::failed("Missing $ inserted"),
            })
        }
    }

    #[tokio::test]
    async fn test_repaired_question_does_not_mask_answer_failure() {
        let config = Config {
            max_fix_attempts: 2,
            ..Config::default()
        };
        let flow = QuestionFlow::new(&config, StubExtractor::new(1, 1), Arc::new(AnswerNeverPasses));
        let result = flow.run(&ctx(), &files()).await.unwrap();

        assert_eq!(result.outcome, ExtractionOutcome::FailedVerification);
        assert_eq!(result.verification.last_question_error, None);

        match verification_error(&result).unwrap() {
            ExtractionError::VerificationExhausted { kind, attempts, last_error } => {
                assert_eq!(kind, ContentKind::Answer);
                assert_eq!(attempts, 2);
                assert_eq!(last_error, "Missing $ inserted");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_persistent_failure_is_bounded() {
        let extractor = StubExtractor::new(1, 1);
        let result = flow(extractor.clone(), true, 5).run(&ctx(), &files()).await.unwrap();

        assert_eq!(result.outcome, ExtractionOutcome::FailedVerification);
        assert_eq!(result.verification.question_attempts, 2);
        assert_eq!(result.verification.answer_attempts, 2);
        // 每个片段最多修复 max_fix_attempts - 1 次
        assert_eq!(extractor.revisions.lock().unwrap().len(), 2);

        let err = verification_error(&result).unwrap();
        assert!(matches!(
            err,
            ExtractionError::VerificationExhausted { kind: ContentKind::Question, attempts: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_budget_exhausted_during_draft() {
        let extractor = StubExtractor::new(3, 1);
        let result = flow(extractor, false, 2).run(&ctx(), &files()).await.unwrap();

        assert_eq!(result.outcome, ExtractionOutcome::FailedBudget);
        assert!(result.question_content.is_empty());
        assert!(result.verification.budget_note.is_some());
        assert!(verification_error(&result).is_none());
        // 耗尽前的两轮仍然计入用量
        assert_eq!(result.usage.step("extract").unwrap().requests, 2);
    }

    #[tokio::test]
    async fn test_budget_exhausted_during_revision_keeps_draft() {
        let extractor = StubExtractor::new(1, 3);
        let result = flow(extractor, false, 2).run(&ctx(), &files()).await.unwrap();

        assert_eq!(result.outcome, ExtractionOutcome::FailedBudget);
        assert_eq!(result.question_content, "\\item BAD");
        assert_eq!(result.answer_content, "fine");
    }
}
