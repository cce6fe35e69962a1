//! 题目枚举 - 业务能力层
//!
//! 调用枚举能力得到题目列表，并做三项检查：
//! 1. 序号连续、标签唯一：不满足直接拒绝
//! 2. 标签格式与试卷类型相符：不满足时强调格式重试一次，仍不满足则记警告继续
//! 3. 声明数量与实际列表长度一致：不一致时记警告，按实际列表继续

use std::sync::Arc;

use regex::RegexBuilder;
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult, CapabilityError};
use crate::models::{
    EnumerationWarning, ExamType, QuestionDescriptor, QuestionList, RemoteFileHandle, TokenUsage,
};
use crate::safety::TurnGuard;
use crate::services::capabilities::QuestionLister;

const STAGE: &str = "enumeration";
const TYPE1_LABEL: &str = r"^\d+\([a-z]\)$";
const TYPE2_LABEL: &str = r"^Question\s+\d+$";
/// type1 至少有这么多比例的标签形如 `10(a)`
const TYPE1_MIN_RATIO: f64 = 0.2;

/// 题目枚举器
pub struct QuestionEnumerator {
    lister: Arc<dyn QuestionLister>,
    max_turns: u32,
}

impl QuestionEnumerator {
    pub fn new(lister: Arc<dyn QuestionLister>, max_turns: u32) -> Self {
        Self { lister, max_turns }
    }

    /// 枚举题目
    ///
    /// 每次调用（含格式重试）消耗的用量累加到 `usage`
    pub async fn enumerate(
        &self,
        exam_type: ExamType,
        paper: &RemoteFileHandle,
        usage: &mut TokenUsage,
    ) -> AppResult<QuestionList> {
        let mut list = self.request(exam_type, paper, false, usage).await?;

        if let Err(reason) = check_label_format(exam_type, &list.descriptors) {
            warn!("⚠️ 题目标签格式不符 ({}): {}，强调格式后重试一次", exam_type, reason);
            list = self.request(exam_type, paper, true, usage).await?;

            if let Err(reason) = check_label_format(exam_type, &list.descriptors) {
                error!("重试后标签格式仍不符: {}，按当前列表继续", reason);
                list.warnings.push(EnumerationWarning::LabelFormat { reason });
            }
        }

        if list.declared_total != list.len() {
            warn!(
                "⚠️ 声明题目数 {} 与实际列表长度 {} 不一致，按实际列表处理",
                list.declared_total,
                list.len()
            );
            list.warnings.push(EnumerationWarning::CountMismatch {
                declared: list.declared_total,
                actual: list.len(),
            });
        }

        info!("✓ 共枚举出 {} 道题: {:?}", list.len(), list.labels());
        Ok(list)
    }

    /// 单次调用，各自独立的轮次预算
    async fn request(
        &self,
        exam_type: ExamType,
        paper: &RemoteFileHandle,
        emphasize_format: bool,
        usage: &mut TokenUsage,
    ) -> AppResult<QuestionList> {
        let mut guard = TurnGuard::scoped(STAGE, self.max_turns);
        let listed = self
            .lister
            .list_questions(exam_type, &paper.id, emphasize_format, &mut guard)
            .await;
        usage.add(guard.usage());
        let listed = listed.map_err(|e| AppError::capability(STAGE, e))?;

        if listed.exam_type != exam_type {
            warn!(
                "⚠️ 枚举结果的试卷类型 {} 与分类结果 {} 不同，以分类结果为准",
                listed.exam_type, exam_type
            );
        }

        let list = QuestionList {
            exam_type,
            declared_total: listed.total_questions,
            descriptors: listed.descriptors(),
            warnings: Vec::new(),
        };
        list.check_invariants().map_err(|reason| {
            AppError::capability(STAGE, CapabilityError::InvalidOutput(reason))
        })?;

        Ok(list)
    }
}

/// 标签格式检查
pub fn check_label_format(
    exam_type: ExamType,
    descriptors: &[QuestionDescriptor],
) -> Result<(), String> {
    let type1 = RegexBuilder::new(TYPE1_LABEL)
        .case_insensitive(true)
        .build()
        .map_err(|e| e.to_string())?;

    let type1_hits = descriptors
        .iter()
        .filter(|d| type1.is_match(&d.label))
        .count();

    match exam_type {
        ExamType::Type1 => {
            if descriptors.is_empty() || type1_hits == 0 {
                return Err("没有任何形如 10(a) 的标签".to_string());
            }
            let ratio = type1_hits as f64 / descriptors.len() as f64;
            if ratio < TYPE1_MIN_RATIO {
                return Err(format!(
                    "形如 10(a) 的标签只占 {:.0}%",
                    ratio * 100.0
                ));
            }
            Ok(())
        }
        ExamType::Type2 => {
            if type1_hits > 0 {
                return Err(format!("出现 {} 个形如 10(a) 的标签", type1_hits));
            }
            let type2 = RegexBuilder::new(TYPE2_LABEL)
                .build()
                .map_err(|e| e.to_string())?;
            match descriptors.iter().find(|d| !type2.is_match(&d.label)) {
                Some(bad) => Err(format!("标签 {:?} 不是 Question N 格式", bad.label)),
                None if descriptors.is_empty() => Err("题目列表为空".to_string()),
                None => Ok(()),
            }
        }
    }
}
