//! # Exam Extract
//!
//! 把一套试卷及其答案转换为逐题的 LaTeX 内容（含图片标注）
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（LLM 客户端、外部进程、远程存储），只暴露能力
//! - `LlmExecutor` - JSON 模式的 LLM 调用，每次请求消耗一轮预算
//! - `PdftoppmRenderer` / `LatexVerifier` / `OpenAiFileStorage`
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `LlmService` - 分类 / 枚举 / 提取能力
//! - `FileManager` - 上传（带补偿删除）、校验、清理
//! - `QuestionEnumerator` - 题目列表及一致性检查
//! - `WarnWriter` - 写 warn.txt 能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一道题"的完整处理流程
//! - `QuestionCtx` - 上下文封装（exam_id + 题目描述）
//! - `QuestionFlow` - 流程编排（草稿 → 校验 → 修复）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/pipeline` - 阶段推进、并发与清理
//! - `orchestrator/aggregator` - 结果汇总
//!
//! 轮次预算（`safety`）贯穿各层：每次能力调用各自创建 `TurnGuard`。
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod safety;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{DocumentPair, ExtractionOutcome, ExtractionResult, ProcessedDocument};
pub use orchestrator::{CancelSignal, Capabilities, Pipeline};
pub use safety::{BudgetExceeded, TurnGuard};
pub use workflow::{QuestionCtx, QuestionFlow};
