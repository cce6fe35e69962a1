//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责阶段推进、并发调度和结果汇总，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `pipeline` - 流水线控制器
//! - 按顺序执行分类、上传、枚举、提取，并在每个阶段结束时落盘产物
//! - 控制并发数量（Semaphore）
//! - 持有远程文件句柄，负责最终清理
//!
//! ### `aggregator` - 结果汇总
//! - 收集每道题的结局，按题目序号排序
//! - 生成最终的 `ProcessedDocument`
//!
//! ## 层次关系
//!
//! ```text
//! pipeline (处理一对试卷 / 答案)
//!     ↓
//! workflow::QuestionFlow (处理单个题目)
//!     ↓
//! services (能力层：分类 / 枚举 / 提取 / 文件 / warn)
//!     ↓
//! infrastructure (基础设施：LLM、渲染、LaTeX、远程存储)
//! ```

pub mod aggregator;
pub mod pipeline;

// 重新导出主要类型
pub use aggregator::{counts_as_failure, DocumentHeader, ItemReport, ResultAggregator};
pub use pipeline::{CancelSignal, Capabilities, Pipeline, PipelineStage};
