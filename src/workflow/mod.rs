//! 流程层（Workflow）
//!
//! 描述"一道题怎么处理"：提取草稿、校验、修复，直到得到唯一的结局。

pub mod fix_loop;
pub mod question_ctx;
pub mod question_flow;

pub use fix_loop::{FixLoop, FixStep};
pub use question_ctx::QuestionCtx;
pub use question_flow::{verification_error, QuestionFlow};
