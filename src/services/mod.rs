//! 业务能力层（Services）
//!
//! 描述"我能做什么"：分类、枚举、提取、文件生命周期、警告记录。
//! 不关心并发，不持有流水线状态。

pub mod capabilities;
pub mod file_manager;
pub mod llm_service;
pub mod prompts;
pub mod question_enumerator;
pub mod warn_writer;

pub use capabilities::{
    Classifier, ContentExtractor, ExtractionDraft, ExtractionRequest, ListedQuestion,
    ListedQuestions, QuestionLister, RevisedContent, RevisionRequest,
};
pub use file_manager::{CleanupReport, FileManager};
pub use llm_service::LlmService;
pub use question_enumerator::{check_label_format, QuestionEnumerator};
pub use warn_writer::WarnWriter;
