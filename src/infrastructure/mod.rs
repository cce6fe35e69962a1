//! 基础设施层（Infrastructure Layer）
//!
//! 持有稀缺资源（LLM 客户端、外部进程、远程存储），只暴露能力，不认识业务流程。

pub mod latex_verifier;
pub mod llm_executor;
pub mod page_renderer;
pub mod remote_storage;

pub use latex_verifier::{ContentVerifier, LatexVerifier, VerifyReport};
pub use llm_executor::{InputPart, LlmExecutor};
pub use page_renderer::{
    render_for_classification, select_page_indices, select_page_numbers, PageImage, PageRenderer,
    PdftoppmRenderer,
};
pub use remote_storage::{OpenAiFileStorage, RemoteStorage};
