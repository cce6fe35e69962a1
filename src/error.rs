use std::path::PathBuf;

use crate::models::ContentKind;
use crate::safety::BudgetExceeded;

/// 应用程序错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    /// 远程存储错误
    #[error("远程存储错误: {0}")]
    Storage(#[from] StorageError),
    /// 某个阶段的外部能力调用失败
    #[error("{stage} 阶段失败: {source}")]
    Capability {
        stage: &'static str,
        #[source]
        source: CapabilityError,
    },
    /// 单题提取失败（仅在 continue_on_error = false 时上抛）
    #[error("题目 {label} 提取失败: {source}")]
    Extraction {
        label: String,
        #[source]
        source: ExtractionError,
    },
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
}

/// 文件操作错误
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    /// 输入文件不存在
    #[error("输入文件不存在: {}", path.display())]
    NotFound { path: PathBuf },
    /// 读取文件失败
    #[error("读取文件失败 ({}): {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 写入文件失败
    #[error("写入文件失败 ({}): {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// JSON 解析 / 序列化失败
    #[error("JSON 处理失败 ({}): {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({}): {source}", path.display())]
    TomlParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// 远程存储错误
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 上传失败
    #[error("上传失败 ({}): {message}", path.display())]
    UploadFailed { path: PathBuf, message: String },
    /// 删除失败
    #[error("删除远程文件 {handle} 失败: {message}")]
    DeleteFailed { handle: String, message: String },
    /// 查询失败
    #[error("查询远程文件 {handle} 失败: {message}")]
    LookupFailed { handle: String, message: String },
}

/// 外部能力（LLM / 渲染 / 编译）调用错误
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    /// 轮次预算耗尽（或单次尝试超时）
    #[error(transparent)]
    Budget(#[from] BudgetExceeded),
    /// API 调用失败
    #[error("LLM API调用失败 (模型: {model}): {message}")]
    Api { model: String, message: String },
    /// 返回内容为空
    #[error("返回内容为空 (模型: {model})")]
    EmptyResponse { model: String },
    /// 返回内容不符合约定结构
    #[error("返回内容不符合约定结构: {0}")]
    InvalidOutput(String),
    /// 外部工具执行失败
    #[error("外部工具 {tool} 执行失败: {message}")]
    Tool { tool: String, message: String },
}

/// 单题提取错误
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    /// 修复循环次数耗尽，仍未通过校验
    #[error("{kind} 内容经过 {attempts} 次校验仍未通过: {last_error}")]
    VerificationExhausted {
        kind: ContentKind,
        attempts: u32,
        last_error: String,
    },
    /// 后台任务异常退出
    #[error("提取任务异常退出: {0}")]
    TaskFailed(String),
}

/// 配置错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: &'static str,
    },
    /// 配置项取值非法
    #[error("配置项 {field} 非法: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建输入文件不存在错误
    pub fn input_not_found(path: impl Into<PathBuf>) -> Self {
        AppError::File(FileError::NotFound { path: path.into() })
    }

    /// 创建文件读取错误
    pub fn file_read_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建阶段能力调用错误
    pub fn capability(stage: &'static str, source: CapabilityError) -> Self {
        AppError::Capability { stage, source }
    }

    /// 创建配置项非法错误
    pub fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        AppError::Config(ConfigError::Invalid {
            field,
            reason: reason.into(),
        })
    }

    /// 是否为输入文件缺失
    pub fn is_input_not_found(&self) -> bool {
        matches!(self, AppError::File(FileError::NotFound { .. }))
    }

    /// 是否为上传失败
    pub fn is_upload_failure(&self) -> bool {
        matches!(self, AppError::Storage(StorageError::UploadFailed { .. }))
    }
}

impl CapabilityError {
    /// 是否为预算耗尽
    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self, CapabilityError::Budget(_))
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
