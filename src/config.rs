use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppError, AppResult, ConfigError, FileError};
use crate::models::Pricing;

/// 环境变量前缀
const ENV_PREFIX: &str = "EXAM_PROCESSOR_";

/// 页面渲染质量
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderQuality {
    Low,
    Medium,
    High,
}

impl RenderQuality {
    /// 相对 72 dpi 的缩放倍数
    pub fn scale(self) -> f32 {
        match self {
            RenderQuality::Low => 1.0,
            RenderQuality::Medium => 1.5,
            RenderQuality::High => 2.0,
        }
    }

    pub fn dpi(self) -> u32 {
        (72.0 * self.scale()) as u32
    }
}

impl FromStr for RenderQuality {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(RenderQuality::Low),
            "medium" => Ok(RenderQuality::Medium),
            "high" => Ok(RenderQuality::High),
            _ => Err(()),
        }
    }
}

/// 程序配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    /// 估算费用用的单价（美元 / 百万 token）
    pub llm_input_price_per_million: f64,
    pub llm_output_price_per_million: f64,

    // --- 轮次预算 ---
    /// 单题每次能力调用的轮次上限
    pub max_turns_per_question: u32,
    /// 每个内容片段最多校验几次（含首次）
    pub max_fix_attempts: u32,
    pub classifier_max_turns: u32,
    pub lister_max_turns: u32,
    /// 单次尝试的墙钟上限（秒），0 表示不限制
    pub attempt_timeout_secs: u64,

    // --- 渲染 ---
    /// 分类时采样的页数
    pub classification_sample_pages: usize,
    pub render_quality: RenderQuality,

    // --- 流程策略 ---
    /// 结束后是否删除远程文件
    pub auto_cleanup_files: bool,
    /// 单题失败时是否继续
    pub continue_on_error: bool,
    /// 同时提取的题目数量
    pub max_concurrent_questions: usize,
    /// 校验失败的草稿是否保留在结果中
    pub keep_unverified_drafts: bool,
    /// 是否从已落盘的阶段产物恢复
    pub resume_from_artifacts: bool,

    // --- 输出 ---
    pub output_dir: PathBuf,
    /// LaTeX 编译器命令，空字符串表示只做结构检查
    pub latex_compiler: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-5".to_string(),
            llm_input_price_per_million: 1.25,
            llm_output_price_per_million: 10.0,
            max_turns_per_question: 15,
            max_fix_attempts: 2,
            classifier_max_turns: 5,
            lister_max_turns: 10,
            attempt_timeout_secs: 120,
            classification_sample_pages: 3,
            render_quality: RenderQuality::Medium,
            auto_cleanup_files: false,
            continue_on_error: true,
            max_concurrent_questions: 4,
            keep_unverified_drafts: false,
            resume_from_artifacts: false,
            output_dir: PathBuf::from("output"),
            latex_compiler: "pdflatex".to_string(),
            verbose_logging: false,
        }
    }
}

impl Config {
    /// 默认值 + 环境变量
    pub fn from_env() -> AppResult<Self> {
        Self::default().with_env_overrides()
    }

    /// 从 TOML 文件加载（缺省字段取默认值），不读取环境变量
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| AppError::file_read_failed(path, e))?;
        toml::from_str(&content).map_err(|source| {
            AppError::File(FileError::TomlParseFailed {
                path: path.to_path_buf(),
                source,
            })
        })
    }

    /// 默认值 → 可选的 TOML 文件 → 环境变量
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let base = match path {
            Some(p) => Self::from_toml_file(p)?,
            None => Self::default(),
        };
        base.with_env_overrides()
    }

    /// 用 `EXAM_PROCESSOR_*` 环境变量覆盖当前值
    pub fn with_env_overrides(self) -> AppResult<Self> {
        let d = self;
        Ok(Self {
            llm_api_key: env_string("OPENAI_API_KEY")
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .unwrap_or(d.llm_api_key),
            llm_api_base_url: env_string("OPENAI_BASE_URL").unwrap_or(d.llm_api_base_url),
            llm_model_name: env_string("OPENAI_MODEL").unwrap_or(d.llm_model_name),
            llm_input_price_per_million: env_parse(
                "INPUT_PRICE_PER_MILLION",
                d.llm_input_price_per_million,
            )?,
            llm_output_price_per_million: env_parse(
                "OUTPUT_PRICE_PER_MILLION",
                d.llm_output_price_per_million,
            )?,
            max_turns_per_question: env_parse("MAX_TURNS_PER_QUESTION", d.max_turns_per_question)?,
            max_fix_attempts: env_parse("MAX_FIX_ATTEMPTS", d.max_fix_attempts)?,
            classifier_max_turns: env_parse("CLASSIFIER_MAX_TURNS", d.classifier_max_turns)?,
            lister_max_turns: env_parse("LISTER_MAX_TURNS", d.lister_max_turns)?,
            attempt_timeout_secs: env_parse("ATTEMPT_TIMEOUT_SECS", d.attempt_timeout_secs)?,
            classification_sample_pages: env_parse(
                "CLASSIFICATION_SAMPLE_PAGES",
                d.classification_sample_pages,
            )?,
            render_quality: match env_string("PDF_RENDER_QUALITY") {
                Some(v) => v.parse().map_err(|_| ConfigError::EnvVarParseFailed {
                    var_name: format!("{ENV_PREFIX}PDF_RENDER_QUALITY"),
                    value: v.clone(),
                    expected_type: "low | medium | high",
                })?,
                None => d.render_quality,
            },
            auto_cleanup_files: env_parse("AUTO_CLEANUP_FILES", d.auto_cleanup_files)?,
            continue_on_error: env_parse("CONTINUE_ON_ERROR", d.continue_on_error)?,
            max_concurrent_questions: env_parse(
                "MAX_CONCURRENT_QUESTIONS",
                d.max_concurrent_questions,
            )?,
            keep_unverified_drafts: env_parse("KEEP_UNVERIFIED_DRAFTS", d.keep_unverified_drafts)?,
            resume_from_artifacts: env_parse("RESUME_FROM_ARTIFACTS", d.resume_from_artifacts)?,
            output_dir: env_string("OUTPUT_DIR").map(PathBuf::from).unwrap_or(d.output_dir),
            latex_compiler: env_string("LATEX_COMPILER").unwrap_or(d.latex_compiler),
            verbose_logging: env_parse("VERBOSE_LOGGING", d.verbose_logging)?,
        })
    }

    /// 校验取值范围
    pub fn validate(&self) -> AppResult<()> {
        if self.max_turns_per_question == 0 {
            return Err(AppError::invalid_config("max_turns_per_question", "必须大于 0"));
        }
        if self.classifier_max_turns == 0 || self.lister_max_turns == 0 {
            return Err(AppError::invalid_config(
                "classifier_max_turns / lister_max_turns",
                "必须大于 0",
            ));
        }
        if self.max_fix_attempts == 0 {
            return Err(AppError::invalid_config(
                "max_fix_attempts",
                "至少需要 1 次校验",
            ));
        }
        if self.max_concurrent_questions == 0 {
            return Err(AppError::invalid_config("max_concurrent_questions", "必须大于 0"));
        }
        if self.classification_sample_pages == 0 {
            return Err(AppError::invalid_config(
                "classification_sample_pages",
                "必须大于 0",
            ));
        }
        let prices = [self.llm_input_price_per_million, self.llm_output_price_per_million];
        if prices.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(AppError::invalid_config(
                "llm_input_price_per_million / llm_output_price_per_million",
                "必须是非负数",
            ));
        }
        Ok(())
    }

    pub fn pricing(&self) -> Pricing {
        Pricing {
            input_per_million: self.llm_input_price_per_million,
            output_per_million: self.llm_output_price_per_million,
        }
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        (self.attempt_timeout_secs > 0).then(|| Duration::from_secs(self.attempt_timeout_secs))
    }

    /// 为空时只做结构检查
    pub fn latex_compiler(&self) -> Option<&str> {
        let cmd = self.latex_compiler.trim();
        (!cmd.is_empty()).then_some(cmd)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}")).ok()
}

fn env_parse<T: FromStr>(name: &str, default: T) -> AppResult<T> {
    match env_string(name) {
        Some(value) => value.trim().parse().map_err(|_| {
            AppError::Config(ConfigError::EnvVarParseFailed {
                var_name: format!("{ENV_PREFIX}{name}"),
                value,
                expected_type: std::any::type_name::<T>(),
            })
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_fix_attempts, 2);
        assert_eq!(config.max_turns_per_question, 15);
        assert!(config.continue_on_error);
        assert!(!config.auto_cleanup_files);
        assert_eq!(config.attempt_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_render_quality_dpi() {
        assert_eq!(RenderQuality::Low.dpi(), 72);
        assert_eq!(RenderQuality::Medium.dpi(), 108);
        assert_eq!(RenderQuality::High.dpi(), 144);
        assert_eq!("HIGH".parse::<RenderQuality>(), Ok(RenderQuality::High));
        assert!("ultra".parse::<RenderQuality>().is_err());
    }

    #[test]
    fn test_toml_partial_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exam.toml");
        std::fs::write(
            &path,
            "max_fix_attempts = 3\nrender_quality = \"high\"\nlatex_compiler = \"\"\n",
        )
        .unwrap();

        let config = Config::from_toml_file(&path).unwrap();
        assert_eq!(config.max_fix_attempts, 3);
        assert_eq!(config.render_quality, RenderQuality::High);
        assert_eq!(config.latex_compiler(), None);
        // 未出现的字段保持默认
        assert_eq!(config.lister_max_turns, 10);
    }

    #[test]
    fn test_validate_rejects_zero_budgets() {
        let config = Config {
            max_fix_attempts: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            max_concurrent_questions: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            llm_output_price_per_million: -1.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
