//! LLM 执行器 - 基础设施层
//!
//! 持有唯一的 OpenAI 兼容客户端，只暴露"发一次 JSON 模式请求并解析"的能力。
//!
//! - 每发出一次请求都在调用方传入的 `TurnGuard` 上记一轮，并记下回报的 token 数
//! - 回复为空、被长度截断、或 JSON 语法损坏时，提高 token 上限再来一轮
//! - JSON 合法但结构不符时直接返回 `InvalidOutput`，不做修补
//! - 不认识题目 / 试卷，不处理业务流程

use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs,
        FinishReason, ImageDetail, ImageUrl, ResponseFormat,
    },
    Client,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::CapabilityError;
use crate::safety::{with_deadline, TurnGuard};

/// 首轮的 token 上限
const INITIAL_MAX_TOKENS: u32 = 8000;
/// 每次重试的放大倍数
const TOKEN_GROWTH: f32 = 1.5;

/// 用户消息的一个组成部分
#[derive(Debug, Clone, PartialEq)]
pub enum InputPart {
    Text(String),
    /// 图片 URL 或 `data:image/png;base64,...`
    Image(String),
    /// 已上传到远程存储的文件
    File(String),
}

/// 单次请求的原始回复
#[derive(Debug, Clone, PartialEq)]
pub struct RawReply {
    pub content: Option<String>,
    pub truncated: bool,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// 回复解析失败的原因
#[derive(Debug)]
pub enum ReplyParseError {
    /// 语法损坏或提前结束，可以重试
    Malformed(serde_json::Error),
    /// JSON 合法但不符合约定结构
    Schema(serde_json::Error),
}

/// LLM 执行器
pub struct LlmExecutor {
    client: Client<OpenAIConfig>,
    model_name: String,
    attempt_timeout: Option<Duration>,
}

impl LlmExecutor {
    /// 创建新的 LLM 执行器
    pub fn new(config: &Config) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            attempt_timeout: config.attempt_timeout(),
        }
    }

    /// 共享同一个底层客户端（远程存储复用连接）
    pub fn client(&self) -> &Client<OpenAIConfig> {
        &self.client
    }

    /// 发送请求并把回复解析为 `T`
    ///
    /// # 参数
    /// - `system_message`: 系统消息
    /// - `parts`: 用户消息（文本 / 图片 / 文件）
    /// - `guard`: 本次调用的轮次守卫，每发一次请求记一轮
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        system_message: &str,
        parts: &[InputPart],
        guard: &mut TurnGuard,
    ) -> Result<T, CapabilityError> {
        let mut max_tokens = INITIAL_MAX_TOKENS;

        loop {
            let turn = guard.charge()?;
            debug!(
                "[{}] 第 {} 轮请求，模型: {}, max_tokens: {}",
                guard.scope(),
                turn,
                self.model_name,
                max_tokens
            );

            let reply = with_deadline(
                guard.scope(),
                self.attempt_timeout,
                self.send(system_message, parts, max_tokens),
            )
            .await?;
            guard.record_tokens(reply.input_tokens, reply.output_tokens);

            let content = match reply.content {
                Some(c) if !c.trim().is_empty() => c,
                _ => {
                    warn!(
                        "⚠️ [{}] 回复为空 (截断: {})，提高 token 上限重试",
                        guard.scope(),
                        reply.truncated
                    );
                    max_tokens = grow(max_tokens);
                    continue;
                }
            };

            match parse_json_reply::<T>(&content) {
                Ok(value) => return Ok(value),
                Err(ReplyParseError::Malformed(e)) => {
                    warn!(
                        "⚠️ [{}] JSON 不完整或语法错误 (截断: {}): {}，重试",
                        guard.scope(),
                        reply.truncated,
                        e
                    );
                    max_tokens = grow(max_tokens);
                }
                Err(ReplyParseError::Schema(e)) => {
                    return Err(CapabilityError::InvalidOutput(format!(
                        "[{}] {}",
                        guard.scope(),
                        e
                    )));
                }
            }
        }
    }

    /// 发送一次请求
    async fn send(
        &self,
        system_message: &str,
        parts: &[InputPart],
        max_tokens: u32,
    ) -> Result<RawReply, CapabilityError> {
        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(system_message)
            .build()
            .map_err(|e| self.api_error(e))?;

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(
                build_content_parts(parts)?,
            ))
            .build()
            .map_err(|e| self.api_error(e))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .response_format(ResponseFormat::JsonObject)
            .max_completion_tokens(max_tokens)
            .build()
            .map_err(|e| self.api_error(e))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            self.api_error(e)
        })?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CapabilityError::EmptyResponse {
                model: self.model_name.clone(),
            })?;

        let (input_tokens, output_tokens) = response
            .usage
            .as_ref()
            .map(|usage| (u64::from(usage.prompt_tokens), u64::from(usage.completion_tokens)))
            .unwrap_or_default();
        debug!("token 用量: 输入 {}, 输出 {}", input_tokens, output_tokens);

        Ok(RawReply {
            content: choice.message.content,
            truncated: matches!(choice.finish_reason, Some(FinishReason::Length)),
            input_tokens,
            output_tokens,
        })
    }

    fn api_error(&self, e: impl std::fmt::Display) -> CapabilityError {
        CapabilityError::Api {
            model: self.model_name.clone(),
            message: e.to_string(),
        }
    }
}

fn grow(max_tokens: u32) -> u32 {
    (max_tokens as f32 * TOKEN_GROWTH) as u32
}

/// 把输入部件转换为请求内容
fn build_content_parts(
    parts: &[InputPart],
) -> Result<Vec<ChatCompletionRequestUserMessageContentPart>, CapabilityError> {
    parts
        .iter()
        .map(|part| match part {
            InputPart::Text(text) => Ok(ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText { text: text.clone() },
            )),
            InputPart::Image(url) => Ok(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: url.clone(),
                        detail: Some(ImageDetail::High),
                    },
                },
            )),
            // 文件部件没有公开的构造器，走 serde
            InputPart::File(file_id) => serde_json::from_value(json!({
                "type": "file",
                "file": { "file_id": file_id }
            }))
            .map_err(|e| CapabilityError::Api {
                model: String::new(),
                message: format!("无法构造文件引用 {}: {}", file_id, e),
            }),
        })
        .collect()
}

/// 去掉 ```json 代码块包裹
pub fn extract_json_block(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // 跳过语言标记所在的行
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// 解析回复，区分"可以重试"与"结构不符"
pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Result<T, ReplyParseError> {
    serde_json::from_str(extract_json_block(text)).map_err(|e| {
        if e.is_data() {
            ReplyParseError::Schema(e)
        } else {
            ReplyParseError::Malformed(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    struct Sample {
        exam_type: String,
    }

    #[test]
    fn test_extract_json_block() {
        assert_eq!(extract_json_block("  {\"a\": 1} "), "{\"a\": 1}");
        assert_eq!(
            extract_json_block("```json\n{\"a\": 1}\n```"),
            "{\"a\": 1}"
        );
        assert_eq!(extract_json_block("```\n[1, 2]\n```\n"), "[1, 2]");
    }

    #[test]
    fn test_parse_reply_distinguishes_truncation_from_schema() {
        let ok: Sample = parse_json_reply("```json\n{\"exam_type\": \"type1\"}\n```").unwrap();
        assert_eq!(ok.exam_type, "type1");

        // 被截断
        assert!(matches!(
            parse_json_reply::<Sample>("{\"exam_type\": \"ty"),
            Err(ReplyParseError::Malformed(_))
        ));
        // 多余字段
        assert!(matches!(
            parse_json_reply::<Sample>("{\"exam_type\": \"type1\", \"extra\": 1}"),
            Err(ReplyParseError::Schema(_))
        ));
        // 类型不符
        assert!(matches!(
            parse_json_reply::<Sample>("{\"exam_type\": 3}"),
            Err(ReplyParseError::Schema(_))
        ));
    }

    #[test]
    fn test_token_growth() {
        assert_eq!(grow(8000), 12000);
        assert_eq!(grow(12000), 18000);
    }

    #[test]
    fn test_file_part_builds() {
        let parts = build_content_parts(&[
            InputPart::Text("hi".to_string()),
            InputPart::File("file-abc".to_string()),
        ])
        .unwrap();
        assert_eq!(parts.len(), 2);
        assert!(matches!(
            parts[1],
            ChatCompletionRequestUserMessageContentPart::File(_)
        ));
    }

    /// 真实接口调用，需要配置 API Key
    #[tokio::test]
    #[ignore]
    async fn test_complete_json_live() {
        let _ = tracing_subscriber::fmt::try_init();

        let config = Config::from_env().unwrap();
        let executor = LlmExecutor::new(&config);
        let mut guard = TurnGuard::scoped("live", 3);

        let value: serde_json::Value = executor
            .complete_json(
                "Reply with a JSON object.",
                &[InputPart::Text("Return {\"ok\": true}".to_string())],
                &mut guard,
            )
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
        assert!(guard.usage().input_tokens > 0);
    }
}
