//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；错误按可重试 / 不可重试归类为 LlmError。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{CompletionConfig, LlmClient, LlmError, Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：模型与采样参数来自每次调用的 CompletionConfig
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            usage: TokenUsage::new(),
        }
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        messages
            .iter()
            .map(|m| {
                let msg = match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                    Role::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                };
                Ok(msg)
            })
            .collect()
    }
}

/// 将 async_openai 错误归类：限流 / 5xx / 超时 / 网络可重试，鉴权与非法请求不可重试
fn classify(err: OpenAIError) -> LlmError {
    match err {
        OpenAIError::ApiError(api) => {
            let detail = format!("{api:?}").to_lowercase();
            let message = api.message.clone();
            if detail.contains("rate_limit") || detail.contains("rate limit") {
                LlmError::RateLimited { retry_after_ms: 0 }
            } else if detail.contains("server_error") || detail.contains("overloaded") {
                LlmError::Server {
                    status: 500,
                    message,
                }
            } else if detail.contains("invalid_api_key")
                || detail.contains("authentication")
                || detail.contains("permission")
            {
                LlmError::Auth(message)
            } else if detail.contains("invalid_request") || detail.contains("context_length") {
                LlmError::InvalidRequest(message)
            } else {
                LlmError::ApiError(message)
            }
        }
        OpenAIError::InvalidArgument(msg) => LlmError::InvalidRequest(msg),
        other => classify_transport(other.to_string()),
    }
}

/// 传输层错误只暴露文本：超时、HTTP 状态码、连接失败
fn classify_transport(text: String) -> LlmError {
    let lower = text.to_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        return LlmError::Timeout;
    }
    let status = lower
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| s.len() == 3)
        .filter_map(|s| s.parse::<u16>().ok())
        .find(|code| (400..=599).contains(code));
    match status {
        Some(code) => LlmError::from_status(code, text),
        None if lower.contains("http error") || lower.contains("connect") => LlmError::Network(text),
        None => LlmError::ApiError(text),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(
        &self,
        messages: &[Message],
        config: &CompletionConfig,
    ) -> Result<String, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&config.model)
            .temperature(config.temperature)
            .max_completion_tokens(config.max_tokens)
            .messages(self.to_openai_messages(messages).map_err(classify)?)
            .build()
            .map_err(classify)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(classify)?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_transport_errors() {
        assert_eq!(
            classify_transport("http error: operation timed out".into()),
            LlmError::Timeout
        );
        assert!(matches!(
            classify_transport("http error: status 503 Service Unavailable".into()),
            LlmError::Server { status: 503, .. }
        ));
        assert!(matches!(
            classify_transport("http error: status 401 Unauthorized".into()),
            LlmError::Auth(_)
        ));
        assert!(matches!(
            classify_transport("http error: error trying to connect".into()),
            LlmError::Network(_)
        ));
        assert!(matches!(
            classify_transport("failed to deserialize api response".into()),
            LlmError::ApiError(_)
        ));
    }

    #[test]
    fn test_token_usage_accumulates() {
        let usage = TokenUsage::new();
        usage.add(10, 5);
        usage.add(1, 1);
        assert_eq!(usage.get(), (11, 6, 17));
    }
}
