//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock / Scripted）实现 LlmClient::complete；
//! LlmError 区分可重试（超时、限流、5xx、网络）与不可重试（鉴权、非法请求）错误，由网关决定是否退避重试。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::Message;

/// 单次补全参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
        }
    }
}

/// 提供方错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited (retry after {retry_after_ms} ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("API error: {0}")]
    ApiError(String),
}

impl LlmError {
    /// 是否为瞬时错误（可退避重试）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout
                | LlmError::RateLimited { .. }
                | LlmError::Server { .. }
                | LlmError::Network(_)
        )
    }

    /// 提供方建议的等待时间
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after_ms } if *retry_after_ms > 0 => {
                Some(Duration::from_millis(*retry_after_ms))
            }
            _ => None,
        }
    }

    /// 按 HTTP 状态码归类
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => LlmError::Auth(message),
            408 => LlmError::Timeout,
            429 => LlmError::RateLimited { retry_after_ms: 0 },
            400..=499 => LlmError::InvalidRequest(message),
            500..=599 => LlmError::Server { status, message },
            _ => LlmError::ApiError(message),
        }
    }
}

/// LLM 客户端 trait：非流式补全
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        config: &CompletionConfig,
    ) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::Timeout.is_transient());
        assert!(LlmError::from_status(503, "overloaded").is_transient());
        assert!(LlmError::from_status(429, "slow down").is_transient());
        assert!(!LlmError::from_status(401, "bad key").is_transient());
        assert!(!LlmError::from_status(400, "bad request").is_transient());
        assert!(!LlmError::ApiError("?".into()).is_transient());
    }

    #[test]
    fn test_retry_after_hint() {
        let e = LlmError::RateLimited { retry_after_ms: 250 };
        assert_eq!(e.retry_after(), Some(Duration::from_millis(250)));
        assert_eq!(LlmError::RateLimited { retry_after_ms: 0 }.retry_after(), None);
    }
}
