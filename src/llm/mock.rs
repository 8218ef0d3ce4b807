//! Mock / Scripted LLM 客户端（用于试跑与测试，无需 API）

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::llm::{CompletionConfig, LlmClient, LlmError, Message, Role};

/// Mock 客户端：对任何请求返回单步 assert 计划，目标取自最后一条 User 消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _config: &CompletionConfig,
    ) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        let task = last_user
            .lines()
            .find_map(|l| l.strip_prefix("Task: "))
            .unwrap_or(last_user)
            .trim();

        let plan = serde_json::json!([{
            "action": "assert",
            "target": "screen",
            "parameters": {},
            "description": format!("Mock check for: {task}"),
        }]);
        Ok(plan.to_string())
    }
}

/// 按脚本依次返回响应；脚本耗尽后返回 fallback（未设置则报错）。记录每次收到的 prompt 与并发峰值
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<Vec<Message>>>,
    delay: Option<Duration>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedLlmClient {
    pub fn new<I>(script: I) -> Self
    where
        I: IntoIterator<Item = Result<String, LlmError>>,
    {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    /// 全部请求返回同一响应
    pub fn always(response: impl Into<String>) -> Self {
        Self::default().with_fallback(response)
    }

    pub fn with_fallback(mut self, response: impl Into<String>) -> Self {
        self.fallback = Some(response.into());
        self
    }

    /// 每次调用前等待，用于观察并发与超时
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 已收到的全部请求（按顺序）
    pub async fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().await.clone()
    }

    pub async fn calls(&self) -> usize {
        self.prompts.lock().await.len()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// 当前未完成的调用数（被取消的调用也会归还）
    pub fn in_flight(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }
}

/// 在途计数；future 被 drop（如超时）时同样归还
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(current: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(current)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _config: &CompletionConfig,
    ) -> Result<String, LlmError> {
        let _in_flight = InFlight::enter(&self.current, &self.peak);
        self.prompts.lock().await.push(messages.to_vec());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().await.pop_front();
        match next {
            Some(r) => r,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| LlmError::ApiError("script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_returns_single_step_plan() {
        let mock = MockLlmClient;
        let out = mock
            .complete(
                &[Message::user("Task: open settings\nPlatform: android")],
                &CompletionConfig::default(),
            )
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v.as_array().unwrap().len(), 1);
        assert!(v[0]["description"].as_str().unwrap().contains("open settings"));
    }

    #[tokio::test]
    async fn test_scripted_then_fallback() {
        let client = ScriptedLlmClient::new(vec![Err(LlmError::Timeout), Ok("a".into())])
            .with_fallback("z");
        let cfg = CompletionConfig::default();
        assert_eq!(client.complete(&[], &cfg).await, Err(LlmError::Timeout));
        assert_eq!(client.complete(&[], &cfg).await.unwrap(), "a");
        assert_eq!(client.complete(&[], &cfg).await.unwrap(), "z");
        assert_eq!(client.calls().await, 3);
    }
}
