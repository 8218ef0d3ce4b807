//! LLM 网关：进程内唯一的模型调用入口
//!
//! - 并发上限：Semaphore，许可在请求完成（或失败）后释放
//! - 速率限制：滑动窗口，`rate_limit_requests` 次 / `rate_limit_period`
//! - 重试：瞬时错误按指数退避（可选抖动）重试，最多 `max_retries` 次；提供方给出的 retry-after 优先
//! - 超时：每次尝试单独计时，超时视为可重试错误
//!
//! 不可重试错误立即返回 LlmUnavailable，不消耗剩余预算。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::llm::{CompletionConfig, LlmClient, LlmError, Message};

/// 重试与退避参数
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            min_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// 第 n 次重试（从 1 开始）的基础等待：min_wait * 2^(n-1)，封顶 max_wait
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(20);
        let wait = self.min_wait.saturating_mul(1u32 << exp);
        wait.min(self.max_wait)
    }

    /// 实际等待：基础退避加抖动（取 [wait/2, wait]，不低于 min_wait），再与 retry-after 提示取大
    pub fn delay_for(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let base = self.backoff(retry);
        let mut delay = if self.jitter && !base.is_zero() {
            let hi = base.as_millis() as u64;
            let lo = (hi / 2).max(self.min_wait.as_millis() as u64).min(hi);
            Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
        } else {
            base
        };
        if let Some(hint) = hint {
            delay = delay.max(hint.min(self.max_wait));
        }
        delay
    }
}

/// 网关配置
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_concurrent: usize,
    pub rate_limit_requests: usize,
    pub rate_limit_period: Duration,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            rate_limit_requests: 60,
            rate_limit_period: Duration::from_secs(60),
            request_timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }
}

/// 重试预算耗尽或遇到不可重试错误
#[derive(Error, Debug, Clone)]
#[error("LLM unavailable after {attempts} attempt(s): {last}")]
pub struct LlmUnavailable {
    pub attempts: u32,
    #[source]
    pub last: LlmError,
}

#[derive(Debug, Default)]
struct GatewayStats {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    attempts: AtomicU32,
}

/// 持有期间占用一个并发名额，drop 即释放
pub struct GatewayPermit {
    _permit: OwnedSemaphorePermit,
    stats: Arc<GatewayStats>,
}

impl Drop for GatewayPermit {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 带并发 / 速率 / 重试控制的 LLM 客户端包装
pub struct LlmGateway {
    client: Arc<dyn LlmClient>,
    config: GatewayConfig,
    semaphore: Arc<Semaphore>,
    window: Mutex<VecDeque<Instant>>,
    stats: Arc<GatewayStats>,
}

impl LlmGateway {
    pub fn new(client: Arc<dyn LlmClient>, config: GatewayConfig) -> Self {
        let permits = config.max_concurrent.max(1);
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(permits)),
            window: Mutex::new(VecDeque::new()),
            stats: Arc::new(GatewayStats::default()),
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// 当前在途请求数
    pub fn in_flight(&self) -> usize {
        self.stats.in_flight.load(Ordering::SeqCst)
    }

    /// 运行以来观察到的最大在途请求数
    pub fn peak_in_flight(&self) -> usize {
        self.stats.peak_in_flight.load(Ordering::SeqCst)
    }

    /// 累计发往提供方的尝试次数
    pub fn attempts(&self) -> u32 {
        self.stats.attempts.load(Ordering::SeqCst)
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.client.token_usage()
    }

    /// 等待并发名额与速率窗口；返回的许可在 drop 时释放
    pub async fn acquire(&self) -> Result<GatewayPermit, LlmError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| LlmError::ApiError(format!("gateway closed: {e}")))?;
        self.wait_for_window().await;
        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Ok(GatewayPermit {
            _permit: permit,
            stats: self.stats.clone(),
        })
    }

    /// 滑动窗口：窗口内已满则睡到最早一条过期
    async fn wait_for_window(&self) {
        let limit = self.config.rate_limit_requests.max(1);
        let period = self.config.rate_limit_period;
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                while window
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= period)
                {
                    window.pop_front();
                }
                if window.len() < limit {
                    window.push_back(now);
                    return;
                }
                match window.front() {
                    Some(oldest) => period.saturating_sub(now.duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };
            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate window full");
            tokio::time::sleep(wait).await;
        }
    }

    /// 发送补全请求；瞬时错误自动重试，直至预算耗尽
    pub async fn complete(
        &self,
        messages: &[Message],
        config: &CompletionConfig,
    ) -> Result<String, LlmUnavailable> {
        let max_attempts = self.config.retry.max_retries.saturating_add(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match self.acquire().await {
                Ok(_permit) => {
                    self.stats.attempts.fetch_add(1, Ordering::SeqCst);
                    match tokio::time::timeout(
                        self.config.request_timeout,
                        self.client.complete(messages, config),
                    )
                    .await
                    {
                        Ok(r) => r,
                        Err(_) => Err(LlmError::Timeout),
                    }
                }
                Err(e) => Err(e),
            };

            let err = match result {
                Ok(text) => return Ok(text),
                Err(e) => e,
            };

            if !err.is_transient() {
                tracing::error!(attempt, error = %err, "LLM request failed (not retryable)");
                return Err(LlmUnavailable {
                    attempts: attempt,
                    last: err,
                });
            }
            if attempt >= max_attempts {
                tracing::error!(attempts = attempt, error = %err, "LLM retry budget exhausted");
                return Err(LlmUnavailable {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.config.retry.delay_for(attempt, err.retry_after());
            tracing::warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "LLM request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
