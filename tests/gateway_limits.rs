//! LLM 网关：并发上限、滑动窗口、重试预算

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use sleepy::llm::{
    CompletionConfig, GatewayConfig, LlmError, LlmGateway, Message, RetryConfig, ScriptedLlmClient,
};

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        min_wait: Duration::from_millis(1),
        max_wait: Duration::from_millis(5),
        jitter: false,
    }
}

fn prompt() -> Vec<Message> {
    vec![Message::system("plan"), Message::user("Task: log in")]
}

#[tokio::test]
async fn test_concurrency_never_exceeds_limit() {
    let client = Arc::new(ScriptedLlmClient::always("[]").with_delay(Duration::from_millis(30)));
    let gateway = Arc::new(LlmGateway::new(
        client.clone(),
        GatewayConfig {
            max_concurrent: 2,
            rate_limit_requests: 100,
            retry: fast_retry(0),
            ..GatewayConfig::default()
        },
    ));

    let calls = (0..8).map(|_| {
        let gateway = gateway.clone();
        async move { gateway.complete(&prompt(), &CompletionConfig::default()).await }
    });
    let results = join_all(calls).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert!(gateway.peak_in_flight() <= 2);
    assert!(client.peak_concurrency() <= 2);
    assert_eq!(gateway.in_flight(), 0);
    assert_eq!(gateway.attempts(), 8);
}

#[tokio::test]
async fn test_three_timeouts_then_success() {
    let client = Arc::new(ScriptedLlmClient::new(vec![
        Err(LlmError::Timeout),
        Err(LlmError::Timeout),
        Err(LlmError::Timeout),
        Ok("[]".to_string()),
    ]));
    let gateway = LlmGateway::new(
        client.clone(),
        GatewayConfig {
            retry: fast_retry(3),
            ..GatewayConfig::default()
        },
    );

    let text = gateway
        .complete(&prompt(), &CompletionConfig::default())
        .await
        .unwrap();
    assert_eq!(text, "[]");
    assert_eq!(gateway.attempts(), 4);
}

#[tokio::test]
async fn test_retry_budget_exhausted() {
    let client = Arc::new(ScriptedLlmClient::new(vec![
        Err(LlmError::Timeout),
        Err(LlmError::Timeout),
        Err(LlmError::Timeout),
        Err(LlmError::Server {
            status: 503,
            message: "overloaded".into(),
        }),
        Ok("never reached".to_string()),
    ]));
    let gateway = LlmGateway::new(
        client.clone(),
        GatewayConfig {
            retry: fast_retry(3),
            ..GatewayConfig::default()
        },
    );

    let err = gateway
        .complete(&prompt(), &CompletionConfig::default())
        .await
        .unwrap_err();
    assert_eq!(err.attempts, 4);
    assert!(matches!(err.last, LlmError::Server { status: 503, .. }));
    assert_eq!(client.calls().await, 4);
}

#[tokio::test]
async fn test_non_retryable_error_fails_fast() {
    let client = Arc::new(ScriptedLlmClient::new(vec![
        Err(LlmError::Auth("invalid api key".into())),
        Ok("[]".to_string()),
    ]));
    let gateway = LlmGateway::new(
        client.clone(),
        GatewayConfig {
            retry: fast_retry(5),
            ..GatewayConfig::default()
        },
    );

    let err = gateway
        .complete(&prompt(), &CompletionConfig::default())
        .await
        .unwrap_err();
    assert_eq!(err.attempts, 1);
    assert!(matches!(err.last, LlmError::Auth(_)));
    assert_eq!(client.calls().await, 1);
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let client = Arc::new(ScriptedLlmClient::always("[]").with_delay(Duration::from_millis(500)));
    let gateway = LlmGateway::new(
        client.clone(),
        GatewayConfig {
            request_timeout: Duration::from_millis(20),
            retry: fast_retry(1),
            ..GatewayConfig::default()
        },
    );

    let start = Instant::now();
    let err = gateway
        .complete(&prompt(), &CompletionConfig::default())
        .await
        .unwrap_err();
    assert_eq!(err.attempts, 2);
    assert_eq!(err.last, LlmError::Timeout);
    assert!(start.elapsed() < Duration::from_millis(400));
    // 超时被丢弃的调用不再计入在途
    assert_eq!(client.in_flight(), 0);
    assert_eq!(client.peak_concurrency(), 1);
}

#[tokio::test]
async fn test_rate_window_delays_excess_calls() {
    let client = Arc::new(ScriptedLlmClient::always("[]"));
    let gateway = LlmGateway::new(
        client,
        GatewayConfig {
            rate_limit_requests: 2,
            rate_limit_period: Duration::from_millis(150),
            retry: fast_retry(0),
            ..GatewayConfig::default()
        },
    );

    let start = Instant::now();
    for _ in 0..2 {
        gateway
            .complete(&prompt(), &CompletionConfig::default())
            .await
            .unwrap();
    }
    assert!(start.elapsed() < Duration::from_millis(100));

    gateway
        .complete(&prompt(), &CompletionConfig::default())
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_millis(140));
}

#[tokio::test]
async fn test_retry_after_hint_is_honored() {
    let client = Arc::new(ScriptedLlmClient::new(vec![
        Err(LlmError::RateLimited { retry_after_ms: 80 }),
        Ok("[]".to_string()),
    ]));
    let gateway = LlmGateway::new(
        client,
        GatewayConfig {
            retry: RetryConfig {
                max_wait: Duration::from_millis(500),
                ..fast_retry(2)
            },
            ..GatewayConfig::default()
        },
    );

    let start = Instant::now();
    gateway
        .complete(&prompt(), &CompletionConfig::default())
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_millis(80));
    assert_eq!(gateway.attempts(), 2);
}
