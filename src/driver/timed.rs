//! 带超时与审计日志的执行器包装
//!
//! 对 prepare / execute / capture_state 施加统一超时，超时转为 DriverError::Timeout；
//! 每次 execute 输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::timeout;

use crate::core::Step;
use crate::driver::{ActionOutcome, DriverError, Executor, StateSnapshot};

pub struct TimedExecutor {
    inner: Arc<dyn Executor>,
    timeout: Duration,
}

impl TimedExecutor {
    pub fn new(inner: Arc<dyn Executor>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl Executor for TimedExecutor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn prepare(&self, step: &Step) -> Result<(), DriverError> {
        timeout(self.timeout, self.inner.prepare(step))
            .await
            .map_err(|_| DriverError::Timeout(self.timeout))?
    }

    async fn execute(&self, step: &Step) -> Result<ActionOutcome, DriverError> {
        let start = Instant::now();
        let result = timeout(self.timeout, self.inner.execute(step)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "action_audit",
            "driver": self.inner.name(),
            "step": step.index,
            "action": step.action.as_str(),
            "target": step.target,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
        });
        tracing::info!(audit = %audit.to_string(), "action");

        match result {
            Ok(r) => r,
            Err(_) => Err(DriverError::Timeout(self.timeout)),
        }
    }

    async fn capture_state(&self) -> Result<StateSnapshot, DriverError> {
        timeout(self.timeout, self.inner.capture_state())
            .await
            .map_err(|_| DriverError::Timeout(self.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ActionKind;
    use crate::driver::{ScriptedDriver, UiElement};

    #[tokio::test]
    async fn test_slow_action_times_out() {
        let inner = ScriptedDriver::new(StateSnapshot::new(vec![UiElement::new("a")]))
            .with_delay(Duration::from_millis(200));
        let timed = TimedExecutor::new(Arc::new(inner), Duration::from_millis(20));
        let err = timed
            .execute(&Step::new(ActionKind::Click, "a"))
            .await
            .unwrap_err();
        assert_eq!(err, DriverError::Timeout(Duration::from_millis(20)));
    }
}
