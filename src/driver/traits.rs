//! 执行器抽象
//!
//! 每种平台 / 框架的驱动实现 Executor：执行单个 Step 并能采集当前状态。
//! 执行器只负责“做”，不做判定；判定由 Supervisor 完成。

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::Step;
use crate::driver::StateSnapshot;

/// 驱动层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Device unreachable: {0}")]
    Unreachable(String),

    #[error("Action rejected: {0}")]
    Rejected(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Action timed out after {0:?}")]
    Timeout(Duration),
}

/// 单个动作的执行结果（不含判定）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub latency: Duration,
    pub detail: String,
}

impl ActionOutcome {
    pub fn new(latency: Duration, detail: impl Into<String>) -> Self {
        Self {
            latency,
            detail: detail.into(),
        }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// 驱动名称（用于日志与审计）
    fn name(&self) -> &str;

    /// 执行前的准备（如等待元素出现），默认无操作
    async fn prepare(&self, _step: &Step) -> Result<(), DriverError> {
        Ok(())
    }

    async fn execute(&self, step: &Step) -> Result<ActionOutcome, DriverError>;

    /// 采集当前设备状态
    async fn capture_state(&self) -> Result<StateSnapshot, DriverError>;
}
