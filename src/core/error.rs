//! 任务错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 TaskError 决定 RetryWithPrompt / Repair / Abort。

use thiserror::Error;

use crate::core::state::IllegalTransition;
use crate::core::FailureReason;
use crate::driver::DriverError;
use crate::llm::LlmUnavailable;
use crate::memory::MemoryError;

/// 任务运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum TaskError {
    /// 网关重试预算耗尽或不可重试的提供方错误
    #[error(transparent)]
    LlmUnavailable(#[from] LlmUnavailable),

    #[error("Decomposition parse error: {0}")]
    DecompositionParse(String),

    #[error("Step execution failed: {0}")]
    StepExecution(#[from] DriverError),

    #[error("Assertion failed: {0}")]
    AssertionFailure(FailureReason),

    #[error("Repair budget exhausted after {attempts} repair(s)")]
    RepairBudgetExhausted { attempts: u32 },

    #[error("Task cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    State(#[from] IllegalTransition),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 将纠正提示注入下一轮，让 LLM 重新输出（如计划 JSON 格式错误）
    RetryWithPrompt(String),
    /// 请求 Decomposer 生成修复后缀
    Repair,
    /// 终止当前任务
    Abort,
}
