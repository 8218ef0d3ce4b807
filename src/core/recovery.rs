//! 错误恢复引擎
//!
//! 根据 TaskError 类型返回 RecoveryAction，供 Decomposer（计划解析失败时重新提示）与 Controller（步骤失败时修复）决策。

use crate::core::{RecoveryAction, TaskError};

/// 语义化错误恢复：将错误映射为可执行动作（重试提示 / 修复 / 终止）
#[derive(Debug, Default, Clone)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &TaskError) -> RecoveryAction {
        match err {
            TaskError::DecompositionParse(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous answer could not be parsed as a test plan: {raw}. \
                Reply with ONLY a JSON array of steps, no prose and no Markdown. \
                Every step must have a non-empty \"action\" and \"target\". \
                Example: [{{\"action\": \"click\", \"target\": \"login_button\", \"parameters\": {{}}, \
                \"description\": \"open the login form\"}}]"
            )),
            TaskError::AssertionFailure(_) | TaskError::StepExecution(_) => RecoveryAction::Repair,
            TaskError::LlmUnavailable(_)
            | TaskError::RepairBudgetExhausted { .. }
            | TaskError::Cancelled
            | TaskError::Config(_)
            | TaskError::Memory(_)
            | TaskError::State(_) => RecoveryAction::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FailureReason;
    use crate::driver::DriverError;
    use crate::llm::{LlmError, LlmUnavailable};

    #[test]
    fn test_recovery_parse_error() {
        let engine = RecoveryEngine::new();
        let err = TaskError::DecompositionParse("expected value at line 1".to_string());
        match engine.handle(&err) {
            RecoveryAction::RetryWithPrompt(msg) => {
                assert!(msg.contains("JSON"));
                assert!(msg.contains("expected value at line 1"));
            }
            other => panic!("Expected RetryWithPrompt, got {other:?}"),
        }
    }

    #[test]
    fn test_recovery_assertion_failure_repairs() {
        let engine = RecoveryEngine::new();
        let err = TaskError::AssertionFailure(FailureReason::new("has_text:username", "alice", ""));
        assert_eq!(engine.handle(&err), RecoveryAction::Repair);
    }

    #[test]
    fn test_recovery_driver_error_repairs() {
        let engine = RecoveryEngine::new();
        let err = TaskError::StepExecution(DriverError::Rejected("element disabled".into()));
        assert_eq!(engine.handle(&err), RecoveryAction::Repair);
    }

    #[test]
    fn test_recovery_llm_unavailable_aborts() {
        let engine = RecoveryEngine::new();
        let err = TaskError::LlmUnavailable(LlmUnavailable {
            attempts: 4,
            last: LlmError::RateLimited { retry_after_ms: 1000 },
        });
        assert_eq!(engine.handle(&err), RecoveryAction::Abort);
    }

    #[test]
    fn test_recovery_cancelled() {
        let engine = RecoveryEngine::new();
        assert_eq!(engine.handle(&TaskError::Cancelled), RecoveryAction::Abort);
    }
}
