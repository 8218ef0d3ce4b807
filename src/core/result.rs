//! 单步执行结果与 Verdict

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{ActionKind, Step};

/// 结构化失败原因：断言 id、预期、实际观察
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub assertion_id: String,
    pub expected: String,
    pub observed: String,
}

impl FailureReason {
    pub fn new(
        assertion_id: impl Into<String>,
        expected: impl Into<String>,
        observed: impl Into<String>,
    ) -> Self {
        Self {
            assertion_id: assertion_id.into(),
            expected: expected.into(),
            observed: observed.into(),
        }
    }

    /// 驱动层失败（设备不可达、动作被拒、超时）
    pub fn execution(observed: impl Into<String>) -> Self {
        Self::new("execution", "action completes on device", observed)
    }

    pub fn is_execution(&self) -> bool {
        self.assertion_id == "execution"
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {}, observed {}",
            self.assertion_id, self.expected, self.observed
        )
    }
}

/// Supervisor 对单步的判定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail(FailureReason),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    pub fn reason(&self) -> Option<&FailureReason> {
        match self {
            Verdict::Pass => None,
            Verdict::Fail(r) => Some(r),
        }
    }
}

/// 观察到的状态引用（截图 id + UI 树 id）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRef {
    pub snapshot_id: String,
    pub screenshot_id: String,
    pub ui_tree_id: String,
}

/// 单步结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub step_index: usize,
    pub plan_revision: u32,
    pub action: ActionKind,
    pub target: String,
    pub observed: Option<StateRef>,
    pub verdict: Verdict,
    pub failure_detail: Option<String>,
    pub latency_ms: u64,
}

impl ExecutionResult {
    pub fn new(
        step: &Step,
        plan_revision: u32,
        observed: Option<StateRef>,
        verdict: Verdict,
        latency_ms: u64,
    ) -> Self {
        let failure_detail = verdict.reason().map(|r| r.to_string());
        Self {
            step_index: step.index,
            plan_revision,
            action: step.action.clone(),
            target: step.target.clone(),
            observed,
            verdict,
            failure_detail,
            latency_ms,
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict.is_pass()
    }
}
