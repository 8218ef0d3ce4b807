//! 任务状态机
//!
//! Created → Planning → Executing → (Repairing ⇄ Executing) → Completed(Succeeded | Failed | PartiallySucceeded)。
//! 非法转换返回 IllegalTransition，Completed 为终态。

use serde::Serialize;
use thiserror::Error;

use crate::core::TaskStatus;

/// 控制器阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "status", rename_all = "snake_case")]
pub enum TaskPhase {
    Created,
    Planning,
    Executing,
    Repairing,
    Completed(TaskStatus),
}

impl TaskPhase {
    /// 投影为对外的任务状态
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskPhase::Created => TaskStatus::Pending,
            TaskPhase::Planning | TaskPhase::Executing | TaskPhase::Repairing => TaskStatus::Running,
            TaskPhase::Completed(status) => *status,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Illegal task transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: TaskPhase,
    pub to: TaskPhase,
}

/// 单个任务的状态机；记录经过的阶段便于诊断
#[derive(Debug, Clone)]
pub struct TaskMachine {
    phase: TaskPhase,
    history: Vec<TaskPhase>,
}

impl Default for TaskMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskMachine {
    pub fn new() -> Self {
        Self {
            phase: TaskPhase::Created,
            history: vec![TaskPhase::Created],
        }
    }

    pub fn phase(&self) -> TaskPhase {
        self.phase
    }

    pub fn history(&self) -> &[TaskPhase] {
        &self.history
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.phase, TaskPhase::Completed(_))
    }

    pub fn can_transition(from: TaskPhase, to: TaskPhase) -> bool {
        use TaskPhase::{Completed, Created, Executing, Planning, Repairing};
        match (from, to) {
            (Created, Planning) => true,
            (Planning, Executing) => true,
            (Executing, Repairing) => true,
            (Repairing, Executing) => true,
            (Created | Planning | Repairing, Completed(s)) => {
                matches!(s, TaskStatus::Failed | TaskStatus::PartiallySucceeded)
            }
            (Executing, Completed(s)) => s.is_terminal(),
            _ => false,
        }
    }

    pub fn transition(&mut self, to: TaskPhase) -> Result<(), IllegalTransition> {
        if !Self::can_transition(self.phase, to) {
            return Err(IllegalTransition {
                from: self.phase,
                to,
            });
        }
        tracing::debug!(from = ?self.phase, to = ?to, "task transition");
        self.phase = to;
        self.history.push(to);
        Ok(())
    }
}
