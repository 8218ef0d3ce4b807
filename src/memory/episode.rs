//! Episode：一次任务运行的完整记录（计划、逐步结果、修复诊断、最终状态）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Platform;
use crate::core::{ExecutionResult, Plan, Task, TaskSignature, TaskStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub signature: TaskSignature,
    pub description: String,
    pub platform: Platform,
    /// 最终生效的计划
    pub plan: Plan,
    pub results: Vec<ExecutionResult>,
    /// 修复诊断与人工纠正
    #[serde(default)]
    pub corrections: Vec<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
    /// 写入顺序，由存储分配
    #[serde(default)]
    pub sequence: u64,
}

impl Episode {
    pub fn new(task: &Task, plan: Plan, results: Vec<ExecutionResult>, status: TaskStatus) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            signature: task.signature.clone(),
            description: task.description.clone(),
            platform: task.platform,
            plan,
            results,
            corrections: Vec::new(),
            status,
            cancelled: false,
            error: None,
            recorded_at: Utc::now(),
            sequence: 0,
        }
    }

    /// 通过步骤占比；无结果时为 0
    pub fn score(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        let passed = self.results.iter().filter(|r| r.passed()).count();
        passed as f64 / self.results.len() as f64
    }

    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Succeeded && !self.cancelled
    }

    /// 写入 prompt 的摘要
    pub fn hint(&self) -> String {
        let mut s = format!(
            "- \"{}\" -> {} (score {:.2}, plan rev {})\n",
            self.description,
            self.status,
            self.score(),
            self.plan.revision()
        );
        for step in self.plan.steps() {
            s.push_str(&format!("    {}. {}\n", step.index + 1, step.summary()));
        }
        for c in &self.corrections {
            s.push_str(&format!("    note: {c}\n"));
        }
        s
    }
}
