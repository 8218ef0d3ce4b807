//! 任务过程事件：可序列化为 JSON，供 CLI / 前端展示或订阅

use serde::Serialize;

use crate::core::TaskStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    TaskStarted {
        task_id: String,
        description: String,
        platform: String,
    },
    /// 召回的历史 Episode 数量
    MemoryRecall { exact: usize, similar: usize },
    /// 计划就绪（replayed = 复用了历史成功计划）
    Planned {
        revision: u32,
        steps: usize,
        replayed: bool,
    },
    StepStarted {
        index: usize,
        revision: u32,
        summary: String,
    },
    StepFinished {
        index: usize,
        revision: u32,
        passed: bool,
        latency_ms: u64,
        detail: Option<String>,
    },
    /// 进入修复（attempt 从 1 开始）
    Repairing {
        attempt: u32,
        max: u32,
        reason: String,
    },
    Completed {
        task_id: String,
        status: TaskStatus,
        cancelled: bool,
    },
    MemoryRecorded { episode_id: String },
    Error { text: String },
}
