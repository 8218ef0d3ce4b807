//! AgentHub：并发运行多个任务，共享同一个 Controller（因而共享网关的并发与速率限制）
//!
//! 每个任务拿会话的子取消令牌；cancel_all 取消全部在途任务，已取消的任务仍会写入 Episode。

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::task::JoinHandle;

use crate::agents::{Controller, TaskReport};
use crate::core::{SessionSupervisor, TaskError};

pub struct AgentHub {
    controller: Arc<Controller>,
    session: SessionSupervisor,
}

impl AgentHub {
    pub fn new(controller: Arc<Controller>) -> Self {
        Self {
            controller,
            session: SessionSupervisor::new(),
        }
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    pub fn session(&self) -> &SessionSupervisor {
        &self.session
    }

    /// 后台运行单个任务
    pub fn spawn(&self, description: impl Into<String>) -> JoinHandle<Result<TaskReport, TaskError>> {
        let controller = self.controller.clone();
        let task = controller.new_task(description);
        let cancel = self.session.child_token();
        tokio::spawn(async move { controller.run_task(task, cancel).await })
    }

    /// 并发运行一组任务，结果顺序与输入一致
    pub async fn run_all<I, S>(&self, descriptions: I) -> Vec<Result<TaskReport, TaskError>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let runs = descriptions.into_iter().map(|d| {
            let task = self.controller.new_task(d);
            let cancel = self.session.child_token();
            let controller = self.controller.clone();
            async move { controller.run_task(task, cancel).await }
        });
        let results = join_all(runs).await;
        tracing::info!(
            tasks = results.len(),
            ok = results.iter().filter(|r| r.is_ok()).count(),
            "hub run finished"
        );
        results
    }

    pub fn cancel_all(&self) {
        tracing::warn!("cancelling all tasks");
        self.session.cancel();
    }
}
