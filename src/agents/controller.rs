//! Controller：单个任务的编排状态机
//!
//! Created → Planning（召回记忆 + 分解 / 回放）→ Executing（逐步执行与判定）→ 失败时 Repairing（生成修复后缀）⇄ Executing
//! → Completed。每次运行无论结果如何都恰好写入一条 Episode。
//! 所有外部等待点（网关、驱动、采集、记忆召回）都与 CancellationToken 竞争；记录 Episode 在取消检查之外进行。

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::agents::{DecompositionContext, Decomposer, StepObservation, Supervisor, TaskEvent};
use crate::config::Platform;
use crate::core::{
    ExecutionResult, FailureReason, Plan, RecoveryAction, RecoveryEngine, Step, Task, TaskError,
    TaskMachine, TaskPhase, TaskStatus, Verdict,
};
use crate::driver::{DriverError, Executor};
use crate::memory::{Episode, Memory, Recall};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// 单个任务允许的最大修复次数
    pub max_repairs: u32,
    /// 修复预算耗尽时，已有通过步骤则记为 PartiallySucceeded
    pub keep_partial_results: bool,
    /// 最佳精确匹配为成功时直接复用其计划
    pub strict_replay: bool,
    /// 注入分解 prompt 的历史 Episode 上限
    pub max_hints: usize,
    pub platform: Platform,
    pub device_id: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_repairs: 3,
            keep_partial_results: false,
            strict_replay: false,
            max_hints: 3,
            platform: Platform::Android,
            device_id: None,
        }
    }
}

/// 任务运行报告
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task: Task,
    pub status: TaskStatus,
    pub plan: Plan,
    pub results: Vec<ExecutionResult>,
    pub repairs: u32,
    pub replayed: bool,
    pub episode_id: String,
    pub error: Option<String>,
    pub cancelled: bool,
    pub phases: Vec<TaskPhase>,
}

impl TaskReport {
    pub fn passed_steps(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }
}

/// 单次运行中的可变状态；出错时仍需据此写 Episode
struct TaskRun {
    task: Task,
    machine: TaskMachine,
    plan: Plan,
    results: Vec<ExecutionResult>,
    corrections: Vec<String>,
    repairs: u32,
    replayed: bool,
}

impl TaskRun {
    fn any_passed(&self) -> bool {
        self.results.iter().any(|r| r.passed())
    }
}

/// 与取消令牌竞争；取消优先
async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, TaskError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TaskError::Cancelled),
        out = fut => Ok(out),
    }
}

pub struct Controller {
    decomposer: Arc<Decomposer>,
    executor: Arc<dyn Executor>,
    supervisor: Arc<Supervisor>,
    memory: Memory,
    recovery: RecoveryEngine,
    config: ControllerConfig,
    event_tx: Option<UnboundedSender<TaskEvent>>,
}

impl Controller {
    pub fn new(
        decomposer: Arc<Decomposer>,
        executor: Arc<dyn Executor>,
        supervisor: Arc<Supervisor>,
        memory: Memory,
        config: ControllerConfig,
    ) -> Self {
        Self {
            decomposer,
            executor,
            supervisor,
            memory,
            recovery: RecoveryEngine::new(),
            config,
            event_tx: None,
        }
    }

    pub fn with_events(mut self, tx: UnboundedSender<TaskEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    fn emit(&self, ev: TaskEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(ev);
        }
    }

    /// 按配置的平台 / 设备创建任务
    pub fn new_task(&self, description: impl Into<String>) -> Task {
        Task::new(description, self.config.platform).with_device(self.config.device_id.clone())
    }

    pub async fn run(&self, description: impl Into<String>) -> Result<TaskReport, TaskError> {
        self.run_task(self.new_task(description), CancellationToken::new())
            .await
    }

    /// 运行任务直至终态并写入 Episode；仅在 Episode 写入失败时返回 Err
    pub async fn run_task(
        &self,
        task: Task,
        cancel: CancellationToken,
    ) -> Result<TaskReport, TaskError> {
        tracing::info!(task = %task.id, description = %task.description, platform = %task.platform, "task started");
        self.emit(TaskEvent::TaskStarted {
            task_id: task.id.clone(),
            description: task.description.clone(),
            platform: task.platform.to_string(),
        });

        let mut run = TaskRun {
            task,
            machine: TaskMachine::new(),
            plan: Plan::new(Vec::new()),
            results: Vec::new(),
            corrections: Vec::new(),
            repairs: 0,
            replayed: false,
        };

        let outcome = self.drive(&mut run, &cancel).await;
        let (status, error, cancelled) = match outcome {
            Ok(status) => (status, None, false),
            Err(TaskError::Cancelled) => {
                tracing::warn!(task = %run.task.id, "task cancelled");
                (TaskStatus::Failed, Some(TaskError::Cancelled.to_string()), true)
            }
            Err(err @ TaskError::RepairBudgetExhausted { .. }) => {
                let status = if self.config.keep_partial_results && run.any_passed() {
                    TaskStatus::PartiallySucceeded
                } else {
                    TaskStatus::Failed
                };
                tracing::warn!(task = %run.task.id, error = %err, status = %status, "task stopped");
                (status, Some(err.to_string()), false)
            }
            Err(err) => {
                tracing::error!(task = %run.task.id, error = %err, "task failed");
                self.emit(TaskEvent::Error {
                    text: err.to_string(),
                });
                (TaskStatus::Failed, Some(err.to_string()), false)
            }
        };

        if let Err(e) = run.machine.transition(TaskPhase::Completed(status)) {
            tracing::error!(error = %e, "unexpected terminal transition");
        }
        run.task.status = status;
        tracing::info!(task = %run.task.id, status = %status, results = run.results.len(), repairs = run.repairs, "task completed");
        self.emit(TaskEvent::Completed {
            task_id: run.task.id.clone(),
            status,
            cancelled,
        });

        let mut episode = Episode::new(&run.task, run.plan.clone(), run.results.clone(), status);
        episode.corrections = run.corrections.clone();
        episode.cancelled = cancelled;
        episode.error = error.clone();
        if let Err(e) = self.memory.record(&episode).await {
            tracing::error!(task = %run.task.id, error = %e, "failed to record episode");
            self.emit(TaskEvent::Error {
                text: e.to_string(),
            });
            return Err(e.into());
        }
        self.emit(TaskEvent::MemoryRecorded {
            episode_id: episode.id.clone(),
        });

        Ok(TaskReport {
            task: run.task,
            status,
            plan: run.plan,
            results: run.results,
            repairs: run.repairs,
            replayed: run.replayed,
            episode_id: episode.id,
            error,
            cancelled,
            phases: run.machine.history().to_vec(),
        })
    }

    /// 规划 + 执行 + 修复；返回 Ok(终态) 或导致终止的错误
    async fn drive(&self, run: &mut TaskRun, cancel: &CancellationToken) -> Result<TaskStatus, TaskError> {
        run.machine.transition(TaskPhase::Planning)?;
        let recall = match cancellable(cancel, self.memory.recall(&run.task)).await? {
            Ok(recall) => recall,
            Err(e) => {
                tracing::warn!(error = %e, "memory recall failed, planning without hints");
                Recall::default()
            }
        };
        self.emit(TaskEvent::MemoryRecall {
            exact: recall.exact.len(),
            similar: recall.similar.len(),
        });

        run.plan = match self.replay_candidate(&recall) {
            Some(plan) => {
                tracing::info!(task = %run.task.id, steps = plan.len(), "replaying stored plan");
                run.replayed = true;
                plan
            }
            None => {
                let context = DecompositionContext::with_hints(recall.hints(self.config.max_hints));
                cancellable(cancel, self.decomposer.decompose(&run.task, &context)).await??
            }
        };
        self.emit(TaskEvent::Planned {
            revision: run.plan.revision(),
            steps: run.plan.len(),
            replayed: run.replayed,
        });

        run.machine.transition(TaskPhase::Executing)?;
        let mut cursor = 0usize;
        while let Some(step) = run.plan.step(cursor).cloned() {
            let revision = run.plan.revision();
            self.emit(TaskEvent::StepStarted {
                index: step.index,
                revision,
                summary: step.summary(),
            });
            let (result, driver_error) = self.execute_step(&step, revision, cancel).await?;
            self.emit(TaskEvent::StepFinished {
                index: step.index,
                revision,
                passed: result.passed(),
                latency_ms: result.latency_ms,
                detail: result.failure_detail.clone(),
            });
            let reason = match &result.verdict {
                Verdict::Pass => None,
                Verdict::Fail(reason) => Some(reason.clone()),
            };
            run.results.push(result);

            let Some(reason) = reason else {
                cursor += 1;
                continue;
            };

            let err = match driver_error {
                Some(e) => TaskError::StepExecution(e),
                None => TaskError::AssertionFailure(reason.clone()),
            };
            if self.recovery.handle(&err) != RecoveryAction::Repair {
                return Err(err);
            }
            if run.repairs >= self.config.max_repairs {
                run.corrections.push(format!(
                    "step {} `{}` still failing after {} repair(s): {}",
                    step.index + 1,
                    step.target,
                    run.repairs,
                    reason
                ));
                return Err(TaskError::RepairBudgetExhausted {
                    attempts: run.repairs,
                });
            }

            run.repairs += 1;
            run.machine.transition(TaskPhase::Repairing)?;
            tracing::warn!(
                task = %run.task.id,
                step = step.index,
                attempt = run.repairs,
                max = self.config.max_repairs,
                reason = %reason,
                "step failed, repairing"
            );
            self.emit(TaskEvent::Repairing {
                attempt: run.repairs,
                max: self.config.max_repairs,
                reason: reason.to_string(),
            });
            run.corrections.push(format!(
                "repair {}: step {} {} failed ({})",
                run.repairs,
                step.index + 1,
                step.summary(),
                reason
            ));

            run.plan = cancellable(
                cancel,
                self.decomposer.repair(&run.task, &run.plan, cursor, &reason),
            )
            .await??;
            run.machine.transition(TaskPhase::Executing)?;
            self.emit(TaskEvent::Planned {
                revision: run.plan.revision(),
                steps: run.plan.len(),
                replayed: false,
            });
        }

        Ok(TaskStatus::Succeeded)
    }

    /// 严格回放：最佳精确匹配成功时复用其计划（作为 revision 0）
    fn replay_candidate(&self, recall: &Recall) -> Option<Plan> {
        if !self.config.strict_replay {
            return None;
        }
        let best = recall.best().filter(|e| e.succeeded())?;
        if best.plan.is_empty() {
            return None;
        }
        Some(Plan::new(best.plan.steps().to_vec()))
    }

    /// prepare → 前置采集 → 执行 → 后置采集 → 判定
    async fn execute_step(
        &self,
        step: &Step,
        revision: u32,
        cancel: &CancellationToken,
    ) -> Result<(ExecutionResult, Option<DriverError>), TaskError> {
        let start = Instant::now();
        let failed = |e: DriverError| -> Result<(ExecutionResult, Option<DriverError>), TaskError> {
            let verdict = Verdict::Fail(FailureReason::execution(e.to_string()));
            let result = ExecutionResult::new(
                step,
                revision,
                None,
                verdict,
                start.elapsed().as_millis() as u64,
            );
            Ok((result, Some(e)))
        };

        if let Err(e) = cancellable(cancel, self.executor.prepare(step)).await? {
            return failed(e);
        }
        let pre = match cancellable(cancel, self.executor.capture_state()).await? {
            Ok(snapshot) => snapshot,
            Err(e) => return failed(e),
        };
        let outcome = cancellable(cancel, self.executor.execute(step)).await?;
        let post = match cancellable(cancel, self.executor.capture_state()).await? {
            Ok(snapshot) => {
                tracing::debug!(step = step.index, state = %snapshot.describe(), "post-action state");
                Some(snapshot)
            }
            Err(e) => {
                tracing::warn!(step = step.index, error = %e, "post-action capture failed");
                None
            }
        };

        let latency_ms = match &outcome {
            Ok(o) => o.latency.as_millis() as u64,
            Err(_) => start.elapsed().as_millis() as u64,
        };
        let driver_error = outcome.as_ref().err().cloned();
        let observation = StepObservation { pre, post, outcome };
        let verdict = self.supervisor.validate(step, &observation);
        let observed = observation.post.as_ref().map(|s| s.state_ref());
        Ok((
            ExecutionResult::new(step, revision, observed, verdict, latency_ms),
            driver_error,
        ))
    }
}
