//! 核心层：领域模型（Task / Plan / ExecutionResult）、错误与恢复、状态机、会话监管、组件构建

pub mod builder;
pub mod error;
pub mod plan;
pub mod recovery;
pub mod result;
pub mod session_supervisor;
pub mod state;
pub mod task;

pub use builder::AgentBuilder;
pub use error::{RecoveryAction, TaskError};
pub use plan::{ActionKind, ExpectedOutcome, Plan, Step};
pub use recovery::RecoveryEngine;
pub use result::{ExecutionResult, FailureReason, StateRef, Verdict};
pub use session_supervisor::SessionSupervisor;
pub use state::{IllegalTransition, TaskMachine, TaskPhase};
pub use task::{normalize_description, Task, TaskSignature, TaskStatus};
