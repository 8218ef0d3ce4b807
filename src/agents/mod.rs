//! 智能体层：Decomposer（分解 / 修复）、Supervisor（判定）、Controller（编排状态机）、AgentHub（多任务）

pub mod controller;
pub mod decomposer;
pub mod events;
pub mod hub;
pub mod supervisor;

pub use controller::{Controller, ControllerConfig, TaskReport};
pub use decomposer::{parse_steps, DecompositionContext, Decomposer, DEFAULT_SYSTEM_PROMPT};
pub use events::TaskEvent;
pub use hub::AgentHub;
pub use supervisor::{StepObservation, Supervisor};
