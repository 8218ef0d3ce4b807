//! Sleepy - LLM 驱动的移动端 / Web UI 测试智能体
//!
//! 模块划分：
//! - **agents**: Decomposer（任务分解 / 修复）、Supervisor（步骤判定）、Controller（编排状态机）、AgentHub
//! - **assertions**: 断言子系统（内置断言 + 自定义谓词）
//! - **config**: 应用配置加载（TOML + 环境变量 + 旧版变量）
//! - **core**: 领域模型、错误与恢复、任务状态机、会话监管、组件构建
//! - **driver**: 执行器抽象、状态快照、超时包装、驱动注册表、模拟驱动
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）、限流重试网关
//! - **memory**: Episode 日志（内存 / SQLite）、排序与近似匹配
//! - **observability**: 日志初始化

pub mod agents;
pub mod assertions;
pub mod config;
pub mod core;
pub mod driver;
pub mod llm;
pub mod memory;
pub mod observability;

pub use agents::{AgentHub, Controller, TaskReport};
pub use core::{AgentBuilder, TaskError};
