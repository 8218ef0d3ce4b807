//! 执行器适配层：驱动抽象、状态快照、超时包装、注册表与模拟驱动

pub mod mock;
pub mod registry;
pub mod snapshot;
pub mod timed;
pub mod traits;

pub use mock::{MockDriver, ScriptedDriver};
pub use registry::{DriverFactory, DriverRegistry};
pub use snapshot::{StateSnapshot, UiElement};
pub use timed::TimedExecutor;
pub use traits::{ActionOutcome, DriverError, Executor};
