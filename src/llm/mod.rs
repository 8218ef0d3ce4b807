//! LLM 层：客户端抽象、OpenAI 兼容实现、Mock，以及带限流与重试的网关

pub mod gateway;
pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

pub use gateway::{GatewayConfig, GatewayPermit, LlmGateway, LlmUnavailable, RetryConfig};
pub use message::{Message, Role};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{CompletionConfig, LlmClient, LlmError};
