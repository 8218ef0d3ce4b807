//! Agent 构建器：从 AppConfig 组装网关、Decomposer、Supervisor、记忆与驱动
//!
//! CLI 与测试共用同一条装配路径；测试可注入 LLM 客户端、Episode 存储与驱动注册表。

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::agents::{
    AgentHub, Controller, Decomposer, Supervisor, TaskEvent, DEFAULT_SYSTEM_PROMPT,
};
use crate::assertions::{PredicateRegistry, SnapshotAssertions};
use crate::config::AppConfig;
use crate::core::TaskError;
use crate::driver::DriverRegistry;
use crate::llm::{LlmClient, LlmGateway, MockLlmClient, OpenAiClient};
use crate::memory::{EpisodeStore, InMemoryEpisodeStore, Memory, SqliteEpisodeStore};

/// 按配置选择 LLM 后端：provider = mock 或缺少 OPENAI_API_KEY 时使用 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = std::env::var("OPENAI_API_KEY").ok();

    if provider == "mock" {
        tracing::info!("Using Mock LLM (provider = mock)");
        return Arc::new(MockLlmClient);
    }
    match api_key {
        Some(key) => {
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
            Arc::new(OpenAiClient::new(cfg.llm.base_url.as_deref(), Some(&key)))
        }
        None => {
            tracing::warn!("OPENAI_API_KEY not set, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

pub struct AgentBuilder {
    config: AppConfig,
    drivers: DriverRegistry,
    predicates: PredicateRegistry,
    llm: Option<Arc<dyn LlmClient>>,
    store: Option<Arc<dyn EpisodeStore>>,
    event_tx: Option<UnboundedSender<TaskEvent>>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            drivers: DriverRegistry::new(),
            predicates: PredicateRegistry::new(),
            llm: None,
            store: None,
            event_tx: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn with_drivers(mut self, drivers: DriverRegistry) -> Self {
        self.drivers = drivers;
        self
    }

    /// 自定义断言谓词
    pub fn with_predicates(mut self, predicates: PredicateRegistry) -> Self {
        self.predicates = predicates;
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn EpisodeStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_events(mut self, tx: UnboundedSender<TaskEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        self.llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(&self.config))
    }

    pub fn build_gateway(&self) -> Arc<LlmGateway> {
        Arc::new(LlmGateway::new(
            self.build_llm(),
            self.config.llm.gateway_config(),
        ))
    }

    /// 分解 system prompt：配置路径优先，其次 config/prompts/decomposer.md，最后内置默认
    pub fn system_prompt(&self) -> String {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(path) = &self.config.agent.prompt_path {
            candidates.push(path.clone());
        }
        candidates.push(PathBuf::from("config/prompts/decomposer.md"));
        candidates.push(PathBuf::from("../config/prompts/decomposer.md"));
        candidates
            .into_iter()
            .find_map(|p| std::fs::read_to_string(p).ok())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
    }

    pub fn build_memory(&self) -> Result<Memory, TaskError> {
        let store: Arc<dyn EpisodeStore> = match &self.store {
            Some(store) => store.clone(),
            None if self.config.memory.in_memory => Arc::new(InMemoryEpisodeStore::new()),
            None => Arc::new(SqliteEpisodeStore::open(&self.config.memory.path)?),
        };
        let memory = Memory::new(store);
        Ok(if self.config.agent.near_match {
            memory.with_near_match(self.config.agent.near_match_threshold)
        } else {
            memory
        })
    }

    pub fn build_controller(&self) -> Result<Controller, TaskError> {
        let executor = self.drivers.create(&self.config.device)?;
        let decomposer = Decomposer::new(self.build_gateway(), self.config.llm.completion_config())
            .with_system_prompt(self.system_prompt());
        let supervisor = Supervisor::new(Arc::new(SnapshotAssertions::with_predicates(
            self.predicates.clone(),
        )));

        let mut controller_config = self.config.agent.controller_config();
        controller_config.platform = self.config.device.platform;
        controller_config.device_id = self
            .config
            .device
            .resolved_device_id()
            .map_err(TaskError::Config)?;

        let controller = Controller::new(
            Arc::new(decomposer),
            executor,
            Arc::new(supervisor),
            self.build_memory()?,
            controller_config,
        );
        Ok(match &self.event_tx {
            Some(tx) => controller.with_events(tx.clone()),
            None => controller,
        })
    }

    pub fn build_hub(&self) -> Result<AgentHub, TaskError> {
        Ok(AgentHub::new(Arc::new(self.build_controller()?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::parse_steps;
    use crate::config::{Framework, Platform};
    use crate::core::ActionKind;
    use crate::llm::{CompletionConfig, Message};

    fn mock_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        cfg.memory.in_memory = true;
        cfg
    }

    #[tokio::test]
    async fn test_mock_provider_selected() {
        let gateway = AgentBuilder::new(mock_config()).build_gateway();
        let messages = vec![Message::user("Task: open settings\nPlatform: android")];
        let raw = gateway
            .complete(&messages, &CompletionConfig::default())
            .await
            .unwrap();
        let steps = parse_steps(&raw).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].action, ActionKind::Assert);
        assert_eq!(gateway.attempts(), 1);
    }

    #[test]
    fn test_build_requires_registered_driver() {
        let builder = AgentBuilder::new(mock_config());
        assert!(matches!(builder.build_controller(), Err(TaskError::Config(_))));
    }

    #[test]
    fn test_build_with_mock_drivers() {
        let mut cfg = mock_config();
        cfg.device.platform = Platform::Web;
        cfg.device.framework = Framework::Selenium;
        cfg.device.device_id = Some("chrome".into());
        let controller = AgentBuilder::new(cfg)
            .with_drivers(DriverRegistry::with_mock_drivers())
            .build_controller()
            .unwrap();
        assert_eq!(controller.config().platform, Platform::Web);
        assert_eq!(controller.config().device_id.as_deref(), Some("chrome"));
    }

    #[test]
    fn test_default_system_prompt() {
        let mut cfg = mock_config();
        cfg.agent.prompt_path = Some(PathBuf::from("/nonexistent/prompt.md"));
        let prompt = AgentBuilder::new(cfg).system_prompt();
        assert!(prompt.contains("JSON"));
    }
}
