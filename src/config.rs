//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SLEEPY__*` 覆盖（双下划线表示嵌套，如 `SLEEPY__LLM__MODEL=gpt-4o`），
//! 最后兼容旧版扁平变量（`SLEEPYTESTING_PLATFORM`、`SLEEPYTESTING_ALLOWED_ANDROID_DEVICES` 等）。

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agents::ControllerConfig;
use crate::llm::{CompletionConfig, GatewayConfig, RetryConfig};

/// 目标平台
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
    Web,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
            Platform::Web => "web",
        }
    }

    /// 该平台已知可用的自动化框架
    pub fn supported_frameworks(&self) -> &'static [Framework] {
        match self {
            Platform::Android => &[Framework::Uiautomator2, Framework::Appium],
            Platform::Ios => &[Framework::Appium],
            Platform::Web => &[Framework::Selenium],
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            "web" => Ok(Platform::Web),
            other => Err(format!(
                "Invalid platform: {other}. Must be one of [android, ios, web]"
            )),
        }
    }
}

/// UI 自动化框架
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Uiautomator2,
    Appium,
    Selenium,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::Uiautomator2 => "uiautomator2",
            Framework::Appium => "appium",
            Framework::Selenium => "selenium",
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framework {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "uiautomator2" => Ok(Framework::Uiautomator2),
            "appium" => Ok(Framework::Appium),
            "selenium" => Ok(Framework::Selenium),
            other => Err(format!(
                "Invalid framework: {other}. Must be one of [uiautomator2, appium, selenium]"
            )),
        }
    }
}

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub device: DeviceSection,
    pub agent: AgentSection,
    pub memory: MemorySection,
}

/// [llm] 段：后端、模型参数、超时、重试与限流
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai（OpenAI 兼容端点）/ mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// 单次请求超时（秒），超时按可重试错误处理
    pub request_timeout_secs: u64,
    pub retry: RetrySection,
    pub rate_limit: RateLimitSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4".to_string(),
            base_url: None,
            temperature: 0.7,
            max_tokens: 2000,
            request_timeout_secs: 60,
            retry: RetrySection::default(),
            rate_limit: RateLimitSection::default(),
        }
    }
}

impl LlmSection {
    pub fn completion_config(&self) -> CompletionConfig {
        CompletionConfig {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            max_concurrent: self.rate_limit.max_concurrent.max(1),
            rate_limit_requests: self.rate_limit.requests.max(1),
            rate_limit_period: Duration::from_secs(self.rate_limit.period_secs.max(1)),
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            retry: RetryConfig {
                max_retries: self.retry.max_retries,
                min_wait: Duration::from_millis(self.retry.min_wait_ms),
                max_wait: Duration::from_millis(self.retry.max_wait_ms.max(self.retry.min_wait_ms)),
                jitter: self.retry.jitter,
            },
        }
    }
}

/// [llm.retry] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub min_wait_ms: u64,
    pub max_wait_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 5,
            min_wait_ms: 1_000,
            max_wait_ms: 30_000,
            jitter: true,
        }
    }
}

/// [llm.rate_limit] 段：进程级并发上限与滑动窗口请求数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub max_concurrent: usize,
    pub requests: usize,
    pub period_secs: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            requests: 60,
            period_secs: 60,
        }
    }
}

/// [device] 段：平台、框架、设备 ID 与白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    pub platform: Platform,
    pub framework: Framework,
    pub android_device: Option<String>,
    pub ios_device: Option<String>,
    /// 旧版通用设备 ID（平台专属 ID 未设置时使用）
    pub device_id: Option<String>,
    pub allowed_android_devices: Vec<String>,
    pub allowed_ios_devices: Vec<String>,
    /// 单次设备动作超时（秒）
    pub action_timeout_secs: u64,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            platform: Platform::Android,
            framework: Framework::Uiautomator2,
            android_device: None,
            ios_device: None,
            device_id: None,
            allowed_android_devices: Vec::new(),
            allowed_ios_devices: Vec::new(),
            action_timeout_secs: 30,
        }
    }
}

impl DeviceSection {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs.max(1))
    }

    /// 校验平台与框架组合
    pub fn validate_framework(&self) -> Result<(), String> {
        let supported = self.platform.supported_frameworks();
        if supported.contains(&self.framework) {
            return Ok(());
        }
        let names: Vec<&str> = supported.iter().map(|f| f.as_str()).collect();
        Err(format!(
            "Unsupported framework '{}' for platform '{}'. Supported frameworks: {:?}",
            self.framework, self.platform, names
        ))
    }

    /// 解析当前平台应使用的设备 ID，并按白名单校验；未配置设备时返回 None
    pub fn resolved_device_id(&self) -> Result<Option<String>, String> {
        let device = match self.platform {
            Platform::Android => self.android_device.clone().or_else(|| self.device_id.clone()),
            Platform::Ios => self.ios_device.clone().or_else(|| self.device_id.clone()),
            Platform::Web => self.device_id.clone(),
        };
        let Some(device) = device.filter(|d| !d.trim().is_empty()) else {
            return Ok(None);
        };
        let allowed: &[String] = match self.platform {
            Platform::Android => &self.allowed_android_devices,
            Platform::Ios => &self.allowed_ios_devices,
            Platform::Web => &[],
        };
        if !allowed.is_empty() && !allowed.iter().any(|d| d == &device) {
            return Err(format!(
                "Device ID '{}' not in allowed list for {}: {:?}",
                device, self.platform, allowed
            ));
        }
        Ok(Some(device))
    }
}

/// [agent] 段：修复预算、部分成功、严格回放、近似匹配
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 单个任务允许的最大修复次数
    pub max_repairs: u32,
    /// 修复预算耗尽时，若已有通过的步骤则标记为 PartiallySucceeded
    pub keep_partial_results: bool,
    /// 直接复用历史成功计划，跳过分解
    pub strict_replay: bool,
    /// 注入分解 prompt 的历史 Episode 数量上限
    pub max_hints: usize,
    /// 是否启用描述近似匹配（仅作提示，不替代计划）
    pub near_match: bool,
    pub near_match_threshold: f64,
    /// 分解 / 修复 system prompt 文件，未设置时按默认路径查找
    pub prompt_path: Option<PathBuf>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_repairs: 3,
            keep_partial_results: false,
            strict_replay: false,
            max_hints: 3,
            near_match: false,
            near_match_threshold: 0.6,
            prompt_path: None,
        }
    }
}

impl AgentSection {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            max_repairs: self.max_repairs,
            keep_partial_results: self.keep_partial_results,
            strict_replay: self.strict_replay,
            max_hints: self.max_hints,
            ..ControllerConfig::default()
        }
    }
}

/// [memory] 段：Episode 日志存放位置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// SQLite 文件路径
    pub path: PathBuf,
    /// 仅用内存（进程退出即丢失，适合试跑）
    pub in_memory: bool,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("memory/episodes.db"),
            in_memory: false,
        }
    }
}

/// 从 config 目录加载配置，环境变量 SLEEPY__* 与旧版 SLEEPYTESTING_* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（可覆盖前面的键）；文件不存在时报错
/// 3. 叠加环境变量 SLEEPY__*（双下划线表示嵌套键，白名单以逗号分隔）
/// 4. 叠加旧版扁平变量，最后校验平台 / 框架 / 设备白名单
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        if !path.is_file() {
            return Err(config::ConfigError::NotFound(format!(
                "config file {}",
                path.display()
            )));
        }
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SLEEPY")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("device.allowed_android_devices")
            .with_list_parse_key("device.allowed_ios_devices")
            .try_parsing(true),
    );

    let mut cfg: AppConfig = builder.build()?.try_deserialize()?;
    apply_legacy_env(&mut cfg, |key| std::env::var(key).ok())
        .map_err(config::ConfigError::Message)?;
    cfg.device
        .validate_framework()
        .map_err(config::ConfigError::Message)?;
    cfg.device
        .resolved_device_id()
        .map_err(config::ConfigError::Message)?;
    Ok(cfg)
}

/// 旧版扁平环境变量覆盖；`lookup` 便于测试注入
pub fn apply_legacy_env<F>(cfg: &mut AppConfig, lookup: F) -> Result<(), String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("SLEEPYTESTING_PLATFORM") {
        cfg.device.platform = v.parse()?;
    }
    if let Some(v) = lookup("SLEEPYTESTING_FRAMEWORK") {
        cfg.device.framework = v.parse()?;
    }
    if let Some(v) = lookup("SLEEPYTESTING_ANDROID_DEVICE") {
        cfg.device.android_device = Some(v);
    }
    if let Some(v) = lookup("SLEEPYTESTING_IOS_DEVICE") {
        cfg.device.ios_device = Some(v);
    }
    if let Some(v) = lookup("SLEEPYTESTING_DEVICE_ID") {
        cfg.device.device_id = Some(v);
    }
    if let Some(v) = lookup("SLEEPYTESTING_ALLOWED_ANDROID_DEVICES") {
        cfg.device.allowed_android_devices = split_list(&v);
    }
    if let Some(v) = lookup("SLEEPYTESTING_ALLOWED_IOS_DEVICES") {
        cfg.device.allowed_ios_devices = split_list(&v);
    }
    if let Some(v) = lookup("SLEEPYTESTING_TIMEOUT") {
        cfg.device.action_timeout_secs = v
            .trim()
            .parse()
            .map_err(|e| format!("Invalid SLEEPYTESTING_TIMEOUT '{v}': {e}"))?;
    }
    Ok(())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|d| d.trim())
        .filter(|d| !d.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.device.platform, Platform::Android);
        assert_eq!(cfg.device.framework, Framework::Uiautomator2);
        assert_eq!(cfg.device.action_timeout_secs, 30);
        assert_eq!(cfg.agent.max_repairs, 3);
        assert_eq!(cfg.llm.rate_limit.max_concurrent, 5);
        assert!(cfg.device.validate_framework().is_ok());
    }

    #[test]
    fn test_bundled_default_toml() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.llm.retry.max_retries, 5);
        assert_eq!(cfg.llm.rate_limit.requests, 60);
        assert_eq!(cfg.device.framework, Framework::Uiautomator2);
        assert_eq!(cfg.memory.path, PathBuf::from("memory/episodes.db"));
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let err = load_config(Some(PathBuf::from("/nonexistent/sleepy/config.toml"))).unwrap_err();
        assert!(matches!(err, config::ConfigError::NotFound(_)));
        assert!(err.to_string().contains("/nonexistent/sleepy/config.toml"));
    }

    #[test]
    fn test_explicit_config_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sleepy.toml");
        std::fs::write(&path, "[agent]\nmax_repairs = 7\n[memory]\nin_memory = true\n").unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.agent.max_repairs, 7);
        assert!(cfg.memory.in_memory);
    }

    #[test]
    fn test_legacy_env_overrides() {
        let mut cfg = AppConfig::default();
        apply_legacy_env(
            &mut cfg,
            env(&[
                ("SLEEPYTESTING_PLATFORM", "ios"),
                ("SLEEPYTESTING_FRAMEWORK", "appium"),
                ("SLEEPYTESTING_IOS_DEVICE", "iphone-15"),
                ("SLEEPYTESTING_ALLOWED_IOS_DEVICES", " iphone-15, ,ipad "),
                ("SLEEPYTESTING_TIMEOUT", "12"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.device.platform, Platform::Ios);
        assert_eq!(cfg.device.allowed_ios_devices, vec!["iphone-15", "ipad"]);
        assert_eq!(cfg.device.action_timeout_secs, 12);
        assert_eq!(cfg.device.resolved_device_id().unwrap().as_deref(), Some("iphone-15"));
    }

    #[test]
    fn test_invalid_platform_rejected() {
        let mut cfg = AppConfig::default();
        let err = apply_legacy_env(&mut cfg, env(&[("SLEEPYTESTING_PLATFORM", "symbian")]))
            .unwrap_err();
        assert!(err.contains("Invalid platform"));
    }

    #[test]
    fn test_framework_combination() {
        let mut device = DeviceSection {
            platform: Platform::Web,
            framework: Framework::Uiautomator2,
            ..DeviceSection::default()
        };
        assert!(device.validate_framework().unwrap_err().contains("selenium"));
        device.framework = Framework::Selenium;
        assert!(device.validate_framework().is_ok());
    }

    #[test]
    fn test_device_allow_list() {
        let device = DeviceSection {
            android_device: Some("emulator-5554".into()),
            allowed_android_devices: vec!["pixel-7".into()],
            ..DeviceSection::default()
        };
        assert!(device.resolved_device_id().unwrap_err().contains("not in allowed list"));

        let legacy = DeviceSection {
            device_id: Some("pixel-7".into()),
            allowed_android_devices: vec!["pixel-7".into()],
            ..DeviceSection::default()
        };
        assert_eq!(legacy.resolved_device_id().unwrap().as_deref(), Some("pixel-7"));
    }

    #[test]
    fn test_gateway_config_clamps() {
        let mut llm = LlmSection::default();
        llm.rate_limit.max_concurrent = 0;
        llm.retry.min_wait_ms = 500;
        llm.retry.max_wait_ms = 100;
        let gw = llm.gateway_config();
        assert_eq!(gw.max_concurrent, 1);
        assert_eq!(gw.retry.max_wait, Duration::from_millis(500));
    }
}
