//! 驱动注册表
//!
//! 按 (平台, 框架) 注册驱动工厂；create 时先校验组合与设备白名单，再用 TimedExecutor 包装统一超时与审计。

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{DeviceSection, Framework, Platform};
use crate::core::TaskError;
use crate::driver::{Executor, MockDriver, TimedExecutor};

/// 驱动工厂：输入设备配置与已解析的设备 ID
pub type DriverFactory =
    Arc<dyn Fn(&DeviceSection, Option<String>) -> Result<Arc<dyn Executor>, TaskError> + Send + Sync>;

#[derive(Default)]
pub struct DriverRegistry {
    factories: HashMap<(Platform, Framework), DriverFactory>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为每个已知的平台 / 框架组合注册 MockDriver（试跑用）
    pub fn with_mock_drivers() -> Self {
        let mut registry = Self::new();
        for platform in [Platform::Android, Platform::Ios, Platform::Web] {
            for framework in platform.supported_frameworks() {
                let name = format!("mock-{platform}-{framework}");
                registry.register(platform, *framework, move |_, _| {
                    Ok(Arc::new(MockDriver::new(name.clone())) as Arc<dyn Executor>)
                });
            }
        }
        registry
    }

    pub fn register<F>(&mut self, platform: Platform, framework: Framework, factory: F)
    where
        F: Fn(&DeviceSection, Option<String>) -> Result<Arc<dyn Executor>, TaskError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert((platform, framework), Arc::new(factory));
    }

    pub fn supports(&self, platform: Platform, framework: Framework) -> bool {
        self.factories.contains_key(&(platform, framework))
    }

    /// 按设备配置创建执行器
    pub fn create(&self, device: &DeviceSection) -> Result<Arc<dyn Executor>, TaskError> {
        device.validate_framework().map_err(TaskError::Config)?;
        let device_id = device.resolved_device_id().map_err(TaskError::Config)?;
        let factory = self
            .factories
            .get(&(device.platform, device.framework))
            .ok_or_else(|| {
                TaskError::Config(format!(
                    "No driver registered for {} / {}",
                    device.platform, device.framework
                ))
            })?;
        let inner = factory(device, device_id.clone())?;
        tracing::info!(
            platform = %device.platform,
            framework = %device.framework,
            device_id = device_id.as_deref().unwrap_or("-"),
            driver = inner.name(),
            "driver created"
        );
        Ok(Arc::new(TimedExecutor::new(inner, device.action_timeout())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_registry_covers_known_combinations() {
        let registry = DriverRegistry::with_mock_drivers();
        assert!(registry.supports(Platform::Android, Framework::Uiautomator2));
        assert!(registry.supports(Platform::Ios, Framework::Appium));
        assert!(!registry.supports(Platform::Ios, Framework::Selenium));
    }

    #[test]
    fn test_create_rejects_bad_framework() {
        let registry = DriverRegistry::with_mock_drivers();
        let device = DeviceSection {
            platform: Platform::Web,
            framework: Framework::Appium,
            ..DeviceSection::default()
        };
        assert!(matches!(registry.create(&device), Err(TaskError::Config(_))));
    }

    #[test]
    fn test_create_rejects_device_outside_allow_list() {
        let registry = DriverRegistry::with_mock_drivers();
        let device = DeviceSection {
            android_device: Some("emulator-5556".into()),
            allowed_android_devices: vec!["emulator-5554".into()],
            ..DeviceSection::default()
        };
        let err = registry.create(&device).err().unwrap();
        assert!(err.to_string().contains("not in allowed list"));
    }

    #[test]
    fn test_create_without_registration() {
        let registry = DriverRegistry::new();
        let err = registry.create(&DeviceSection::default()).err().unwrap();
        assert!(err.to_string().contains("No driver registered"));
    }
}
