//! Task：单次 UI 测试请求
//!
//! 签名 = SHA-256(规范化描述 + 平台)，作为经验记忆的主键；规范化只做去首尾空白、小写、合并连续空白。

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Platform;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    PartiallySucceeded,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::PartiallySucceeded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::PartiallySucceeded => "partially_succeeded",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务签名（十六进制摘要）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskSignature(String);

impl TaskSignature {
    pub fn compute(description: &str, platform: Platform) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize_description(description).as_bytes());
        hasher.update(b"\0");
        hasher.update(platform.as_str().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TaskSignature {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn normalize_description(description: &str) -> String {
    description
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// 单次调用创建的任务；结束时汇总为 Episode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub platform: Platform,
    pub signature: TaskSignature,
    pub device_id: Option<String>,
    pub status: TaskStatus,
}

impl Task {
    pub fn new(description: impl Into<String>, platform: Platform) -> Self {
        let description = description.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            signature: TaskSignature::compute(&description, platform),
            description,
            platform,
            device_id: None,
            status: TaskStatus::Pending,
        }
    }

    pub fn with_device(mut self, device_id: Option<String>) -> Self {
        self.device_id = device_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_ignores_case_and_spacing() {
        let a = TaskSignature::compute("Click  login then enter username", Platform::Android);
        let b = TaskSignature::compute("  click login THEN enter\tusername ", Platform::Android);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_signature_depends_on_platform() {
        let a = TaskSignature::compute("open settings", Platform::Android);
        let b = TaskSignature::compute("open settings", Platform::Ios);
        assert_ne!(a, b);
    }

    #[test]
    fn test_terminal_status() {
        assert!(TaskStatus::PartiallySucceeded.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        let task = Task::new("open settings", Platform::Web);
        assert_eq!(task.status, TaskStatus::Pending);
    }
}
