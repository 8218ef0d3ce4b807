//! 设备状态快照：可见元素 + 屏幕特征
//!
//! 快照是只读值；Supervisor 对比动作前后的 fingerprint 判断界面是否发生变化。

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::StateRef;

/// UI 树中的一个元素
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UiElement {
    pub selector: String,
    #[serde(default)]
    pub text: String,
    pub visible: bool,
    pub clickable: bool,
    #[serde(default)]
    pub focused: bool,
}

impl UiElement {
    /// 可见、可点击、未聚焦、无文本
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            text: String::new(),
            visible: true,
            clickable: true,
            focused: false,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn not_clickable(mut self) -> Self {
        self.clickable = false;
        self
    }

    pub fn focused(mut self) -> Self {
        self.focused = true;
        self
    }
}

/// 某一时刻的设备状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub id: String,
    pub screenshot_id: String,
    pub ui_tree_id: String,
    pub elements: Vec<UiElement>,
    pub features: BTreeSet<String>,
    pub captured_at: DateTime<Utc>,
}

impl StateSnapshot {
    pub fn new(elements: Vec<UiElement>) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            screenshot_id: format!("screenshot-{id}"),
            ui_tree_id: format!("ui-tree-{id}"),
            id,
            elements,
            features: BTreeSet::new(),
            captured_at: Utc::now(),
        }
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.features.insert(feature.into());
        self
    }

    /// 按 selector 查找，找不到时退回按文本匹配
    pub fn find(&self, selector: &str) -> Option<&UiElement> {
        self.elements
            .iter()
            .find(|e| e.selector == selector)
            .or_else(|| {
                self.elements
                    .iter()
                    .find(|e| !e.text.is_empty() && e.text == selector)
            })
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    /// 内容指纹（不含 id 与时间戳）；相同内容的快照指纹相同
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.elements.hash(&mut hasher);
        self.features.hash(&mut hasher);
        hasher.finish()
    }

    pub fn state_ref(&self) -> StateRef {
        StateRef {
            snapshot_id: self.id.clone(),
            screenshot_id: self.screenshot_id.clone(),
            ui_tree_id: self.ui_tree_id.clone(),
        }
    }

    /// 给 prompt / 日志看的简短描述
    pub fn describe(&self) -> String {
        let elements: Vec<String> = self
            .elements
            .iter()
            .filter(|e| e.visible)
            .map(|e| {
                if e.text.is_empty() {
                    e.selector.clone()
                } else {
                    format!("{}=\"{}\"", e.selector, e.text)
                }
            })
            .collect();
        let features: Vec<&str> = self.features.iter().map(String::as_str).collect();
        format!(
            "elements [{}]; features [{}]",
            elements.join(", "),
            features.join(", ")
        )
    }
}
