//! Step / Plan：原子 UI 动作与有序计划
//!
//! Plan 一旦构建即不可变；修复时由 `supersede` 生成 revision + 1 的新计划（保留已通过的前缀，替换剩余后缀）。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::assertions::AssertionSpec;

/// 动作类型；未知动作保留原名（Other）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionKind {
    Click,
    Type,
    Swipe,
    Assert,
    Wait,
    Launch,
    Back,
    Other(String),
}

impl ActionKind {
    /// 解析动作名，接受常见同义词（tap / input / scroll / verify ...）
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "click" | "tap" | "press" => ActionKind::Click,
            "type" | "input" | "enter" | "type_text" | "fill" => ActionKind::Type,
            "swipe" | "scroll" => ActionKind::Swipe,
            "assert" | "verify" | "check" | "expect" => ActionKind::Assert,
            "wait" | "sleep" => ActionKind::Wait,
            "launch" | "open" | "navigate" => ActionKind::Launch,
            "back" => ActionKind::Back,
            other => ActionKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Swipe => "swipe",
            ActionKind::Assert => "assert",
            ActionKind::Wait => "wait",
            ActionKind::Launch => "launch",
            ActionKind::Back => "back",
            ActionKind::Other(name) => name,
        }
    }

    /// 动作完成后界面是否必须发生变化
    pub fn expects_transition(&self) -> bool {
        matches!(self, ActionKind::Click | ActionKind::Swipe)
    }
}

impl From<String> for ActionKind {
    fn from(value: String) -> Self {
        ActionKind::parse(&value)
    }
}

impl From<ActionKind> for String {
    fn from(value: ActionKind) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 步骤的预期结果：显式断言 + 是否要求界面变化（None 时按动作类型决定）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectedOutcome {
    #[serde(default)]
    pub assertions: Vec<AssertionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_transition: Option<bool>,
}

/// 原子 UI 步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub index: usize,
    pub action: ActionKind,
    pub target: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub expected: ExpectedOutcome,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl Step {
    pub fn new(action: ActionKind, target: impl Into<String>) -> Self {
        Self {
            index: 0,
            action,
            target: target.into(),
            parameters: BTreeMap::new(),
            expected: ExpectedOutcome::default(),
            description: String::new(),
            device_id: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_assertion(mut self, spec: AssertionSpec) -> Self {
        self.expected.assertions.push(spec);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// type 动作要输入的文本
    pub fn text_param(&self) -> Option<&str> {
        self.parameters.get("text").and_then(|v| v.as_str())
    }

    pub fn requires_transition(&self) -> bool {
        self.expected
            .requires_transition
            .unwrap_or_else(|| self.action.expects_transition())
    }

    /// 单行摘要，用于 prompt 与日志
    pub fn summary(&self) -> String {
        let mut s = format!("{} `{}`", self.action, self.target);
        if !self.parameters.is_empty() {
            let params = serde_json::to_string(&self.parameters).unwrap_or_default();
            s.push(' ');
            s.push_str(&params);
        }
        if !self.description.is_empty() {
            s.push_str(&format!(" ({})", self.description));
        }
        s
    }
}

/// 有序步骤序列；字段私有，构建后只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    revision: u32,
    steps: Vec<Step>,
}

impl Plan {
    /// 初始计划（revision 0），步骤序号按位置重排
    pub fn new(steps: Vec<Step>) -> Self {
        Self::with_revision(0, steps)
    }

    fn with_revision(revision: u32, steps: Vec<Step>) -> Self {
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(i, mut s)| {
                s.index = i;
                s
            })
            .collect();
        Self { revision, steps }
    }

    /// 用修复后缀替换 cursor 起的剩余部分，返回新 revision；自身不变
    pub fn supersede(&self, cursor: usize, suffix: Vec<Step>) -> Plan {
        let keep = cursor.min(self.steps.len());
        let mut steps: Vec<Step> = self.steps[..keep].to_vec();
        steps.extend(suffix);
        Self::with_revision(self.revision + 1, steps)
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// cursor 之后尚未执行的步骤
    pub fn remaining(&self, cursor: usize) -> &[Step] {
        &self.steps[cursor.min(self.steps.len())..]
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> Plan {
        Plan::new(vec![
            Step::new(ActionKind::Click, "login"),
            Step::new(ActionKind::Type, "username").with_param("text", "alice"),
            Step::new(ActionKind::Click, "submit"),
        ])
    }

    #[test]
    fn test_action_kind_synonyms() {
        assert_eq!(ActionKind::parse("Tap"), ActionKind::Click);
        assert_eq!(ActionKind::parse("input"), ActionKind::Type);
        assert_eq!(ActionKind::parse("pinch"), ActionKind::Other("pinch".into()));
        let json = serde_json::to_string(&ActionKind::Swipe).unwrap();
        assert_eq!(json, "\"swipe\"");
    }

    #[test]
    fn test_new_plan_renumbers_steps() {
        let p = plan();
        assert_eq!(p.revision(), 0);
        let indexes: Vec<usize> = p.steps().iter().map(|s| s.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[test]
    fn test_supersede_keeps_prefix_and_bumps_revision() {
        let original = plan();
        let repaired = original.supersede(
            1,
            vec![Step::new(ActionKind::Type, "username").with_param("focus", true)],
        );
        assert_eq!(repaired.revision(), 1);
        assert_eq!(repaired.len(), 2);
        assert_eq!(repaired.steps()[0], original.steps()[0]);
        assert_eq!(repaired.steps()[1].index, 1);
        // 原计划不受影响
        assert_eq!(original.len(), 3);
        assert_eq!(original.revision(), 0);
    }

    #[test]
    fn test_requires_transition_defaults() {
        assert!(Step::new(ActionKind::Click, "a").requires_transition());
        assert!(!Step::new(ActionKind::Type, "a").requires_transition());
        let mut wait = Step::new(ActionKind::Wait, "spinner");
        wait.expected.requires_transition = Some(true);
        assert!(wait.requires_transition());
    }

    #[test]
    fn test_remaining() {
        let p = plan();
        assert_eq!(p.remaining(2).len(), 1);
        assert!(p.remaining(5).is_empty());
    }
}
