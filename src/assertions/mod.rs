//! 断言子系统
//!
//! AssertionSpec 描述“应该看到什么”，随 Step 一起序列化；Assertions 在某个 StateSnapshot 上求值，
//! 返回带 (断言 id, 预期, 实际) 的 AssertionOutcome。

pub mod custom;

use serde::{Deserialize, Serialize};

use crate::core::FailureReason;
use crate::driver::StateSnapshot;

pub use custom::{Predicate, PredicateRegistry};

/// 声明式断言
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssertionSpec {
    Exists { selector: String },
    Visible { selector: String },
    Clickable { selector: String },
    HasFeature { feature: String },
    HasText { selector: String, text: String },
    Custom { name: String },
}

impl AssertionSpec {
    /// 断言 id，形如 `has_text:username`
    pub fn id(&self) -> String {
        match self {
            AssertionSpec::Exists { selector } => format!("exists:{selector}"),
            AssertionSpec::Visible { selector } => format!("visible:{selector}"),
            AssertionSpec::Clickable { selector } => format!("clickable:{selector}"),
            AssertionSpec::HasFeature { feature } => format!("has_feature:{feature}"),
            AssertionSpec::HasText { selector, .. } => format!("has_text:{selector}"),
            AssertionSpec::Custom { name } => format!("custom:{name}"),
        }
    }

    pub fn expected(&self) -> String {
        match self {
            AssertionSpec::Exists { selector } => format!("element '{selector}' present"),
            AssertionSpec::Visible { selector } => format!("element '{selector}' visible"),
            AssertionSpec::Clickable { selector } => format!("element '{selector}' clickable"),
            AssertionSpec::HasFeature { feature } => format!("screen shows feature '{feature}'"),
            AssertionSpec::HasText { selector, text } => {
                format!("element '{selector}' has text '{text}'")
            }
            AssertionSpec::Custom { name } => format!("predicate '{name}' holds"),
        }
    }
}

/// 单条断言的求值结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionOutcome {
    pub assertion_id: String,
    pub passed: bool,
    pub expected: String,
    pub observed: String,
}

impl AssertionOutcome {
    fn from_check(spec: &AssertionSpec, check: Result<(), String>) -> Self {
        let (passed, observed) = match check {
            Ok(()) => (true, "ok".to_string()),
            Err(observed) => (false, observed),
        };
        Self {
            assertion_id: spec.id(),
            passed,
            expected: spec.expected(),
            observed,
        }
    }

    /// 失败时转为 FailureReason
    pub fn into_failure(self) -> Option<FailureReason> {
        (!self.passed).then(|| FailureReason::new(self.assertion_id, self.expected, self.observed))
    }
}

/// 断言求值接口；每个方法返回 Err(实际观察) 表示失败
pub trait Assertions: Send + Sync {
    fn exists(&self, snapshot: &StateSnapshot, selector: &str) -> Result<(), String>;
    fn is_visible(&self, snapshot: &StateSnapshot, selector: &str) -> Result<(), String>;
    fn is_clickable(&self, snapshot: &StateSnapshot, selector: &str) -> Result<(), String>;
    fn has_feature(&self, snapshot: &StateSnapshot, feature: &str) -> Result<(), String>;
    fn has_text(&self, snapshot: &StateSnapshot, selector: &str, text: &str) -> Result<(), String>;
    fn custom(&self, snapshot: &StateSnapshot, name: &str) -> Result<(), String>;

    fn check(&self, snapshot: &StateSnapshot, spec: &AssertionSpec) -> AssertionOutcome {
        let result = match spec {
            AssertionSpec::Exists { selector } => self.exists(snapshot, selector),
            AssertionSpec::Visible { selector } => self.is_visible(snapshot, selector),
            AssertionSpec::Clickable { selector } => self.is_clickable(snapshot, selector),
            AssertionSpec::HasFeature { feature } => self.has_feature(snapshot, feature),
            AssertionSpec::HasText { selector, text } => self.has_text(snapshot, selector, text),
            AssertionSpec::Custom { name } => self.custom(snapshot, name),
        };
        AssertionOutcome::from_check(spec, result)
    }
}

/// 基于快照 UI 树的默认实现
#[derive(Debug, Clone, Default)]
pub struct SnapshotAssertions {
    predicates: PredicateRegistry,
}

impl SnapshotAssertions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_predicates(predicates: PredicateRegistry) -> Self {
        Self { predicates }
    }
}

impl Assertions for SnapshotAssertions {
    fn exists(&self, snapshot: &StateSnapshot, selector: &str) -> Result<(), String> {
        snapshot
            .find(selector)
            .map(|_| ())
            .ok_or_else(|| format!("no element '{selector}'"))
    }

    fn is_visible(&self, snapshot: &StateSnapshot, selector: &str) -> Result<(), String> {
        match snapshot.find(selector) {
            Some(e) if e.visible => Ok(()),
            Some(_) => Err(format!("element '{selector}' hidden")),
            None => Err(format!("no element '{selector}'")),
        }
    }

    fn is_clickable(&self, snapshot: &StateSnapshot, selector: &str) -> Result<(), String> {
        match snapshot.find(selector) {
            Some(e) if e.visible && e.clickable => Ok(()),
            Some(e) if !e.visible => Err(format!("element '{selector}' hidden")),
            Some(_) => Err(format!("element '{selector}' not clickable")),
            None => Err(format!("no element '{selector}'")),
        }
    }

    fn has_feature(&self, snapshot: &StateSnapshot, feature: &str) -> Result<(), String> {
        if snapshot.has_feature(feature) {
            return Ok(());
        }
        let present: Vec<&str> = snapshot.features.iter().map(String::as_str).collect();
        Err(format!("features [{}]", present.join(", ")))
    }

    fn has_text(&self, snapshot: &StateSnapshot, selector: &str, text: &str) -> Result<(), String> {
        match snapshot.find(selector) {
            Some(e) if e.text == text => Ok(()),
            Some(e) => Err(format!("text '{}'", e.text)),
            None => Err(format!("no element '{selector}'")),
        }
    }

    fn custom(&self, snapshot: &StateSnapshot, name: &str) -> Result<(), String> {
        self.predicates.evaluate(name, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::UiElement;

    fn screen() -> StateSnapshot {
        StateSnapshot::new(vec![
            UiElement::new("login"),
            UiElement::new("username").with_text("alice"),
            UiElement::new("banner").hidden(),
            UiElement::new("label").not_clickable(),
        ])
        .with_feature("login_form")
    }

    #[test]
    fn test_builtin_assertions() {
        let a = SnapshotAssertions::new();
        let s = screen();
        assert!(a.check(&s, &AssertionSpec::Exists { selector: "login".into() }).passed);
        assert!(!a.check(&s, &AssertionSpec::Visible { selector: "banner".into() }).passed);
        assert!(!a.check(&s, &AssertionSpec::Clickable { selector: "label".into() }).passed);
        assert!(a.check(&s, &AssertionSpec::HasFeature { feature: "login_form".into() }).passed);
        assert!(a
            .check(
                &s,
                &AssertionSpec::HasText {
                    selector: "username".into(),
                    text: "alice".into()
                }
            )
            .passed);
    }

    #[test]
    fn test_failure_carries_structured_reason() {
        let a = SnapshotAssertions::new();
        let spec = AssertionSpec::HasText {
            selector: "username".into(),
            text: "bob".into(),
        };
        let reason = a.check(&screen(), &spec).into_failure().unwrap();
        assert_eq!(reason.assertion_id, "has_text:username");
        assert_eq!(reason.expected, "element 'username' has text 'bob'");
        assert_eq!(reason.observed, "text 'alice'");
    }

    #[test]
    fn test_custom_predicate_error_is_failure() {
        let mut predicates = PredicateRegistry::new();
        predicates.register("four_elements", |s: &StateSnapshot| Ok(s.elements.len() == 4));
        predicates.register("broken", |_: &StateSnapshot| Err("ocr backend down".to_string()));
        let a = SnapshotAssertions::with_predicates(predicates);
        let s = screen();
        assert!(a.check(&s, &AssertionSpec::Custom { name: "four_elements".into() }).passed);
        let broken = a.check(&s, &AssertionSpec::Custom { name: "broken".into() });
        assert!(!broken.passed);
        assert!(broken.observed.contains("ocr backend down"));
        assert!(!a.check(&s, &AssertionSpec::Custom { name: "nope".into() }).passed);
    }

    #[test]
    fn test_spec_serde_shape() {
        let spec: AssertionSpec =
            serde_json::from_str(r#"{"kind":"has_text","selector":"username","text":"alice"}"#)
                .unwrap();
        assert_eq!(spec.id(), "has_text:username");
    }
}
