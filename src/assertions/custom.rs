//! 自定义断言：按名称注册的用户谓词
//!
//! 谓词返回 Err 时视为断言失败（observed 中带上错误信息），不会中断任务。

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::driver::StateSnapshot;

pub type Predicate = Arc<dyn Fn(&StateSnapshot) -> Result<bool, String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct PredicateRegistry {
    predicates: HashMap<String, Predicate>,
}

impl PredicateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&StateSnapshot) -> Result<bool, String> + Send + Sync + 'static,
    {
        self.predicates.insert(name.into(), Arc::new(predicate));
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.predicates.keys().cloned().collect();
        names.sort();
        names
    }

    /// 运行谓词：Ok(true) 通过；Ok(false) / Err / panic / 未注册 均返回失败说明
    pub fn evaluate(&self, name: &str, snapshot: &StateSnapshot) -> Result<(), String> {
        let predicate = self
            .predicates
            .get(name)
            .ok_or_else(|| format!("unknown predicate '{name}'"))?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| predicate(snapshot)));
        match outcome {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err("predicate returned false".to_string()),
            Ok(Err(e)) => {
                tracing::warn!(predicate = name, error = %e, "custom assertion errored");
                Err(format!("predicate error: {e}"))
            }
            Err(_) => {
                tracing::error!(predicate = name, "custom assertion panicked");
                Err("predicate panicked".to_string())
            }
        }
    }
}

impl std::fmt::Debug for PredicateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateRegistry")
            .field("predicates", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::UiElement;

    #[test]
    fn test_panicking_predicate_is_failure() {
        let mut registry = PredicateRegistry::new();
        registry.register("explodes", |_: &StateSnapshot| -> Result<bool, String> {
            panic!("ocr model missing")
        });
        registry.register("has_login", |s: &StateSnapshot| Ok(s.find("login").is_some()));
        let snapshot = StateSnapshot::new(vec![UiElement::new("login")]);

        let err = registry.evaluate("explodes", &snapshot).unwrap_err();
        assert_eq!(err, "predicate panicked");
        // 之后的谓词照常工作
        assert!(registry.evaluate("has_login", &snapshot).is_ok());
        assert_eq!(registry.names(), vec!["explodes", "has_login"]);
    }
}
