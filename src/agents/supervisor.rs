//! Supervisor：根据动作前后状态判定单步是否真正完成
//!
//! 驱动报告“完成”不等于成功：判定只依据 Controller 独立采集的前后快照。
//! 检查顺序：驱动错误 → 后置状态缺失 → 动作类型要求的断言 → 步骤声明的断言 → 界面是否变化。
//! 第一个失败即返回，附带 (断言 id, 预期, 实际)。

use std::sync::Arc;

use crate::assertions::{AssertionSpec, Assertions, SnapshotAssertions};
use crate::core::{ActionKind, FailureReason, Step, Verdict};
use crate::driver::{ActionOutcome, DriverError, StateSnapshot};

/// 一次动作的观察：前置状态、后置状态（采集失败为 None）与驱动结果
#[derive(Debug, Clone)]
pub struct StepObservation {
    pub pre: StateSnapshot,
    pub post: Option<StateSnapshot>,
    pub outcome: Result<ActionOutcome, DriverError>,
}

pub struct Supervisor {
    assertions: Arc<dyn Assertions>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(Arc::new(SnapshotAssertions::new()))
    }
}

impl Supervisor {
    pub fn new(assertions: Arc<dyn Assertions>) -> Self {
        Self { assertions }
    }

    pub fn validate(&self, step: &Step, observation: &StepObservation) -> Verdict {
        match self.first_failure(step, observation) {
            Some(reason) => {
                tracing::warn!(step = step.index, reason = %reason, "step failed validation");
                Verdict::Fail(reason)
            }
            None => Verdict::Pass,
        }
    }

    fn first_failure(&self, step: &Step, obs: &StepObservation) -> Option<FailureReason> {
        if let Err(e) = &obs.outcome {
            return Some(FailureReason::execution(e.to_string()));
        }
        let Some(post) = &obs.post else {
            return Some(FailureReason::new(
                "state_capture",
                "post-action state captured",
                "capture failed",
            ));
        };

        // 动作类型要求的断言
        match &step.action {
            ActionKind::Click => {
                let spec = AssertionSpec::Clickable {
                    selector: step.target.clone(),
                };
                if let Some(r) = self.assertions.check(&obs.pre, &spec).into_failure() {
                    return Some(r);
                }
            }
            ActionKind::Type => {
                let spec = match step.text_param() {
                    Some(text) => AssertionSpec::HasText {
                        selector: step.target.clone(),
                        text: text.to_string(),
                    },
                    None => AssertionSpec::Exists {
                        selector: step.target.clone(),
                    },
                };
                if let Some(r) = self.assertions.check(post, &spec).into_failure() {
                    return Some(r);
                }
            }
            ActionKind::Assert if step.expected.assertions.is_empty() => {
                let spec = AssertionSpec::Exists {
                    selector: step.target.clone(),
                };
                if let Some(r) = self.assertions.check(post, &spec).into_failure() {
                    return Some(r);
                }
            }
            _ => {}
        }

        for spec in &step.expected.assertions {
            if let Some(r) = self.assertions.check(post, spec).into_failure() {
                return Some(r);
            }
        }

        if step.requires_transition() && obs.pre.fingerprint() == post.fingerprint() {
            return Some(FailureReason::new(
                "state_transition",
                format!("screen changes after {}", step.action),
                "screen unchanged",
            ));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::driver::UiElement;

    fn ok() -> Result<ActionOutcome, DriverError> {
        Ok(ActionOutcome::new(Duration::from_millis(5), "done"))
    }

    fn login_screen() -> StateSnapshot {
        StateSnapshot::new(vec![UiElement::new("login"), UiElement::new("username")])
    }

    #[test]
    fn test_click_passes_with_transition() {
        let sup = Supervisor::default();
        let pre = login_screen();
        let post = login_screen().with_feature("login_form");
        let verdict = sup.validate(
            &Step::new(ActionKind::Click, "login"),
            &StepObservation { pre, post: Some(post), outcome: ok() },
        );
        assert!(verdict.is_pass());
    }

    #[test]
    fn test_silently_wrong_click_fails() {
        let sup = Supervisor::default();
        let verdict = sup.validate(
            &Step::new(ActionKind::Click, "login"),
            &StepObservation { pre: login_screen(), post: Some(login_screen()), outcome: ok() },
        );
        assert_eq!(verdict.reason().unwrap().assertion_id, "state_transition");
    }

    #[test]
    fn test_click_requires_clickable_pre_state() {
        let sup = Supervisor::default();
        let pre = StateSnapshot::new(vec![UiElement::new("login").not_clickable()]);
        let post = StateSnapshot::new(vec![]);
        let verdict = sup.validate(
            &Step::new(ActionKind::Click, "login"),
            &StepObservation { pre, post: Some(post), outcome: ok() },
        );
        assert_eq!(verdict.reason().unwrap().assertion_id, "clickable:login");
    }

    #[test]
    fn test_type_checks_text_in_post_state() {
        let sup = Supervisor::default();
        let step = Step::new(ActionKind::Type, "username").with_param("text", "alice");
        let verdict = sup.validate(
            &step,
            &StepObservation { pre: login_screen(), post: Some(login_screen()), outcome: ok() },
        );
        let reason = verdict.reason().unwrap();
        assert_eq!(reason.assertion_id, "has_text:username");
        assert_eq!(reason.observed, "text ''");

        let typed = StateSnapshot::new(vec![UiElement::new("username").with_text("alice")]);
        let verdict = sup.validate(
            &step,
            &StepObservation { pre: login_screen(), post: Some(typed), outcome: ok() },
        );
        assert!(verdict.is_pass());
    }

    #[test]
    fn test_driver_error_is_execution_failure() {
        let sup = Supervisor::default();
        let verdict = sup.validate(
            &Step::new(ActionKind::Click, "login"),
            &StepObservation {
                pre: login_screen(),
                post: Some(login_screen()),
                outcome: Err(DriverError::Unreachable("emulator-5554".into())),
            },
        );
        assert!(verdict.reason().unwrap().is_execution());
    }

    #[test]
    fn test_missing_post_state_fails() {
        let sup = Supervisor::default();
        let verdict = sup.validate(
            &Step::new(ActionKind::Wait, "spinner"),
            &StepObservation { pre: login_screen(), post: None, outcome: ok() },
        );
        assert_eq!(verdict.reason().unwrap().assertion_id, "state_capture");
    }

    #[test]
    fn test_declared_assertions_checked_on_post() {
        let sup = Supervisor::default();
        let step = Step::new(ActionKind::Wait, "spinner")
            .with_assertion(AssertionSpec::HasFeature { feature: "home".into() });
        let verdict = sup.validate(
            &step,
            &StepObservation { pre: login_screen(), post: Some(login_screen()), outcome: ok() },
        );
        assert_eq!(verdict.reason().unwrap().assertion_id, "has_feature:home");
        let verdict = sup.validate(
            &step,
            &StepObservation {
                pre: login_screen(),
                post: Some(login_screen().with_feature("home")),
                outcome: ok(),
            },
        );
        assert!(verdict.is_pass());
    }
}
