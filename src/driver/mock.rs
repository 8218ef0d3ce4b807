//! 模拟驱动（试跑与测试用，无需真实设备）
//!
//! - MockDriver：宽松的模拟屏幕，目标元素在 prepare 时补齐，动作按类型修改界面，声明的断言在执行后满足
//! - ScriptedDriver：每次 execute 按脚本切换到下一个快照（或返回错误），记录执行过的步骤

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::assertions::AssertionSpec;
use crate::core::{ActionKind, Step};
use crate::driver::{ActionOutcome, DriverError, Executor, StateSnapshot, UiElement};

const VIEW_PREFIX: &str = "view:";

#[derive(Debug)]
struct MockScreen {
    snapshot: StateSnapshot,
    version: u64,
}

impl MockScreen {
    fn ensure(&mut self, selector: &str) -> &mut UiElement {
        let pos = match self.snapshot.elements.iter().position(|e| e.selector == selector) {
            Some(pos) => pos,
            None => {
                self.snapshot.elements.push(UiElement::new(selector));
                self.snapshot.elements.len() - 1
            }
        };
        let el = &mut self.snapshot.elements[pos];
        el.visible = true;
        el
    }

    /// 进入下一个“视图”，保证指纹变化
    fn advance(&mut self) {
        self.snapshot.features.retain(|f| !f.starts_with(VIEW_PREFIX));
        self.version += 1;
        self.snapshot
            .features
            .insert(format!("{VIEW_PREFIX}{}", self.version));
    }

    fn satisfy(&mut self, spec: &AssertionSpec) {
        match spec {
            AssertionSpec::Exists { selector } | AssertionSpec::Visible { selector } => {
                self.ensure(selector);
            }
            AssertionSpec::Clickable { selector } => {
                self.ensure(selector).clickable = true;
            }
            AssertionSpec::HasFeature { feature } => {
                self.snapshot.features.insert(feature.clone());
            }
            AssertionSpec::HasText { selector, text } => {
                self.ensure(selector).text = text.clone();
            }
            AssertionSpec::Custom { .. } => {}
        }
    }
}

/// 宽松模拟屏幕：任何合理的计划都能跑通
#[derive(Debug)]
pub struct MockDriver {
    name: String,
    screen: Mutex<MockScreen>,
}

impl MockDriver {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            screen: Mutex::new(MockScreen {
                snapshot: StateSnapshot::new(Vec::new()).with_feature(format!("{VIEW_PREFIX}0")),
                version: 0,
            }),
        }
    }
}

#[async_trait]
impl Executor for MockDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&self, step: &Step) -> Result<(), DriverError> {
        let mut screen = self.screen.lock().await;
        if !step.target.is_empty() {
            screen.ensure(&step.target);
        }
        Ok(())
    }

    async fn execute(&self, step: &Step) -> Result<ActionOutcome, DriverError> {
        let start = Instant::now();
        let mut screen = self.screen.lock().await;
        match &step.action {
            ActionKind::Click => {
                for e in screen.snapshot.elements.iter_mut() {
                    e.focused = false;
                }
                screen.ensure(&step.target).focused = true;
                screen.advance();
            }
            ActionKind::Type => {
                let text = step.text_param().unwrap_or_default().to_string();
                let el = screen.ensure(&step.target);
                el.text = text;
                el.focused = true;
            }
            ActionKind::Swipe | ActionKind::Launch | ActionKind::Back => screen.advance(),
            ActionKind::Assert | ActionKind::Wait | ActionKind::Other(_) => {}
        }
        for spec in &step.expected.assertions {
            screen.satisfy(spec);
        }
        if step.action == ActionKind::Assert && step.expected.assertions.is_empty() {
            screen.ensure(&step.target);
        }
        Ok(ActionOutcome::new(
            start.elapsed(),
            format!("{} {} (mock)", step.action, step.target),
        ))
    }

    async fn capture_state(&self) -> Result<StateSnapshot, DriverError> {
        let screen = self.screen.lock().await;
        Ok(recapture(&screen.snapshot))
    }
}

/// 同内容、新 id 的快照
fn recapture(snapshot: &StateSnapshot) -> StateSnapshot {
    let mut next = StateSnapshot::new(snapshot.elements.clone());
    next.features = snapshot.features.clone();
    next
}

/// 脚本驱动：第 n 次 execute 使用脚本第 n 项
#[derive(Debug)]
pub struct ScriptedDriver {
    current: Mutex<StateSnapshot>,
    script: Mutex<VecDeque<Result<StateSnapshot, DriverError>>>,
    executed: Mutex<Vec<Step>>,
    delay: Option<Duration>,
}

impl ScriptedDriver {
    pub fn new(initial: StateSnapshot) -> Self {
        Self {
            current: Mutex::new(initial),
            script: Mutex::new(VecDeque::new()),
            executed: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// 追加：下一次动作成功后界面变为 `next`
    pub fn then(self, next: StateSnapshot) -> Self {
        self.push(Ok(next))
    }

    /// 追加：下一次动作返回错误，界面不变
    pub fn then_fail(self, err: DriverError) -> Self {
        self.push(Err(err))
    }

    fn push(mut self, item: Result<StateSnapshot, DriverError>) -> Self {
        self.script.get_mut().push_back(item);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 已执行的步骤（按顺序）
    pub async fn executed(&self) -> Vec<Step> {
        self.executed.lock().await.clone()
    }
}

#[async_trait]
impl Executor for ScriptedDriver {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, step: &Step) -> Result<ActionOutcome, DriverError> {
        let start = Instant::now();
        self.executed.lock().await.push(step.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(DriverError::Rejected("script exhausted".to_string())));
        let snapshot = next?;
        *self.current.lock().await = snapshot;
        Ok(ActionOutcome::new(start.elapsed(), step.summary()))
    }

    async fn capture_state(&self) -> Result<StateSnapshot, DriverError> {
        Ok(recapture(&*self.current.lock().await))
    }
}
