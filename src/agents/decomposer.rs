//! Decomposer：把自然语言任务分解为 Plan，并在步骤失败时生成修复后缀
//!
//! 所有模型调用经 LlmGateway；parse_steps 从回复中提取 JSON 步骤列表。
//! 解析失败时按 RecoveryEngine 给出的纠正提示重新请求一次，仍失败则返回 DecompositionParse。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::assertions::AssertionSpec;
use crate::core::{
    ActionKind, ExpectedOutcome, FailureReason, Plan, RecoveryAction, RecoveryEngine, Step, Task,
    TaskError,
};
use crate::llm::{CompletionConfig, LlmGateway, Message};
use crate::memory::Episode;

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a mobile and web UI test planner.
Break the user's test task into atomic UI steps and answer with ONLY a JSON array.
Each step is an object:
  {"action": "<click|type|swipe|assert|wait|launch|back>",
   "target": "<element selector or visible text>",
   "parameters": {"text": "..."},
   "description": "<what this step does>",
   "assertions": [{"kind": "exists|visible|clickable|has_feature|has_text|custom", ...}]}
Rules:
- "action" and "target" are required and non-empty.
- Parameter values are strings, numbers or booleans.
- Use "type" with parameters.text to enter text.
- Use "assert" steps to check the screen; the default check is that the target exists.
- Learn from prior episodes when they are given: reuse steps that passed, avoid ones that failed."#;

/// 分解时可用的上下文
#[derive(Debug, Clone, Default)]
pub struct DecompositionContext {
    /// 历史 Episode（已排序，精确匹配在前）
    pub hints: Vec<Episode>,
}

impl DecompositionContext {
    pub fn with_hints(hints: Vec<Episode>) -> Self {
        Self { hints }
    }
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(default)]
    action: String,
    #[serde(default)]
    target: String,
    #[serde(default)]
    parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    assertions: Vec<AssertionSpec>,
    #[serde(default)]
    expected: Option<ExpectedOutcome>,
    #[serde(default)]
    requires_transition: Option<bool>,
    #[serde(default)]
    device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPlan {
    Steps(Vec<RawStep>),
    Wrapped { steps: Vec<RawStep> },
}

/// 从 LLM 输出中取出 JSON 文本：```json 块、``` 块，或第一个 [ / { 到最后一个 ] / }
fn extract_json(output: &str) -> &str {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim());
    }
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        if let Some(end) = rest.find("```") {
            return rest[..end].trim();
        }
    }
    let open = match (trimmed.find('['), trimmed.find('{')) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    match open {
        Some(start) => {
            let close = if trimmed[start..].starts_with('[') { ']' } else { '}' };
            match trimmed.rfind(close) {
                Some(end) if end > start => &trimmed[start..=end],
                _ => &trimmed[start..],
            }
        }
        None => trimmed,
    }
}

/// 解析步骤列表；步骤为空、缺少 action / target、参数非基本类型均视为格式错误
pub fn parse_steps(output: &str) -> Result<Vec<Step>, TaskError> {
    let json_str = extract_json(output);
    let raw: RawPlan = serde_json::from_str(json_str)
        .map_err(|e| TaskError::DecompositionParse(format!("{e}: {json_str}")))?;
    let raw_steps = match raw {
        RawPlan::Steps(steps) | RawPlan::Wrapped { steps } => steps,
    };
    if raw_steps.is_empty() {
        return Err(TaskError::DecompositionParse("empty step list".to_string()));
    }

    raw_steps
        .into_iter()
        .enumerate()
        .map(|(i, raw)| {
            if raw.action.trim().is_empty() || raw.target.trim().is_empty() {
                return Err(TaskError::DecompositionParse(format!(
                    "step {} is missing action or target",
                    i + 1
                )));
            }
            if let Some((key, _)) = raw
                .parameters
                .iter()
                .find(|(_, v)| v.is_array() || v.is_object())
            {
                return Err(TaskError::DecompositionParse(format!(
                    "step {}: parameter '{key}' must be a string, number or boolean",
                    i + 1
                )));
            }
            let mut expected = raw.expected.unwrap_or_default();
            expected.assertions.extend(raw.assertions);
            if raw.requires_transition.is_some() {
                expected.requires_transition = raw.requires_transition;
            }
            let mut step = Step::new(ActionKind::parse(&raw.action), raw.target.trim())
                .with_description(raw.description);
            step.parameters = raw.parameters;
            step.expected = expected;
            step.device_id = raw.device_id;
            Ok(step)
        })
        .collect()
}

pub struct Decomposer {
    gateway: Arc<LlmGateway>,
    completion: CompletionConfig,
    system_prompt: String,
    recovery: RecoveryEngine,
}

impl Decomposer {
    pub fn new(gateway: Arc<LlmGateway>, completion: CompletionConfig) -> Self {
        Self {
            gateway,
            completion,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            recovery: RecoveryEngine::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn gateway(&self) -> &Arc<LlmGateway> {
        &self.gateway
    }

    /// 生成初始计划（revision 0）
    pub async fn decompose(
        &self,
        task: &Task,
        context: &DecompositionContext,
    ) -> Result<Plan, TaskError> {
        let mut prompt = format!(
            "Task: {}\nPlatform: {}\n",
            task.description, task.platform
        );
        if let Some(device) = &task.device_id {
            prompt.push_str(&format!("Device: {device}\n"));
        }
        if !context.hints.is_empty() {
            prompt.push_str("\nPrior episodes (best first):\n");
            for ep in &context.hints {
                prompt.push_str(&ep.hint());
            }
        }
        prompt.push_str("\nReturn the JSON array of steps.");

        let steps = self.request(prompt).await?;
        tracing::info!(task = %task.id, steps = steps.len(), "plan decomposed");
        Ok(Plan::new(steps))
    }

    /// 为 cursor 处失败的步骤生成修复后缀，返回取代原计划的新 revision
    pub async fn repair(
        &self,
        task: &Task,
        plan: &Plan,
        cursor: usize,
        failure: &FailureReason,
    ) -> Result<Plan, TaskError> {
        let mut prompt = format!(
            "Task: {}\nPlatform: {}\n\nA step of the current plan (revision {}) failed.\n",
            task.description,
            task.platform,
            plan.revision()
        );
        prompt.push_str("\nCompleted steps (already passed, do not repeat):\n");
        let completed = &plan.steps()[..cursor.min(plan.len())];
        if completed.is_empty() {
            prompt.push_str("  (none)\n");
        }
        for step in completed {
            prompt.push_str(&format!("  {}. {}\n", step.index + 1, step.summary()));
        }
        if let Some(failed) = plan.step(cursor) {
            prompt.push_str(&format!("\nFailed step:\n  {}. {}\n", failed.index + 1, failed.summary()));
        }
        prompt.push_str(&format!(
            "\nFailure:\n  assertion: {}\n  expected: {}\n  observed: {}\n",
            failure.assertion_id, failure.expected, failure.observed
        ));
        let rest = plan.remaining(cursor + 1);
        if !rest.is_empty() {
            prompt.push_str("\nRemaining original steps:\n");
            for step in rest {
                prompt.push_str(&format!("  {}. {}\n", step.index + 1, step.summary()));
            }
        }
        prompt.push_str(
            "\nReturn the JSON array of steps that replaces the failed step and everything after it.",
        );

        let suffix = self.request(prompt).await?;
        let repaired = plan.supersede(cursor, suffix);
        tracing::info!(
            task = %task.id,
            revision = repaired.revision(),
            steps = repaired.len(),
            "plan repaired"
        );
        Ok(repaired)
    }

    /// 调用网关并解析；格式错误时带纠正提示重试一次
    async fn request(&self, user_prompt: String) -> Result<Vec<Step>, TaskError> {
        let mut messages = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(user_prompt),
        ];
        let mut reprompted = false;
        loop {
            tracing::debug!(prompt = ?messages.last().map(|m| m.content.as_str()), "decomposer request");
            let raw = self.gateway.complete(&messages, &self.completion).await?;
            let err = match parse_steps(&raw) {
                Ok(steps) => return Ok(steps),
                Err(err) => err,
            };
            if reprompted {
                return Err(err);
            }
            match self.recovery.handle(&err) {
                RecoveryAction::RetryWithPrompt(correction) => {
                    tracing::warn!(error = %err, "plan output malformed, re-prompting");
                    messages.push(Message::assistant(raw));
                    messages.push(Message::user(correction));
                    reprompted = true;
                }
                _ => return Err(err),
            }
        }
    }
}
