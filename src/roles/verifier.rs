//! Verifier：判断步骤是否达成目标
//!
//! 三种结论：SUCCESS / FAILURE(reason) / TASK_COMPLETE。工具层错误不必询问 LLM，直接判为失败；
//! 可选的 VisualCheck 作为外部观察手段，不通过即失败。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{RoleError, Step, StepResult};
use crate::llm::{LlmClient, Message};
use crate::memory::ContextSnapshot;
use crate::roles::RoleKind;
use crate::stream::AgentStream;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failure(String),
    /// 仅当所有步骤都已完成时才被编排器接受
    TaskComplete,
}

/// 外部观察手段（如截图比对），只返回通过 / 不通过
#[async_trait]
pub trait VisualCheck: Send + Sync {
    async fn check(&self, step: &Step, result: &StepResult) -> Result<bool, String>;
}

#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        step: &Step,
        result: &StepResult,
        context: &ContextSnapshot,
        stream: &AgentStream,
    ) -> Result<Verdict, RoleError>;
}

/// 解析 LLM 的判定：COMPLETE / TASK_COMPLETE、SUCCESS / OK，其余一律视为失败原因
pub fn parse_verdict(output: &str) -> Verdict {
    let trimmed = output.trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("TASK_COMPLETE") || upper.starts_with("COMPLETE") {
        Verdict::TaskComplete
    } else if upper.starts_with("SUCCESS") || upper.starts_with("OK") {
        Verdict::Success
    } else {
        let reason = trimmed
            .strip_prefix("FAILURE:")
            .or_else(|| trimmed.strip_prefix("FAILURE"))
            .unwrap_or(trimmed)
            .trim();
        if reason.is_empty() {
            Verdict::Failure("verifier gave no reason".to_string())
        } else {
            Verdict::Failure(reason.to_string())
        }
    }
}

const DEFAULT_TEMPLATE: &str = "Step: {step}\nTool observation:\n{observation}\n\n\
Did this step achieve its goal? Reply with exactly one of:\n\
SUCCESS\nCOMPLETE (the step succeeded and the whole task is finished)\nFAILURE: <reason>";

pub struct LlmVerifier {
    llm: Arc<dyn LlmClient>,
    prompt_template: String,
    visual: Option<Arc<dyn VisualCheck>>,
}

impl LlmVerifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            prompt_template: DEFAULT_TEMPLATE.to_string(),
            visual: None,
        }
    }

    /// 模板占位符：{step}、{observation}
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    pub fn with_visual_check(mut self, visual: Arc<dyn VisualCheck>) -> Self {
        self.visual = Some(visual);
        self
    }
}

#[async_trait]
impl Verifier for LlmVerifier {
    async fn verify(
        &self,
        step: &Step,
        result: &StepResult,
        context: &ContextSnapshot,
        stream: &AgentStream,
    ) -> Result<Verdict, RoleError> {
        let observation = match result {
            StepResult::Output(out) => out,
            other => {
                let reason = other.summary();
                stream.finish(format!("FAILURE: {}", reason));
                return Ok(Verdict::Failure(reason));
            }
        };

        if let Some(visual) = &self.visual {
            match visual.check(step, result).await {
                Ok(true) => {}
                Ok(false) => {
                    let reason = format!("visual check did not pass for step #{}", step.id);
                    stream.finish(format!("FAILURE: {}", reason));
                    return Ok(Verdict::Failure(reason));
                }
                Err(e) => {
                    let reason = format!("visual check unavailable: {}", e);
                    stream.finish(format!("FAILURE: {}", reason));
                    return Ok(Verdict::Failure(reason));
                }
            }
        }

        let prompt = self
            .prompt_template
            .replace("{step}", &step.description)
            .replace("{observation}", observation);
        let mut system = String::from("Role: Verifier\nJudge the outcome of one step.\n");
        if !context.is_empty() {
            system.push_str(&format!("Context:\n{}", context.render()));
        }
        let messages = vec![Message::system(system), Message::user(prompt)];

        let tokens = self
            .llm
            .complete_stream(&messages)
            .await
            .map_err(|e| RoleError::new(RoleKind::Verifier, e.to_string()))?;
        let output = stream
            .pipe(tokens)
            .await
            .map_err(|e| RoleError::new(RoleKind::Verifier, e.to_string()))?;
        Ok(parse_verdict(&output))
    }
}
