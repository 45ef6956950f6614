//! Executor：为一个步骤选出工具调用并执行
//!
//! 权限决定不是 ALLOW 时绝不调用工具，直接返回 Blocked 结果让编排器暂停；
//! 工具层错误记录为 ToolError 结果，不向上抛出。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{RoleError, Step, StepResult};
use crate::llm::{LlmClient, Message};
use crate::memory::ContextSnapshot;
use crate::permission::PermissionDecision;
use crate::roles::{extract_json, RoleKind};
use crate::stream::AgentStream;
use crate::tools::{tool_call_schema_json, ToolCall, ToolExecutor};

#[async_trait]
pub trait Executor: Send + Sync {
    /// 为步骤选择一次工具调用
    async fn propose(
        &self,
        step: &Step,
        context: &ContextSnapshot,
        tools: &ToolExecutor,
        stream: &AgentStream,
    ) -> Result<ToolCall, RoleError>;

    async fn execute(
        &self,
        step: &Step,
        call: &ToolCall,
        tools: &ToolExecutor,
        decision: &PermissionDecision,
    ) -> StepResult {
        execute_step(step, call, tools, decision).await
    }
}

/// 按权限决定执行工具调用
pub async fn execute_step(
    step: &Step,
    call: &ToolCall,
    tools: &ToolExecutor,
    decision: &PermissionDecision,
) -> StepResult {
    if !decision.is_allowed() {
        tracing::info!(
            step_id = step.id,
            tool = %call.tool,
            classification = ?decision.classification,
            "tool not invoked"
        );
        return StepResult::Blocked {
            tool: call.tool.clone(),
            classification: decision.classification,
            rationale: decision.rationale.clone(),
        };
    }
    match tools.execute(&call.tool, call.args.clone()).await {
        Ok(output) => StepResult::Output(output),
        Err(e) => StepResult::ToolError {
            tool: call.tool.clone(),
            error: e.to_string(),
        },
    }
}

/// 从 LLM 输出中解析 `{"tool": "...", "args": {...}}`
pub fn parse_tool_call(output: &str) -> Result<ToolCall, String> {
    let json = extract_json(output, '{', '}')
        .ok_or_else(|| format!("no tool call in executor output: {}", output.trim()))?;
    let call: ToolCall =
        serde_json::from_str(json).map_err(|e| format!("invalid tool call JSON ({}): {}", e, json))?;
    if call.tool.trim().is_empty() {
        return Err("tool call names no tool".to_string());
    }
    Ok(call)
}

pub struct LlmExecutor {
    llm: Arc<dyn LlmClient>,
}

impl LlmExecutor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn system_prompt(tools: &ToolExecutor) -> String {
        format!(
            "Role: Executor\n\
             Carry out exactly one step by calling exactly one tool.\n\
             Reply with a single JSON object and nothing else.\n\
             Schema:\n{}\n\
             Tools:\n{}\n",
            tool_call_schema_json(),
            tools.registry().to_schema_json()
        )
    }
}

#[async_trait]
impl Executor for LlmExecutor {
    async fn propose(
        &self,
        step: &Step,
        context: &ContextSnapshot,
        tools: &ToolExecutor,
        stream: &AgentStream,
    ) -> Result<ToolCall, RoleError> {
        let mut user = format!("Step #{}: {}\n", step.id, step.description);
        if !context.is_empty() {
            user.push_str(&format!("\nContext:\n{}", context.render()));
        }
        let messages = vec![Message::system(Self::system_prompt(tools)), Message::user(user)];

        let tokens = self
            .llm
            .complete_stream(&messages)
            .await
            .map_err(|e| RoleError::new(RoleKind::Executor, e.to_string()))?;
        let output = stream
            .pipe(tokens)
            .await
            .map_err(|e| RoleError::new(RoleKind::Executor, e.to_string()))?;
        parse_tool_call(&output).map_err(|e| RoleError::new(RoleKind::Executor, e))
    }
}
