//! Architect：把任务描述 + 检索到的上下文变成有序的步骤计划
//!
//! 重规划时必须拿到 Verifier 给出的失败原因（failure_history），并在 prompt 中逐条列出。

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::core::{FailureRecord, RoleError};
use crate::llm::{LlmClient, Message};
use crate::memory::ContextSnapshot;
use crate::roles::{extract_json, RoleKind};
use crate::stream::AgentStream;
use crate::tools::plan_schema_json;

#[async_trait]
pub trait Architect: Send + Sync {
    /// 首次规划时 failures 为空
    async fn plan(
        &self,
        task: &str,
        context: &ContextSnapshot,
        failures: &[FailureRecord],
        stream: &AgentStream,
    ) -> Result<Vec<String>, RoleError>;
}

/// 解析计划：JSON 字符串数组（可在 ```json 代码块内），否则退回编号列表 / 项目符号列表
pub fn parse_plan(output: &str) -> Result<Vec<String>, String> {
    if let Some(json) = extract_json(output, '[', ']') {
        if let Ok(steps) = serde_json::from_str::<Vec<String>>(json) {
            let steps: Vec<String> = steps
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !steps.is_empty() {
                return Ok(steps);
            }
        }
    }

    let list = Regex::new(r"^\s*(?:\d+[.)]|[-*])\s+(.+?)\s*$").map_err(|e| e.to_string())?;
    let steps: Vec<String> = output
        .lines()
        .filter_map(|line| list.captures(line))
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();
    if steps.is_empty() {
        Err(format!("no plan found in architect output: {}", preview(output)))
    } else {
        Ok(steps)
    }
}

fn preview(s: &str) -> String {
    let s = s.trim();
    if s.chars().count() > 120 {
        format!("{}...", s.chars().take(120).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 渲染失败历史；带策略转向提示的记录附上提示
pub(crate) fn render_failures(failures: &[FailureRecord]) -> String {
    failures
        .iter()
        .map(|f| {
            let mut line = format!("- step #{} '{}': {}", f.step_id, f.step_description, f.reason);
            if let Some(hint) = &f.hint {
                line.push_str(&format!("\n  {}", hint));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct LlmArchitect {
    llm: Arc<dyn LlmClient>,
    tool_names: Vec<String>,
}

impl LlmArchitect {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            tool_names: Vec::new(),
        }
    }

    /// 让计划只使用已注册的工具
    pub fn with_tools(mut self, tool_names: Vec<String>) -> Self {
        self.tool_names = tool_names;
        self
    }

    fn system_prompt(&self) -> String {
        let mut prompt = String::from(
            "Role: Architect\n\
             Break the task into a short ordered list of concrete steps. \
             Each step must be executable with a single tool call.\n\
             Reply with a JSON array of step descriptions only.\n",
        );
        prompt.push_str(&format!("Schema:\n{}\n", plan_schema_json()));
        if !self.tool_names.is_empty() {
            prompt.push_str(&format!("Available tools: {}\n", self.tool_names.join(", ")));
        }
        prompt
    }
}

#[async_trait]
impl Architect for LlmArchitect {
    async fn plan(
        &self,
        task: &str,
        context: &ContextSnapshot,
        failures: &[FailureRecord],
        stream: &AgentStream,
    ) -> Result<Vec<String>, RoleError> {
        let mut user = format!("Task: {}\n", task);
        if !context.is_empty() {
            user.push_str(&format!("\nContext:\n{}", context.render()));
        }
        if !failures.is_empty() {
            user.push_str(&format!(
                "\nThe previous plan failed verification. Failures:\n{}\nProduce a revised plan.\n",
                render_failures(failures)
            ));
        }
        let messages = vec![Message::system(self.system_prompt()), Message::user(user)];

        let tokens = self
            .llm
            .complete_stream(&messages)
            .await
            .map_err(|e| RoleError::new(RoleKind::Architect, e.to_string()))?;
        let output = stream
            .pipe(tokens)
            .await
            .map_err(|e| RoleError::new(RoleKind::Architect, e.to_string()))?;

        let steps = parse_plan(&output).map_err(|e| RoleError::new(RoleKind::Architect, e))?;
        tracing::debug!(steps = steps.len(), replan = !failures.is_empty(), "plan parsed");
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Role, ScriptedLlmClient};
    use crate::stream::{RecordingSink, StreamChannel};

    #[test]
    fn test_parse_plan_json_and_fenced() {
        assert_eq!(
            parse_plan(r#"["fetch page", "extract title"]"#).unwrap(),
            vec!["fetch page", "extract title"]
        );
        let fenced = "Plan:\n```json\n[\"a\", \" \", \"b\"]\n```";
        assert_eq!(parse_plan(fenced).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_parse_plan_numbered_fallback() {
        let text = "Here is the plan:\n1. Open the file\n2) Count lines\n- Report the count\n";
        assert_eq!(
            parse_plan(text).unwrap(),
            vec!["Open the file", "Count lines", "Report the count"]
        );
        assert!(parse_plan("I cannot help with that").is_err());
    }

    #[tokio::test]
    async fn test_replan_prompt_carries_failures() {
        let llm = Arc::new(ScriptedLlmClient::new([r#"["try mirror"]"#]));
        let architect = LlmArchitect::new(llm.clone()).with_tools(vec!["echo".into()]);
        let sink = Arc::new(RecordingSink::new());
        let channel = StreamChannel::open(sink.clone());
        let stream = channel.agent("architect");
        let failures = vec![FailureRecord {
            step_id: 2,
            step_description: "download archive".into(),
            reason: "HTTP 404".into(),
            strategy_shift: true,
            hint: Some("strategy shift: avoid 'download'".into()),
        }];

        let plan = architect
            .plan("mirror the dataset", &ContextSnapshot::default(), &failures, &stream)
            .await
            .unwrap();
        drop(stream);
        channel.close().await;

        assert_eq!(plan, vec!["try mirror"]);
        let calls = llm.calls();
        let user = calls[0].iter().find(|m| m.role == Role::User).unwrap();
        assert!(user.content.contains("HTTP 404"));
        assert!(user.content.contains("strategy shift"));
        assert!(calls[0][0].content.starts_with("Role: Architect"));
        assert_eq!(sink.text_of("architect"), r#"["try mirror"]"#);
    }
}
