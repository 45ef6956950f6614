//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / capabilities / execute），由 ToolRegistry 按名注册与查找；
//! capabilities 返回的能力标签供 PermissionGate 分类。

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 常用能力标签
pub mod capability {
    pub const SHELL_EXECUTION: &str = "shell-execution";
    pub const NATIVE_SCRIPTING: &str = "native-scripting";
    pub const FILESYSTEM_WRITE: &str = "filesystem-write";
    pub const NETWORK: &str = "network";
    pub const SCREEN_CAPTURE: &str = "screen-capture";
}

/// 一次工具调用：`{"tool": "...", "args": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

/// 工具层错误：记录为步骤结果，不作为控制流异常抛出
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolExecutionError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("{tool}: {message}")]
    Failed { tool: String, message: String },
    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },
}

/// 工具 trait：名称、描述（供 LLM 理解）、能力标签、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（用于 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 能力标签，如 "shell-execution"；默认无
    fn capabilities(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// 参数 JSON Schema（供 LLM 生成正确的参数格式）
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// 未注册的工具返回空集合（由执行阶段报告 UnknownTool）
    pub fn capabilities(&self, name: &str) -> BTreeSet<String> {
        self.tools
            .get(name)
            .map(|t| t.capabilities())
            .unwrap_or_default()
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<String, ToolExecutionError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolExecutionError::UnknownTool(name.to_string()))?;
        tool.execute(args)
            .await
            .map_err(|message| ToolExecutionError::Failed {
                tool: name.to_string(),
                message,
            })
    }

    /// 排序后的工具名（保证 prompt 稳定）
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 工具目录 JSON：name / description / capabilities / parameters，拼入 Executor 的 system prompt
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tool_names()
            .iter()
            .filter_map(|name| self.tools.get(name).map(|t| (name, t)))
            .map(|(name, tool)| {
                serde_json::json!({
                    "name": name,
                    "description": tool.description(),
                    "capabilities": tool.capabilities(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
