//! 角色输出格式的 JSON Schema（schemars 自动生成）
//!
//! 拼入 Architect / Executor 的 system prompt，减少 LLM 输出格式错误。

use schemars::{schema_for, JsonSchema};
use std::collections::HashMap;

/// 工具调用格式：与 Executor 解析的 `{"tool": "...", "args": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，必须是已注册工具之一
    pub tool: String,
    /// 工具参数，依工具不同而不同
    pub args: HashMap<String, serde_json::Value>,
}

/// 计划格式：有序的步骤描述数组
#[allow(dead_code)]
#[derive(JsonSchema)]
struct PlanFormat(Vec<String>);

pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

pub fn plan_schema_json() -> String {
    let schema = schema_for!(PlanFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schemas_mention_fields() {
        assert!(tool_call_schema_json().contains("\"tool\""));
        assert!(plan_schema_json().contains("array"));
    }
}
