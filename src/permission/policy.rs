//! 权限策略与纯函数分类
//!
//! 规则按顺序匹配：
//! 1. 含不可撤销标签 → BLOCK（unsafe_mode 也无法绕过，且不可确认）
//! 2. unsafe_mode → ALLOW
//! 3. 含拒绝标签 → BLOCK（可用一次性确认令牌放行）
//! 4. 含敏感标签，或参数命中危险模式 → CONFIRM
//! 5. 其余 → ALLOW

use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RuntimeSection;
use crate::core::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Allow,
    Confirm,
    Block,
}

/// 单次工具调用的权限决定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDecision {
    pub tool_name: String,
    pub classification: Classification,
    pub rationale: String,
    /// 是否可以通过人工确认放行（不可撤销的拦截为 false）
    pub confirmable: bool,
}

impl PermissionDecision {
    pub fn allow(tool_name: &str, rationale: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            classification: Classification::Allow,
            rationale: rationale.into(),
            confirmable: true,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.classification == Classification::Allow
    }

    /// BLOCK / CONFIRM 对应的错误（由 ErrorRouter 路由到 PAUSED）
    pub fn to_error(&self) -> Option<RuntimeError> {
        match self.classification {
            Classification::Allow => None,
            Classification::Confirm => Some(RuntimeError::PermissionConfirmRequired {
                tool: self.tool_name.clone(),
                reason: self.rationale.clone(),
            }),
            Classification::Block => Some(RuntimeError::PermissionDenied {
                tool: self.tool_name.clone(),
                reason: self.rationale.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PermissionPolicy {
    pub unsafe_mode: bool,
    pub denied_capability_tags: BTreeSet<String>,
    pub sensitive_capability_tags: BTreeSet<String>,
    pub irrevocable_capability_tags: BTreeSet<String>,
    pub sensitive_arg_patterns: Vec<Regex>,
}

impl PermissionPolicy {
    pub fn from_config(cfg: &RuntimeSection) -> Result<Self, regex::Error> {
        let sensitive_arg_patterns = cfg
            .sensitive_arg_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            unsafe_mode: cfg.unsafe_mode,
            denied_capability_tags: cfg.denied_capability_tags.clone(),
            sensitive_capability_tags: cfg.sensitive_capability_tags.clone(),
            irrevocable_capability_tags: cfg.irrevocable_capability_tags.clone(),
            sensitive_arg_patterns,
        })
    }

    pub fn with_unsafe_mode(mut self, enabled: bool) -> Self {
        self.unsafe_mode = enabled;
        self
    }

    pub fn with_denied(mut self, tag: impl Into<String>) -> Self {
        self.denied_capability_tags.insert(tag.into());
        self
    }

    pub fn with_sensitive(mut self, tag: impl Into<String>) -> Self {
        self.sensitive_capability_tags.insert(tag.into());
        self
    }

    pub fn with_irrevocable(mut self, tag: impl Into<String>) -> Self {
        self.irrevocable_capability_tags.insert(tag.into());
        self
    }
}

fn first_match<'a>(tags: &'a BTreeSet<String>, set: &BTreeSet<String>) -> Option<&'a str> {
    tags.iter().find(|t| set.contains(*t)).map(String::as_str)
}

/// 纯函数分类：不涉及确认令牌
pub fn classify(
    tool_name: &str,
    capabilities: &BTreeSet<String>,
    args: &Value,
    policy: &PermissionPolicy,
) -> PermissionDecision {
    if let Some(tag) = first_match(capabilities, &policy.irrevocable_capability_tags) {
        return PermissionDecision {
            tool_name: tool_name.to_string(),
            classification: Classification::Block,
            rationale: format!(
                "tool '{}' carries irrevocably blocked capability '{}'",
                tool_name, tag
            ),
            confirmable: false,
        };
    }

    if policy.unsafe_mode {
        return PermissionDecision::allow(tool_name, "unsafe mode");
    }

    if let Some(tag) = first_match(capabilities, &policy.denied_capability_tags) {
        return PermissionDecision {
            tool_name: tool_name.to_string(),
            classification: Classification::Block,
            rationale: format!("tool '{}' carries denied capability '{}'", tool_name, tag),
            confirmable: true,
        };
    }

    if let Some(tag) = first_match(capabilities, &policy.sensitive_capability_tags) {
        return PermissionDecision {
            tool_name: tool_name.to_string(),
            classification: Classification::Confirm,
            rationale: format!(
                "tool '{}' carries sensitive capability '{}'",
                tool_name, tag
            ),
            confirmable: true,
        };
    }

    let serialized = args.to_string();
    if let Some(re) = policy
        .sensitive_arg_patterns
        .iter()
        .find(|re| re.is_match(&serialized))
    {
        return PermissionDecision {
            tool_name: tool_name.to_string(),
            classification: Classification::Confirm,
            rationale: format!(
                "arguments to tool '{}' match sensitive pattern '{}'",
                tool_name,
                re.as_str()
            ),
            confirmable: true,
        };
    }

    PermissionDecision::allow(tool_name, "no restricted capability")
}
