//! 角色层：Architect / Executor / Verifier / KnowledgeExtractor
//!
//! 每个角色是一个 async trait，编排器一次只调用一个角色；角色内部失败以 RoleError 形式交回，
//! 由编排器决定控制流。默认实现基于 LlmClient，测试中可替换为脚本化实现。

pub mod architect;
pub mod executor;
pub mod extractor;
pub mod verifier;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use architect::{parse_plan, Architect, LlmArchitect};
pub use executor::{execute_step, parse_tool_call, Executor, LlmExecutor};
pub use extractor::{KnowledgeExtractor, LlmKnowledgeExtractor, OutcomeExtractor};
pub use verifier::{LlmVerifier, VisualCheck, Verdict, Verifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Architect,
    Executor,
    Verifier,
    KnowledgeExtractor,
}

impl RoleKind {
    /// StreamEvent.agent_name
    pub fn agent_name(&self) -> &'static str {
        match self {
            RoleKind::Architect => "architect",
            RoleKind::Executor => "executor",
            RoleKind::Verifier => "verifier",
            RoleKind::KnowledgeExtractor => "knowledge_extractor",
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.agent_name())
    }
}

/// 一次运行所用的四个角色
#[derive(Clone)]
pub struct Roles {
    pub architect: Arc<dyn Architect>,
    pub executor: Arc<dyn Executor>,
    pub verifier: Arc<dyn Verifier>,
    pub extractor: Arc<dyn KnowledgeExtractor>,
}

/// 从 LLM 输出中提取 JSON：优先 ```json 代码块，其次首个 open..最后一个 close 之间的内容
pub(crate) fn extract_json(text: &str, open: char, close: char) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find(open)?;
    let end = trimmed.rfind(close)?;
    (end > start).then(|| &trimmed[start..=end])
}
