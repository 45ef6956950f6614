//! PermissionGate：策略分类 + 一次性确认令牌
//!
//! 被拦截或需确认的调用在人工确认后，由编排器申请一个绑定工具名的 ConfirmationToken；
//! 下一次携带该令牌的同名调用放行，令牌随即作废。

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::permission::{classify, Classification, PermissionDecision, PermissionPolicy};

/// 一次性确认令牌
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfirmationToken(Uuid);

impl ConfirmationToken {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

pub struct PermissionGate {
    policy: PermissionPolicy,
    /// 已签发未使用的令牌 -> 绑定的工具名
    issued: Mutex<HashMap<ConfirmationToken, String>>,
}

impl PermissionGate {
    pub fn new(policy: PermissionPolicy) -> Self {
        Self {
            policy,
            issued: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }

    /// 为某个工具签发一次性令牌
    pub fn issue_token(&self, tool_name: &str) -> ConfirmationToken {
        let token = ConfirmationToken::new();
        if let Ok(mut issued) = self.issued.lock() {
            issued.insert(token, tool_name.to_string());
        }
        tracing::debug!(tool = %tool_name, "confirmation token issued");
        token
    }

    /// 作废一个尚未使用的令牌（运行结束时清理）；令牌已被使用则返回 false
    pub fn revoke(&self, token: &ConfirmationToken) -> bool {
        self.issued
            .lock()
            .map(|mut issued| issued.remove(token).is_some())
            .unwrap_or(false)
    }

    /// 已签发尚未使用的令牌数
    pub fn outstanding(&self) -> usize {
        self.issued.lock().map(|issued| issued.len()).unwrap_or(0)
    }

    /// 令牌必须与工具名匹配；匹配即作废
    fn redeem(&self, token: &ConfirmationToken, tool_name: &str) -> bool {
        let Ok(mut issued) = self.issued.lock() else {
            return false;
        };
        match issued.get(token) {
            Some(bound) if bound == tool_name => {
                issued.remove(token);
                true
            }
            _ => false,
        }
    }

    pub fn classify(
        &self,
        tool_name: &str,
        capabilities: &BTreeSet<String>,
        args: &Value,
        token: Option<&ConfirmationToken>,
    ) -> PermissionDecision {
        let mut decision = classify(tool_name, capabilities, args, &self.policy);
        if decision.classification != Classification::Allow && decision.confirmable {
            if let Some(t) = token {
                if self.redeem(t, tool_name) {
                    decision = PermissionDecision::allow(
                        tool_name,
                        format!("confirmed once ({})", decision.rationale),
                    );
                }
            }
        }
        tracing::info!(
            tool = %tool_name,
            classification = ?decision.classification,
            rationale = %decision.rationale,
            "permission"
        );
        decision
    }
}
