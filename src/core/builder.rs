//! Runtime 构建器：统一的初始化逻辑
//!
//! 从 AppConfig 组装 LLM、四个角色、工具注册表、权限闸门、分层记忆与升级策略；
//! CLI 与测试共用同一套组装流程，测试中用 with_roles / with_llm 替换成脚本化实现。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::escalation::{EscalationPolicy, StrategyShiftPolicy};
use crate::core::{Orchestrator, Runtime, RuntimeError};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::memory::{MemoryStore, TieredMemory};
use crate::permission::{PermissionGate, PermissionPolicy};
use crate::roles::{LlmArchitect, LlmExecutor, LlmKnowledgeExtractor, LlmVerifier, Roles};
use crate::tools::{EchoTool, Tool, ToolExecutor, ToolRegistry};

pub struct RuntimeBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    roles: Option<Roles>,
    registry: ToolRegistry,
    memory: Option<Arc<dyn MemoryStore>>,
    strategy: Option<Arc<dyn StrategyShiftPolicy>>,
}

impl RuntimeBuilder {
    /// 默认注册 echo 工具
    pub fn new(config: AppConfig) -> Self {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        Self {
            config,
            llm: None,
            roles: None,
            registry,
            memory: None,
            strategy: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 替换全部四个角色（不再使用 LLM 角色）
    pub fn with_roles(mut self, roles: Roles) -> Self {
        self.roles = Some(roles);
        self
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.registry.register(tool);
        self
    }

    /// 接入外部记忆后端，或让多个 Runtime 共享同一份记忆
    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn StrategyShiftPolicy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn build(self) -> Result<Runtime, RuntimeError> {
        let settings = self.config.runtime.clone();
        let policy = PermissionPolicy::from_config(&settings)
            .map_err(|e| RuntimeError::Config(format!("invalid sensitive_arg_patterns: {}", e)))?;

        let roles = match self.roles {
            Some(roles) => roles,
            None => {
                let llm = self
                    .llm
                    .unwrap_or_else(|| create_llm_from_config(&self.config.llm));
                Roles {
                    architect: Arc::new(
                        LlmArchitect::new(llm.clone()).with_tools(self.registry.tool_names()),
                    ),
                    executor: Arc::new(LlmExecutor::new(llm.clone())),
                    verifier: Arc::new(LlmVerifier::new(llm.clone())),
                    extractor: Arc::new(LlmKnowledgeExtractor::new(llm)),
                }
            }
        };

        let tools = Arc::new(ToolExecutor::new(self.registry, settings.tool_timeout_secs));
        let max_entries = self.config.memory.max_entries_per_tier;
        let memory = self
            .memory
            .unwrap_or_else(|| Arc::new(TieredMemory::new(max_entries)));
        let mut escalation = EscalationPolicy::from_config(&settings);
        if let Some(strategy) = self.strategy {
            escalation = escalation.with_strategy(strategy);
        }
        tracing::info!(
            tools = ?tools.tool_names(),
            unsafe_mode = settings.unsafe_mode,
            max_replans = escalation.max_replans,
            token_budget = settings.token_budget,
            "runtime built"
        );

        let orchestrator = Orchestrator::new(
            roles,
            tools,
            Arc::new(PermissionGate::new(policy)),
            memory,
            settings,
            escalation,
        );
        Ok(Runtime::new(orchestrator))
    }
}
