//! 运行时错误分类与路由
//!
//! 与 ErrorRouter 配合：根据 RuntimeError 决定记录为步骤结果 / 暂停 / 计入失败 / 驱逐上下文 / 终止运行。

use thiserror::Error;

use crate::roles::RoleKind;

/// 任务运行过程中可能出现的错误
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    /// 工具层错误：作为步骤结果记录，可通过重规划恢复
    #[error("Tool execution failed ({tool}): {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Permission denied for tool '{tool}': {reason}")]
    PermissionDenied { tool: String, reason: String },

    #[error("Confirmation required for tool '{tool}': {reason}")]
    PermissionConfirmRequired { tool: String, reason: String },

    #[error("Verification failed: {0}")]
    VerificationFailure(String),

    /// 由 ContextWindowManager 内部驱逐处理，不会暴露给调用方
    #[error("Context overflow: need {needed} tokens, budget {budget}")]
    ContextOverflow { needed: usize, budget: usize },

    #[error("Fatal runtime error: {0}")]
    Fatal(String),

    #[error("Invalid resume: {0}")]
    InvalidResume(#[from] InvalidResumeError),

    #[error("Config error: {0}")]
    Config(String),
}

/// Resume API 的拒绝原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidResumeError {
    #[error("unknown run")]
    UnknownRun,
    #[error("run is not paused")]
    NotPaused,
    #[error("resume token is stale")]
    StaleToken,
    #[error("blocked capability cannot be confirmed")]
    NotConfirmable,
}

/// 角色内部失败：以数据形式交回编排器，不跨越角色边界抛出
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{role} failed: {message}")]
pub struct RoleError {
    pub role: RoleKind,
    pub message: String,
}

impl RoleError {
    pub fn new(role: RoleKind, message: impl Into<String>) -> Self {
        Self {
            role,
            message: message.into(),
        }
    }
}

impl From<RoleError> for RuntimeError {
    fn from(e: RoleError) -> Self {
        RuntimeError::Fatal(e.to_string())
    }
}

/// 路由器根据错误类型给出的控制流决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routing {
    /// 写入步骤结果，交给 Verifier 判断
    RecordAsStepResult,
    /// 进入 PAUSED 等待外部决定
    Pause,
    /// fail_count + 1，可能触发重规划
    CountFailure,
    /// 驱逐低优先级上下文后继续
    EvictContext,
    /// 拒绝本次调用，运行状态不变
    Reject,
    /// 立即 FAILED（仍会调用 KnowledgeExtractor）
    FailRun,
}

/// 错误路由表：编排器是唯一依据错误决定控制流的地方
#[derive(Debug, Default)]
pub struct ErrorRouter;

impl ErrorRouter {
    pub fn new() -> Self {
        Self
    }

    pub fn route(&self, err: &RuntimeError) -> Routing {
        match err {
            RuntimeError::ToolExecution { .. } => Routing::RecordAsStepResult,
            RuntimeError::PermissionDenied { .. } | RuntimeError::PermissionConfirmRequired { .. } => {
                Routing::Pause
            }
            RuntimeError::VerificationFailure(_) => Routing::CountFailure,
            RuntimeError::ContextOverflow { .. } => Routing::EvictContext,
            RuntimeError::InvalidResume(_) => Routing::Reject,
            RuntimeError::Fatal(_) | RuntimeError::Config(_) => Routing::FailRun,
        }
    }
}
