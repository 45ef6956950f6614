//! 核心编排层：运行状态、纯函数状态机、升级策略、错误路由、主控循环与运行注册表

pub mod builder;
pub mod error;
pub mod escalation;
pub mod orchestrator;
pub mod runtime;
pub mod state;
pub mod transition;

pub use builder::RuntimeBuilder;
pub use error::{ErrorRouter, InvalidResumeError, RoleError, Routing, RuntimeError};
pub use escalation::{
    Escalation, EscalationPolicy, NeverShift, ShiftOnEscalation, StrategyShift, StrategyShiftPolicy,
};
pub use orchestrator::{Orchestrator, ORCHESTRATOR_AGENT};
pub use runtime::{ResumeDecision, ResumeOutcome, RunControl, RunHandle, Runtime};
pub use state::{
    FailureRecord, Grant, PauseInfo, PauseView, ResumeToken, RunId, RunSnapshot, Step, StepId,
    StepResult, StepStatus, TaskState, TaskStatus, Transition,
};
pub use transition::{advance, next_action, Execution, Input, NextAction, Resolution, RoleOutput};
