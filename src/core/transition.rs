//! 状态机：纯函数 advance(state, input) -> state'
//!
//! 只依据当前 TaskState 与刚被调用角色的输出计算下一个状态，不触碰记录之外的任何共享状态。
//! 编排器负责调用角色、收集输出，再交给 advance；next_action 告诉编排器下一步该调用谁。

use crate::core::escalation::{Escalation, EscalationPolicy};
use crate::core::{
    ErrorRouter, FailureRecord, Grant, PauseInfo, ResumeToken, RoleError, Routing, RuntimeError,
    StepId, StepResult, StepStatus, TaskState, TaskStatus,
};
use crate::memory::EntryKind;
use crate::permission::{ConfirmationToken, PermissionDecision};
use crate::roles::Verdict;
use crate::tools::ToolCall;

/// Executor 一次执行的完整输出
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub call: ToolCall,
    pub decision: PermissionDecision,
    pub result: StepResult,
}

/// 角色输出（带标签的变体）
#[derive(Debug, Clone)]
pub enum RoleOutput {
    Architect(Result<Vec<String>, RoleError>),
    Executor {
        step_id: StepId,
        outcome: Result<Execution, RoleError>,
    },
    Verifier {
        step_id: StepId,
        verdict: Result<Verdict, RoleError>,
    },
}

/// 暂停的结局；超时等同拒绝
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// 附带签发给被拦截工具的一次性令牌
    Confirm(ConfirmationToken),
    Deny,
    Timeout,
}

#[derive(Debug, Clone)]
pub enum Input {
    Start,
    /// REPLANNING → PLANNING
    Replan,
    Role(RoleOutput),
    Resume(Resolution),
    Cancel,
    Fatal(String),
}

impl Input {
    fn label(&self) -> &'static str {
        match self {
            Input::Start => "start",
            Input::Replan => "replan",
            Input::Role(RoleOutput::Architect(_)) => "architect output",
            Input::Role(RoleOutput::Executor { .. }) => "executor output",
            Input::Role(RoleOutput::Verifier { .. }) => "verifier output",
            Input::Resume(_) => "resume",
            Input::Cancel => "cancel",
            Input::Fatal(_) => "fatal error",
        }
    }
}

/// 编排器下一步要做的事
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    Start,
    Plan,
    Replan,
    Execute(StepId),
    Verify(StepId),
    AwaitResume,
    /// 已到终态
    Finish,
    /// 记录自相矛盾（如 EXECUTING 却没有当前步骤）
    Inconsistent(String),
}

pub fn next_action(state: &TaskState) -> NextAction {
    match state.status {
        TaskStatus::Init => NextAction::Start,
        TaskStatus::Planning => NextAction::Plan,
        TaskStatus::Replanning => NextAction::Replan,
        TaskStatus::Executing => match state.current_step() {
            Some(step) => NextAction::Execute(step.id),
            None => NextAction::Inconsistent("EXECUTING without a current step".into()),
        },
        TaskStatus::Verifying => match state.current_step() {
            Some(step) => NextAction::Verify(step.id),
            None => NextAction::Inconsistent("VERIFYING without a current step".into()),
        },
        TaskStatus::Paused => NextAction::AwaitResume,
        TaskStatus::Done | TaskStatus::Failed => NextAction::Finish,
    }
}

pub fn advance(mut state: TaskState, input: Input, policy: &EscalationPolicy) -> TaskState {
    if state.status.is_terminal() {
        tracing::warn!(
            run_id = %state.run_id,
            status = %state.status,
            input = input.label(),
            "input ignored after terminal state"
        );
        return state;
    }

    match (state.status, input) {
        (_, Input::Cancel) => fail(state, "cancelled"),
        (_, Input::Fatal(msg)) => fail(state, RuntimeError::Fatal(msg).to_string()),
        (TaskStatus::Init, Input::Start) => {
            state.set_status(TaskStatus::Planning);
            state
        }
        (TaskStatus::Replanning, Input::Replan) => {
            state.fail_count = 0;
            state.set_status(TaskStatus::Planning);
            state
        }
        (TaskStatus::Planning, Input::Role(RoleOutput::Architect(plan))) => match plan {
            Ok(steps) => accept_plan(state, steps),
            Err(e) => role_failed(state, e),
        },
        (TaskStatus::Executing, Input::Role(RoleOutput::Executor { step_id, outcome })) => {
            match outcome {
                Ok(exec) => record_execution(state, step_id, exec),
                Err(e) => role_failed(state, e),
            }
        }
        (TaskStatus::Verifying, Input::Role(RoleOutput::Verifier { step_id, verdict })) => {
            match verdict {
                Ok(v) => apply_verdict(state, step_id, v, policy),
                Err(e) => role_failed(state, e),
            }
        }
        (TaskStatus::Paused, Input::Resume(resolution)) => resume(state, resolution),
        (status, other) => {
            let msg = format!("unexpected {} while {}", other.label(), status);
            fail(state, RuntimeError::Fatal(msg).to_string())
        }
    }
}

fn role_failed(state: TaskState, err: RoleError) -> TaskState {
    let err: RuntimeError = err.into();
    match ErrorRouter::new().route(&err) {
        Routing::FailRun => fail(state, err.to_string()),
        other => {
            tracing::error!(routing = ?other, error = %err, "unexpected routing for role error");
            fail(state, err.to_string())
        }
    }
}

fn fail(mut state: TaskState, reason: impl Into<String>) -> TaskState {
    let mut reason = reason.into();
    if reason.trim().is_empty() {
        reason = "run failed without explanation".to_string();
    }
    if let Some(i) = state.current_step_index.take() {
        if let Some(step) = state.steps.get_mut(i) {
            if step.status == StepStatus::InProgress {
                step.status = StepStatus::Failed;
            }
        }
    }
    state.pause_info = None;
    state.pending_grant = None;
    state.final_response = None;
    tracing::warn!(run_id = %state.run_id, reason = %reason, "run failed");
    state.failure_reason = Some(reason);
    state.set_status(TaskStatus::Failed);
    state
}

fn accept_plan(mut state: TaskState, descriptions: Vec<String>) -> TaskState {
    let descriptions: Vec<String> = descriptions
        .into_iter()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect();
    if descriptions.is_empty() {
        return fail(state, "architect produced an empty plan");
    }

    // 旧计划中未完成的步骤被新计划取代
    for step in state.steps.iter_mut() {
        if matches!(step.status, StepStatus::Pending | StepStatus::InProgress) {
            step.status = StepStatus::Failed;
        }
    }

    let mut lines = Vec::with_capacity(descriptions.len());
    for desc in descriptions {
        let id = state.allocate_step_id();
        lines.push(format!("#{} {}", id, desc));
        state.steps.push(crate::core::Step::new(id, desc));
    }
    let plan_no = state.plans_accepted() + 1;
    state.push_history(
        EntryKind::Plan,
        None,
        format!("plan {}: {}", plan_no, lines.join("; ")),
    );
    start_next_step(state)
}

/// 选出 id 最小的待执行步骤进入 EXECUTING；没有则 DONE
fn start_next_step(mut state: TaskState) -> TaskState {
    match state.lowest_pending() {
        Some(i) => {
            state.steps[i].status = StepStatus::InProgress;
            state.current_step_index = Some(i);
            state.set_status(TaskStatus::Executing);
            state
        }
        None => complete(state),
    }
}

fn complete(mut state: TaskState) -> TaskState {
    state.current_step_index = None;
    let mut response = format!("Completed: {}", state.task_description());
    for step in state.steps.iter().filter(|s| s.status == StepStatus::Done) {
        let outcome = step
            .result
            .as_ref()
            .map(StepResult::summary)
            .unwrap_or_default();
        response.push_str(&format!("\n- {}: {}", step.description, outcome));
    }
    state.final_response = Some(response);
    state.set_status(TaskStatus::Done);
    state
}

fn current_matches(state: &TaskState, step_id: StepId) -> Result<usize, String> {
    match state.current_step_index {
        Some(i) if state.steps.get(i).map(|s| s.id) == Some(step_id) => Ok(i),
        Some(i) => Err(format!(
            "output for step #{} but current step is #{}",
            step_id,
            state.steps.get(i).map(|s| s.id).unwrap_or_default()
        )),
        None => Err(format!("output for step #{} with no current step", step_id)),
    }
}

fn record_execution(mut state: TaskState, step_id: StepId, exec: Execution) -> TaskState {
    let idx = match current_matches(&state, step_id) {
        Ok(i) => i,
        Err(msg) => return fail(state, RuntimeError::Fatal(msg).to_string()),
    };
    state.pending_grant = None;

    if let Some(err) = exec.decision.to_error() {
        if ErrorRouter::new().route(&err) == Routing::Pause {
            return pause(state, idx, exec);
        }
    }

    // 工具层错误作为步骤结果交给 Verifier，不直接改变控制流
    if let StepResult::ToolError { tool, error } = &exec.result {
        let err = RuntimeError::ToolExecution {
            tool: tool.clone(),
            message: error.clone(),
        };
        if ErrorRouter::new().route(&err) != Routing::RecordAsStepResult {
            return fail(state, err.to_string());
        }
        tracing::debug!(run_id = %state.run_id, step_id, error = %err, "tool error recorded as step result");
    }

    let summary = exec.result.summary();
    state.steps[idx].result = Some(exec.result);
    state.push_history(EntryKind::StepOutcome, Some(step_id), summary);
    state.set_status(TaskStatus::Verifying);
    state
}

fn pause(mut state: TaskState, idx: usize, exec: Execution) -> TaskState {
    let step = &mut state.steps[idx];
    step.status = StepStatus::Pending;
    let step_id = step.id;
    let decision = exec.decision;
    let reason = decision.rationale.clone();
    state.current_step_index = None;
    state.push_history(
        EntryKind::Permission,
        Some(step_id),
        format!(
            "tool '{}' paused ({:?}): {}",
            decision.tool_name, decision.classification, reason
        ),
    );
    state.pause_info = Some(PauseInfo {
        tool_name: decision.tool_name.clone(),
        reason,
        resume_token: ResumeToken::new(),
        step_id,
        classification: decision.classification,
        confirmable: decision.confirmable,
        call: exec.call,
        requested_at: chrono::Utc::now(),
    });
    state.set_status(TaskStatus::Paused);
    state
}

fn apply_verdict(
    mut state: TaskState,
    step_id: StepId,
    verdict: Verdict,
    policy: &EscalationPolicy,
) -> TaskState {
    let idx = match current_matches(&state, step_id) {
        Ok(i) => i,
        Err(msg) => return fail(state, RuntimeError::Fatal(msg).to_string()),
    };

    match verdict {
        Verdict::TaskComplete => {
            let others_pending = state
                .steps
                .iter()
                .any(|s| s.id != step_id && s.status == StepStatus::Pending);
            if others_pending {
                state.verifier_violations += 1;
                tracing::warn!(
                    run_id = %state.run_id,
                    step_id,
                    violations = state.verifier_violations,
                    "premature TASK_COMPLETE rejected, treating step as verified"
                );
            }
            step_succeeded(state, idx)
        }
        Verdict::Success => step_succeeded(state, idx),
        Verdict::Failure(reason) => step_failed(state, idx, reason, policy),
    }
}

fn step_succeeded(mut state: TaskState, idx: usize) -> TaskState {
    let step_id = state.steps[idx].id;
    state.steps[idx].status = StepStatus::Done;
    state.fail_count = 0;
    state.current_step_index = None;
    // 已验证成功的输出降为最低优先级
    if let Some(entry) = state
        .history
        .iter_mut()
        .rev()
        .find(|e| e.step_id == Some(step_id) && e.kind == EntryKind::StepOutcome)
    {
        entry.kind = EntryKind::StepSuccess;
    }
    start_next_step(state)
}

fn step_failed(
    mut state: TaskState,
    idx: usize,
    reason: String,
    policy: &EscalationPolicy,
) -> TaskState {
    let reason = if reason.trim().is_empty() {
        "verification failed".to_string()
    } else {
        reason
    };
    let err = RuntimeError::VerificationFailure(reason.clone());
    if ErrorRouter::new().route(&err) != Routing::CountFailure {
        return fail(state, err.to_string());
    }
    state.fail_count += 1;
    let step = &mut state.steps[idx];
    step.retry_count += 1;
    let step_id = step.id;
    let description = step.description.clone();
    state.failure_history.push(FailureRecord {
        step_id,
        step_description: description,
        reason: reason.clone(),
        strategy_shift: false,
        hint: None,
    });
    state.push_history(EntryKind::VerificationFailure, Some(step_id), reason);

    let failures: Vec<&FailureRecord> = state
        .failure_history
        .iter()
        .filter(|f| f.step_id == step_id)
        .collect();
    let decision = policy.decide(
        state.fail_count,
        state.replan_count,
        &state.steps[idx],
        &failures,
    );
    tracing::info!(
        run_id = %state.run_id,
        step_id,
        fail_count = state.fail_count,
        decision = ?decision,
        "verification failure"
    );

    match decision {
        Escalation::Retry => {
            state.steps[idx].status = StepStatus::Pending;
            state.current_step_index = None;
            start_next_step(state)
        }
        Escalation::Replan(shift) => {
            if let Some(last) = state.failure_history.last_mut() {
                last.strategy_shift = shift.shift;
                last.hint = shift.hint;
            }
            state.steps[idx].status = StepStatus::Failed;
            state.current_step_index = None;
            state.replan_count += 1;
            state.set_status(TaskStatus::Replanning);
            state
        }
        Escalation::GiveUp(why) => fail(state, why),
    }
}

fn resume(mut state: TaskState, resolution: Resolution) -> TaskState {
    let Some(pause) = state.pause_info.clone() else {
        return fail(state, RuntimeError::Fatal("PAUSED without pause_info".into()).to_string());
    };
    match resolution {
        Resolution::Confirm(token) => {
            if !pause.confirmable {
                tracing::warn!(tool = %pause.tool_name, "confirm ignored for irrevocable block");
                return state;
            }
            let Some(idx) = state.steps.iter().position(|s| s.id == pause.step_id) else {
                let msg = format!("paused step #{} no longer exists", pause.step_id);
                return fail(state, RuntimeError::Fatal(msg).to_string());
            };
            state.pause_info = None;
            state.push_history(
                EntryKind::Permission,
                Some(pause.step_id),
                format!("operator confirmed tool '{}'", pause.tool_name),
            );
            state.pending_grant = Some(Grant {
                step_id: pause.step_id,
                call: pause.call,
                token,
            });
            state.steps[idx].status = StepStatus::InProgress;
            state.current_step_index = Some(idx);
            state.set_status(TaskStatus::Executing);
            state
        }
        Resolution::Deny => fail(
            state,
            format!(
                "operator denied tool '{}': {}",
                pause.tool_name, pause.reason
            ),
        ),
        Resolution::Timeout => fail(
            state,
            format!(
                "confirmation for tool '{}' timed out (treated as deny): {}",
                pause.tool_name, pause.reason
            ),
        ),
    }
}
