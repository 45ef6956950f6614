//! 运行状态：TaskState 及其组成部分，RunSnapshot 投影
//!
//! TaskState 在一次运行的生命周期内由编排器独占；UI 只通过 watch 通道拿到轻量的 RunSnapshot。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::memory::{ContextSnapshot, EntryKind, HistoryEntry};
use crate::permission::{Classification, ConfirmationToken};
use crate::roles::RoleKind;
use crate::tools::ToolCall;

/// 步骤 ID：运行内单调递增，重规划后也不复用
pub type StepId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Init,
    Planning,
    Executing,
    Verifying,
    Replanning,
    Paused,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Init => "INIT",
            TaskStatus::Planning => "PLANNING",
            TaskStatus::Executing => "EXECUTING",
            TaskStatus::Verifying => "VERIFYING",
            TaskStatus::Replanning => "REPLANNING",
            TaskStatus::Paused => "PAUSED",
            TaskStatus::Done => "DONE",
            TaskStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

/// Executor 交回的步骤结果；工具错误与拦截都是数据，不是异常
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepResult {
    Output(String),
    ToolError {
        tool: String,
        error: String,
    },
    Blocked {
        tool: String,
        classification: Classification,
        rationale: String,
    },
}

impl StepResult {
    pub fn is_blocked(&self) -> bool {
        matches!(self, StepResult::Blocked { .. })
    }

    /// 写入上下文历史的单行描述
    pub fn summary(&self) -> String {
        match self {
            StepResult::Output(out) => out.clone(),
            StepResult::ToolError { tool, error } => format!("tool '{}' failed: {}", tool, error),
            StepResult::Blocked { tool, rationale, .. } => {
                format!("tool '{}' blocked: {}", tool, rationale)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub description: String,
    pub assigned_role: RoleKind,
    pub status: StepStatus,
    pub result: Option<StepResult>,
    pub retry_count: u32,
}

impl Step {
    pub fn new(id: StepId, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            assigned_role: RoleKind::Executor,
            status: StepStatus::Pending,
            result: None,
            retry_count: 0,
        }
    }
}

/// 暂停时签发给外部的恢复令牌
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResumeToken(Uuid);

impl ResumeToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ResumeToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 仅在 PAUSED 时存在
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseInfo {
    pub tool_name: String,
    /// 原样展示给 UI
    pub reason: String,
    pub resume_token: ResumeToken,
    pub step_id: StepId,
    pub classification: Classification,
    pub confirmable: bool,
    /// 被拦下的那次调用，确认后原样重放
    pub call: ToolCall,
    pub requested_at: DateTime<Utc>,
}

/// 确认后授予的一次性放行：只对指定步骤的那次调用有效
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    pub step_id: StepId,
    pub call: ToolCall,
    pub token: ConfirmationToken,
}

/// 校验失败记录，重规划时交给 Architect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub step_id: StepId,
    pub step_description: String,
    pub reason: String,
    pub strategy_shift: bool,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// 单次运行的完整状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub run_id: RunId,
    task_description: String,
    pub status: TaskStatus,
    pub steps: Vec<Step>,
    pub current_step_index: Option<usize>,
    pub fail_count: u32,
    /// 本次运行已发生的重规划轮数
    pub replan_count: u32,
    pub pause_info: Option<PauseInfo>,
    pub final_response: Option<String>,
    /// FAILED 时的非空说明
    pub failure_reason: Option<String>,
    pub failure_history: Vec<FailureRecord>,
    pub context_snapshot: ContextSnapshot,
    pub history: Vec<HistoryEntry>,
    pub pending_grant: Option<Grant>,
    pub transitions: Vec<Transition>,
    /// Verifier 过早宣布 TASK_COMPLETE 的次数
    pub verifier_violations: u32,
    next_step_id: StepId,
    next_seq: u64,
}

impl TaskState {
    pub fn new(run_id: RunId, task_description: impl Into<String>) -> Self {
        let task_description = task_description.into();
        let mut state = Self {
            run_id,
            task_description: String::new(),
            status: TaskStatus::Init,
            steps: Vec::new(),
            current_step_index: None,
            fail_count: 0,
            replan_count: 0,
            pause_info: None,
            final_response: None,
            failure_reason: None,
            failure_history: Vec::new(),
            context_snapshot: ContextSnapshot::default(),
            history: Vec::new(),
            pending_grant: None,
            transitions: Vec::new(),
            verifier_violations: 0,
            next_step_id: 1,
            next_seq: 0,
        };
        state.push_history(EntryKind::Task, None, task_description.clone());
        state.task_description = task_description;
        state
    }

    pub fn task_description(&self) -> &str {
        &self.task_description
    }

    pub fn push_history(&mut self, kind: EntryKind, step_id: Option<StepId>, content: impl Into<String>) {
        self.history.push(HistoryEntry {
            seq: self.next_seq,
            kind,
            step_id,
            content: content.into(),
        });
        self.next_seq += 1;
    }

    pub(crate) fn allocate_step_id(&mut self) -> StepId {
        let id = self.next_step_id;
        self.next_step_id += 1;
        id
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub(crate) fn step_mut(&mut self, id: StepId) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.current_step_index.and_then(|i| self.steps.get(i))
    }

    /// 待执行步骤中 id 最小者的下标
    pub fn lowest_pending(&self) -> Option<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status == StepStatus::Pending)
            .min_by_key(|(_, s)| s.id)
            .map(|(i, _)| i)
    }

    pub fn has_pending(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepStatus::Pending)
    }

    /// PLANNING → EXECUTING 的次数
    pub fn plans_accepted(&self) -> usize {
        self.count_transitions(TaskStatus::Planning, TaskStatus::Executing)
    }

    pub fn count_transitions(&self, from: TaskStatus, to: TaskStatus) -> usize {
        self.transitions
            .iter()
            .filter(|t| t.from == from && t.to == to)
            .count()
    }

    /// 变更状态并记录到转移日志
    pub(crate) fn set_status(&mut self, to: TaskStatus) {
        let from = self.status;
        if from == to {
            return;
        }
        self.transitions.push(Transition { from, to });
        self.status = to;
        tracing::info!(run_id = %self.run_id, %from, %to, "transition");
    }

    /// 检查记录级不变量，返回第一个被违反的描述
    pub fn check_invariants(&self, max_replans: u32) -> Result<(), String> {
        let in_progress = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::InProgress)
            .count();
        if in_progress > 1 {
            return Err(format!("{} steps in progress", in_progress));
        }
        if self.current_step_index.is_some()
            && !matches!(self.status, TaskStatus::Executing | TaskStatus::Verifying)
        {
            return Err(format!("current step index set while {}", self.status));
        }
        if self.pause_info.is_some() != (self.status == TaskStatus::Paused) {
            return Err("pause_info present iff PAUSED".to_string());
        }
        if self.pause_info.is_some() && self.final_response.is_some() {
            return Err("pause_info and final_response both set".to_string());
        }
        if self.final_response.is_some() && self.status != TaskStatus::Done {
            return Err("final_response set outside DONE".to_string());
        }
        if self.fail_count > max_replans
            || (self.fail_count == max_replans
                && max_replans > 0
                && !matches!(self.status, TaskStatus::Replanning | TaskStatus::Failed))
        {
            return Err(format!(
                "fail_count {} reached threshold {} without replanning",
                self.fail_count, max_replans
            ));
        }
        let mut ids: Vec<StepId> = self.steps.iter().map(|s| s.id).collect();
        ids.dedup();
        if ids.len() != self.steps.len() || ids.windows(2).any(|w| w[0] >= w[1]) {
            return Err("step ids not strictly increasing".to_string());
        }
        Ok(())
    }
}

/// 暂停信息的对外投影
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PauseView {
    pub tool_name: String,
    pub reason: String,
    pub resume_token: ResumeToken,
    pub confirmable: bool,
}

/// UI 看到的轻量投影（watch 通道）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSnapshot {
    pub run_id: RunId,
    pub status: TaskStatus,
    pub current_step: Option<StepId>,
    pub current_step_description: Option<String>,
    pub steps_done: usize,
    pub steps_total: usize,
    pub fail_count: u32,
    pub replan_count: u32,
    pub pause: Option<PauseView>,
    pub final_response: Option<String>,
    pub failure_reason: Option<String>,
}

impl From<&TaskState> for RunSnapshot {
    fn from(state: &TaskState) -> Self {
        let current = state.current_step();
        Self {
            run_id: state.run_id,
            status: state.status,
            current_step: current.map(|s| s.id),
            current_step_description: current.map(|s| s.description.clone()),
            steps_done: state
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::Done)
                .count(),
            steps_total: state
                .steps
                .iter()
                .filter(|s| matches!(s.status, StepStatus::Done | StepStatus::Pending | StepStatus::InProgress))
                .count(),
            fail_count: state.fail_count,
            replan_count: state.replan_count,
            pause: state.pause_info.as_ref().map(|p| PauseView {
                tool_name: p.tool_name.clone(),
                reason: p.reason.clone(),
                resume_token: p.resume_token,
                confirmable: p.confirmable,
            }),
            final_response: state.final_response.clone(),
            failure_reason: state.failure_reason.clone(),
        }
    }
}

impl RunSnapshot {
    pub fn initial(run_id: RunId) -> Self {
        Self {
            run_id,
            status: TaskStatus::Init,
            current_step: None,
            current_step_description: None,
            steps_done: 0,
            steps_total: 0,
            fail_count: 0,
            replan_count: 0,
            pause: None,
            final_response: None,
            failure_reason: None,
        }
    }
}
