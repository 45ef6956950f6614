//! 编排器：单次运行的主控循环
//!
//! 独占 TaskState，依据 next_action 决定调用哪个角色，收集输出后交给纯函数 advance。
//! 取消只在状态转移边界生效：正在运行的角色与工具调用会跑完并记录结果；PAUSED 等待期间立即生效。
//! 进入终态后恰好调用一次 KnowledgeExtractor，写入记忆并丢弃本次运行的 Working 记录。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeSection;
use crate::core::escalation::EscalationPolicy;
use crate::core::runtime::{ResumeDecision, RunControl};
use crate::core::transition::{advance, next_action, Execution, Input, NextAction, Resolution, RoleOutput};
use crate::core::{RunId, RunSnapshot, StepId, TaskState, TaskStatus};
use crate::memory::{ContextWindowManager, EntryKind, MemoryRecord, MemoryStore, MemoryTier};
use crate::permission::{ConfirmationToken, PermissionGate};
use crate::roles::{RoleKind, Roles};
use crate::stream::{StreamChannel, StreamSink};
use crate::tools::ToolExecutor;

/// 编排器自身在流中的名字（暂停原因、最终结果）
pub const ORCHESTRATOR_AGENT: &str = "orchestrator";

pub struct Orchestrator {
    roles: Roles,
    tools: Arc<ToolExecutor>,
    gate: Arc<PermissionGate>,
    memory: Arc<dyn MemoryStore>,
    settings: RuntimeSection,
    escalation: EscalationPolicy,
}

impl Orchestrator {
    pub fn new(
        roles: Roles,
        tools: Arc<ToolExecutor>,
        gate: Arc<PermissionGate>,
        memory: Arc<dyn MemoryStore>,
        settings: RuntimeSection,
        escalation: EscalationPolicy,
    ) -> Self {
        Self {
            roles,
            tools,
            gate,
            memory,
            settings,
            escalation,
        }
    }

    pub fn memory(&self) -> &Arc<dyn MemoryStore> {
        &self.memory
    }

    pub fn settings(&self) -> &RuntimeSection {
        &self.settings
    }

    /// 驱动一次运行直到 DONE / FAILED，返回最终记录
    pub async fn run(
        &self,
        run_id: RunId,
        task: String,
        control: Arc<RunControl>,
        sink: Arc<dyn StreamSink>,
        snapshots: watch::Sender<RunSnapshot>,
    ) -> TaskState {
        let channel = StreamChannel::open(sink);
        let window = ContextWindowManager::new(self.settings.token_budget);
        let cancel = control.cancel_token();
        let mut state = TaskState::new(run_id, task);
        // 本次运行签发的确认令牌，收尾时作废未使用的
        let mut issued: Vec<ConfirmationToken> = Vec::new();
        tracing::info!(run_id = %run_id, task = %state.task_description(), "run started");

        loop {
            // 先登记恢复槽位再发布快照，看到 PAUSED 的调用方可以立即恢复
            let mut decision = match (&state.status, &state.pause_info) {
                (TaskStatus::Paused, Some(p)) => {
                    Some(control.await_decision(p.resume_token, p.confirmable))
                }
                _ => None,
            };
            let _ = snapshots.send(RunSnapshot::from(&state));
            if state.status.is_terminal() {
                break;
            }
            if cancel.is_cancelled() {
                if let Some(p) = &state.pause_info {
                    control.expire(p.resume_token);
                }
                state = self.advance(state, Input::Cancel);
                continue;
            }

            let input = match next_action(&state) {
                NextAction::Start => Input::Start,
                NextAction::Replan => Input::Replan,
                NextAction::Plan => self.plan(&mut state, &window, &channel).await,
                NextAction::Execute(id) => self.execute(&mut state, id, &window, &channel).await,
                NextAction::Verify(id) => self.verify(&mut state, id, &window, &channel).await,
                NextAction::AwaitResume => match decision.take() {
                    Some(rx) => self.await_resume(&state, &control, rx, &channel, &cancel).await,
                    None => Input::Fatal("PAUSED without pause_info".into()),
                },
                NextAction::Finish => break,
                NextAction::Inconsistent(msg) => Input::Fatal(msg),
            };
            if let Input::Resume(Resolution::Confirm(token)) = &input {
                issued.push(*token);
            }
            state = self.advance(state, input);
        }

        self.finish(&state, &channel, &issued).await;
        channel.close().await;
        let _ = snapshots.send(RunSnapshot::from(&state));
        state
    }

    fn advance(&self, state: TaskState, input: Input) -> TaskState {
        let next = advance(state, input, &self.escalation);
        if let Err(violation) = next.check_invariants(self.escalation.max_replans) {
            tracing::error!(run_id = %next.run_id, %violation, "task state invariant violated");
        }
        next
    }

    async fn plan(
        &self,
        state: &mut TaskState,
        window: &ContextWindowManager,
        channel: &StreamChannel,
    ) -> Input {
        // 首次规划前检索相关经验
        if state.plans_accepted() == 0 && state.failure_history.is_empty() {
            let hits = self
                .memory
                .query_similar(state.task_description(), self.settings.memory_query_k)
                .await;
            tracing::debug!(run_id = %state.run_id, hits = hits.len(), "memory retrieval");
            for hit in hits {
                state.push_history(
                    EntryKind::Retrieved,
                    None,
                    format!("{:?} ({:.2}): {}", hit.tier, hit.confidence, hit.content),
                );
            }
        }
        state.context_snapshot = window.build_view(&state.history);

        let stream = channel.agent(RoleKind::Architect.agent_name());
        let output = self
            .roles
            .architect
            .plan(
                state.task_description(),
                &state.context_snapshot,
                &state.failure_history,
                &stream,
            )
            .await;
        Input::Role(RoleOutput::Architect(output))
    }

    async fn execute(
        &self,
        state: &mut TaskState,
        step_id: StepId,
        window: &ContextWindowManager,
        channel: &StreamChannel,
    ) -> Input {
        let Some(step) = state.step(step_id).cloned() else {
            return Input::Fatal(format!("step #{} not found", step_id));
        };
        state.context_snapshot = window.build_view(&state.history);
        let stream = channel.agent(RoleKind::Executor.agent_name());

        // 确认后重放被拦下的那次调用，不再重新选择
        let grant = state
            .pending_grant
            .clone()
            .filter(|g| g.step_id == step_id);
        let (call, token) = match grant {
            Some(g) => {
                stream.finish(format!("re-running confirmed call to '{}'", g.call.tool));
                (g.call, Some(g.token))
            }
            None => {
                let proposed = self
                    .roles
                    .executor
                    .propose(&step, &state.context_snapshot, &self.tools, &stream)
                    .await;
                match proposed {
                    Ok(call) => (call, None),
                    Err(e) => {
                        return Input::Role(RoleOutput::Executor {
                            step_id,
                            outcome: Err(e),
                        })
                    }
                }
            }
        };

        let capabilities = self.tools.capabilities(&call.tool);
        let decision = self
            .gate
            .classify(&call.tool, &capabilities, &call.args, token.as_ref());
        let result = self
            .roles
            .executor
            .execute(&step, &call, &self.tools, &decision)
            .await;

        if !result.is_blocked() {
            let trail = MemoryRecord::working(
                format!("step #{} '{}': {}", step.id, step.description, result.summary()),
                state.run_id,
            );
            if let Err(e) = self.memory.write_working(trail).await {
                tracing::warn!(run_id = %state.run_id, error = %e, "working memory write failed");
            }
        }

        Input::Role(RoleOutput::Executor {
            step_id,
            outcome: Ok(Execution {
                call,
                decision,
                result,
            }),
        })
    }

    async fn verify(
        &self,
        state: &mut TaskState,
        step_id: StepId,
        window: &ContextWindowManager,
        channel: &StreamChannel,
    ) -> Input {
        let Some(step) = state.step(step_id).cloned() else {
            return Input::Fatal(format!("step #{} not found", step_id));
        };
        let Some(result) = step.result.clone() else {
            return Input::Fatal(format!("step #{} has no result to verify", step_id));
        };
        state.context_snapshot = window.build_view(&state.history);

        let stream = channel.agent(RoleKind::Verifier.agent_name());
        let verdict = self
            .roles
            .verifier
            .verify(&step, &result, &state.context_snapshot, &stream)
            .await;
        Input::Role(RoleOutput::Verifier { step_id, verdict })
    }

    /// 暂停：把原因原样交给 UI，等待确认 / 拒绝 / 超时 / 取消
    async fn await_resume(
        &self,
        state: &TaskState,
        control: &RunControl,
        decision: oneshot::Receiver<ResumeDecision>,
        channel: &StreamChannel,
        cancel: &CancellationToken,
    ) -> Input {
        let Some(pause) = state.pause_info.clone() else {
            return Input::Fatal("PAUSED without pause_info".into());
        };
        channel.agent(ORCHESTRATOR_AGENT).finish(pause.reason.clone());
        tracing::info!(
            run_id = %state.run_id,
            tool = %pause.tool_name,
            token = %pause.resume_token,
            reason = %pause.reason,
            "awaiting resume"
        );

        let timeout = Duration::from_secs(self.settings.confirmation_timeout_seconds);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                control.expire(pause.resume_token);
                Input::Cancel
            }
            r = tokio::time::timeout(timeout, decision) => match r {
                Ok(Ok(ResumeDecision::Confirm)) => {
                    let grant = self.gate.issue_token(&pause.tool_name);
                    Input::Resume(Resolution::Confirm(grant))
                }
                Ok(Ok(ResumeDecision::Deny)) => Input::Resume(Resolution::Deny),
                Ok(Err(_)) => {
                    tracing::warn!(run_id = %state.run_id, "resume channel closed, treating as deny");
                    Input::Resume(Resolution::Deny)
                }
                Err(_) => {
                    control.expire(pause.resume_token);
                    Input::Resume(Resolution::Timeout)
                }
            },
        }
    }

    /// 终态收尾：提取知识、丢弃 Working 记录、作废未用的确认令牌、把结果交给 UI
    async fn finish(&self, state: &TaskState, channel: &StreamChannel, issued: &[ConfirmationToken]) {
        match self.roles.extractor.extract(state).await {
            Ok(records) => {
                let mut written = 0;
                for record in records {
                    if record.tier == MemoryTier::Working {
                        tracing::warn!(run_id = %state.run_id, "extractor produced a WORKING record, skipped");
                        continue;
                    }
                    match self.memory.write_extracted(record).await {
                        Ok(_) => written += 1,
                        Err(e) => tracing::warn!(run_id = %state.run_id, error = %e, "memory write rejected"),
                    }
                }
                tracing::info!(run_id = %state.run_id, written, "knowledge extracted");
            }
            Err(e) => tracing::warn!(run_id = %state.run_id, error = %e, "knowledge extraction failed"),
        }
        let discarded = self.memory.discard_working(state.run_id).await;
        let revoked = issued.iter().filter(|t| self.gate.revoke(t)).count();
        if revoked > 0 {
            tracing::info!(run_id = %state.run_id, revoked, "unused confirmation tokens revoked");
        }

        let orchestrator = channel.agent(ORCHESTRATOR_AGENT);
        match state.status {
            TaskStatus::Done => {
                orchestrator.finish(state.final_response.clone().unwrap_or_default());
            }
            _ => {
                orchestrator.finish(
                    state
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| format!("run ended {}", state.status)),
                );
            }
        }
        tracing::info!(
            run_id = %state.run_id,
            status = %state.status,
            steps = state.steps.len(),
            replans = state.replan_count,
            discarded,
            "run finished"
        );
    }
}
