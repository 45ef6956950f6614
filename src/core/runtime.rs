//! 运行注册表与 Resume API
//!
//! Runtime 在 tokio 上启动运行，按 RunId 跟踪每次运行的取消令牌、恢复槽位与快照通道。
//! 恢复是离散且幂等的：同一令牌的重复恢复是空操作；令牌过期或运行未暂停则拒绝。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{
    ErrorRouter, InvalidResumeError, Orchestrator, ResumeToken, Routing, RunId, RunSnapshot,
    RuntimeError, TaskState,
};
use crate::memory::MemoryStore;
use crate::stream::StreamSink;

/// 外部对暂停的决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResumeDecision {
    Confirm,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    Applied,
    /// 该令牌已被使用过，本次为空操作
    AlreadyApplied,
}

struct PendingResume {
    token: ResumeToken,
    confirmable: bool,
    reply: oneshot::Sender<ResumeDecision>,
}

#[derive(Default)]
struct ResumeSlot {
    pending: Option<PendingResume>,
    consumed: HashSet<ResumeToken>,
}

/// 单次运行的控制面：取消令牌 + 恢复槽位
pub struct RunControl {
    cancel: CancellationToken,
    slot: Mutex<ResumeSlot>,
}

impl RunControl {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            slot: Mutex::new(ResumeSlot::default()),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 编排器进入 PAUSED 时登记等待
    pub(crate) fn await_decision(
        &self,
        token: ResumeToken,
        confirmable: bool,
    ) -> oneshot::Receiver<ResumeDecision> {
        let (reply, rx) = oneshot::channel();
        if let Ok(mut slot) = self.slot.lock() {
            slot.pending = Some(PendingResume {
                token,
                confirmable,
                reply,
            });
        }
        rx
    }

    /// 超时或取消后撤销等待；之后的恢复请求视为运行未暂停
    pub(crate) fn expire(&self, token: ResumeToken) {
        if let Ok(mut slot) = self.slot.lock() {
            if slot.pending.as_ref().is_some_and(|p| p.token == token) {
                slot.pending = None;
            }
        }
    }

    pub fn resume(
        &self,
        token: ResumeToken,
        decision: ResumeDecision,
    ) -> Result<ResumeOutcome, InvalidResumeError> {
        let mut slot = self.slot.lock().map_err(|_| InvalidResumeError::NotPaused)?;
        if slot.consumed.contains(&token) {
            tracing::debug!(%token, "resume replay ignored");
            return Ok(ResumeOutcome::AlreadyApplied);
        }
        let Some(pending) = slot.pending.as_ref() else {
            return Err(InvalidResumeError::NotPaused);
        };
        if pending.token != token {
            return Err(InvalidResumeError::StaleToken);
        }
        if decision == ResumeDecision::Confirm && !pending.confirmable {
            return Err(InvalidResumeError::NotConfirmable);
        }
        let Some(pending) = slot.pending.take() else {
            return Err(InvalidResumeError::NotPaused);
        };
        slot.consumed.insert(token);
        if pending.reply.send(decision).is_err() {
            return Err(InvalidResumeError::NotPaused);
        }
        tracing::info!(%token, ?decision, "resume applied");
        Ok(ResumeOutcome::Applied)
    }
}

/// start 返回的句柄
pub struct RunHandle {
    pub run_id: RunId,
    snapshots: watch::Receiver<RunSnapshot>,
    join: JoinHandle<TaskState>,
}

impl RunHandle {
    pub fn snapshots(&self) -> watch::Receiver<RunSnapshot> {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> RunSnapshot {
        self.snapshots.borrow().clone()
    }

    /// 等待运行结束并取回最终记录
    pub async fn join(self) -> Result<TaskState, RuntimeError> {
        self.join
            .await
            .map_err(|e| RuntimeError::Fatal(format!("run task aborted: {}", e)))
    }
}

struct RunEntry {
    control: Arc<RunControl>,
    snapshots: watch::Receiver<RunSnapshot>,
}

type RunMap = Arc<Mutex<HashMap<RunId, RunEntry>>>;

/// 运行注册表：只保存进行中的运行，运行结束后由其任务自行注销
pub struct Runtime {
    orchestrator: Arc<Orchestrator>,
    runs: RunMap,
    /// 所有运行取消令牌的父令牌
    shutdown: CancellationToken,
}

impl Runtime {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            runs: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn memory(&self) -> Arc<dyn MemoryStore> {
        self.orchestrator.memory().clone()
    }

    /// 启动一次运行（需在 tokio 运行时内调用）
    pub fn start(&self, task: impl Into<String>, sink: Arc<dyn StreamSink>) -> RunHandle {
        let run_id = RunId::new();
        let control = Arc::new(RunControl::new(self.shutdown.child_token()));
        let (tx, rx) = watch::channel(RunSnapshot::initial(run_id));

        if let Ok(mut runs) = self.runs.lock() {
            runs.insert(
                run_id,
                RunEntry {
                    control: control.clone(),
                    snapshots: rx.clone(),
                },
            );
        }

        let orchestrator = self.orchestrator.clone();
        let runs = self.runs.clone();
        let task = task.into();
        let join = tokio::spawn(async move {
            let state = orchestrator.run(run_id, task, control, sink, tx).await;
            if let Ok(mut runs) = runs.lock() {
                runs.remove(&run_id);
            }
            tracing::debug!(run_id = %run_id, "run unregistered");
            state
        });
        RunHandle {
            run_id,
            snapshots: rx,
            join,
        }
    }

    fn control(&self, run_id: RunId) -> Result<Arc<RunControl>, InvalidResumeError> {
        let runs = self.runs.lock().map_err(|_| InvalidResumeError::UnknownRun)?;
        runs.get(&run_id)
            .map(|e| e.control.clone())
            .ok_or(InvalidResumeError::UnknownRun)
    }

    pub fn resume(
        &self,
        run_id: RunId,
        token: ResumeToken,
        decision: ResumeDecision,
    ) -> Result<ResumeOutcome, InvalidResumeError> {
        self.control(run_id)
            .and_then(|control| control.resume(token, decision))
            .inspect_err(|e| {
                // 被拒绝的恢复请求不改变运行状态
                let err = RuntimeError::from(e.clone());
                if ErrorRouter::new().route(&err) == Routing::Reject {
                    tracing::warn!(run_id = %run_id, %token, error = %err, "resume rejected");
                }
            })
    }

    pub fn cancel(&self, run_id: RunId) -> Result<(), InvalidResumeError> {
        let control = self.control(run_id)?;
        tracing::info!(run_id = %run_id, "cancel requested");
        control.cancel();
        Ok(())
    }

    /// 进行中的运行数
    pub fn active_runs(&self) -> usize {
        self.runs.lock().map(|runs| runs.len()).unwrap_or(0)
    }

    /// 进行中运行的最新快照；已结束的运行通过 RunHandle 获取
    pub fn snapshot(&self, run_id: RunId) -> Option<RunSnapshot> {
        let runs = self.runs.lock().ok()?;
        runs.get(&run_id).map(|e| e.snapshots.borrow().clone())
    }

    /// 取消所有运行
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_requires_pause() {
        let control = RunControl::new(CancellationToken::new());
        assert_eq!(
            control.resume(ResumeToken::new(), ResumeDecision::Confirm),
            Err(InvalidResumeError::NotPaused)
        );
    }

    #[test]
    fn test_resume_is_idempotent() {
        let control = RunControl::new(CancellationToken::new());
        let token = ResumeToken::new();
        let mut rx = control.await_decision(token, true);
        assert_eq!(control.resume(token, ResumeDecision::Confirm), Ok(ResumeOutcome::Applied));
        assert_eq!(rx.try_recv(), Ok(ResumeDecision::Confirm));
        assert_eq!(
            control.resume(token, ResumeDecision::Deny),
            Ok(ResumeOutcome::AlreadyApplied)
        );
    }

    #[test]
    fn test_stale_and_not_confirmable() {
        let control = RunControl::new(CancellationToken::new());
        let token = ResumeToken::new();
        let _rx = control.await_decision(token, false);
        assert_eq!(
            control.resume(ResumeToken::new(), ResumeDecision::Deny),
            Err(InvalidResumeError::StaleToken)
        );
        assert_eq!(
            control.resume(token, ResumeDecision::Confirm),
            Err(InvalidResumeError::NotConfirmable)
        );
        // 仍在等待，拒绝可以生效
        assert_eq!(control.resume(token, ResumeDecision::Deny), Ok(ResumeOutcome::Applied));
    }

    #[test]
    fn test_expired_wait_is_not_paused() {
        let control = RunControl::new(CancellationToken::new());
        let token = ResumeToken::new();
        let _rx = control.await_decision(token, true);
        control.expire(token);
        assert_eq!(
            control.resume(token, ResumeDecision::Confirm),
            Err(InvalidResumeError::NotPaused)
        );
    }
}
