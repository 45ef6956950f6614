//! KnowledgeExtractor：运行结束（DONE 或 FAILED）时把结果整理成记忆
//!
//! 只产出 EPISODIC / SEMANTIC 记录；由编排器在终态时恰好调用一次。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{RoleError, StepResult, StepStatus, TaskState, TaskStatus};
use crate::llm::{LlmClient, Message};
use crate::memory::MemoryRecord;
use crate::roles::RoleKind;

#[async_trait]
pub trait KnowledgeExtractor: Send + Sync {
    async fn extract(&self, state: &TaskState) -> Result<Vec<MemoryRecord>, RoleError>;
}

/// 确定性的提取：一条 Episodic 结局记录；强制重规划的失败各记一条；DONE 时再整理一条 Semantic
#[derive(Debug, Default)]
pub struct OutcomeExtractor;

impl OutcomeExtractor {
    fn records(state: &TaskState) -> Vec<MemoryRecord> {
        let run = state.run_id;
        let mut records = Vec::new();

        let done: Vec<&str> = state
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Done)
            .map(|s| s.description.as_str())
            .collect();
        let outcome = match state.status {
            TaskStatus::Done => format!(
                "task '{}' completed in {} steps ({} replans): {}",
                state.task_description(),
                done.len(),
                state.replan_count,
                done.join("; ")
            ),
            _ => format!(
                "task '{}' ended {} after {} completed steps: {}",
                state.task_description(),
                state.status,
                done.len(),
                state
                    .failure_reason
                    .as_deref()
                    .unwrap_or("no reason recorded")
            ),
        };
        let confidence = if state.status == TaskStatus::Done { 0.9 } else { 0.6 };
        records.push(MemoryRecord::episodic(outcome, confidence, run));

        for failure in state.failure_history.iter().filter(|f| f.strategy_shift) {
            records.push(MemoryRecord::episodic(
                format!(
                    "step '{}' kept failing: {}",
                    failure.step_description, failure.reason
                ),
                0.7,
                run,
            ));
        }

        if state.status == TaskStatus::Done && !done.is_empty() {
            records.push(MemoryRecord::semantic(
                format!(
                    "a working plan for '{}': {}",
                    state.task_description(),
                    done.join(" -> ")
                ),
                0.7,
                run,
            ));
        }
        records
    }
}

#[async_trait]
impl KnowledgeExtractor for OutcomeExtractor {
    async fn extract(&self, state: &TaskState) -> Result<Vec<MemoryRecord>, RoleError> {
        Ok(Self::records(state))
    }
}

/// 在确定性记录之外，请 LLM 归纳一条可复用的经验（Semantic）；LLM 失败时只保留确定性记录
pub struct LlmKnowledgeExtractor {
    llm: Arc<dyn LlmClient>,
}

impl LlmKnowledgeExtractor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn transcript(state: &TaskState) -> String {
        let mut s = format!("Task: {}\nStatus: {}\n", state.task_description(), state.status);
        for step in &state.steps {
            let result = step
                .result
                .as_ref()
                .map(StepResult::summary)
                .unwrap_or_else(|| "(not run)".to_string());
            s.push_str(&format!(
                "- #{} [{:?}] {}: {}\n",
                step.id, step.status, step.description, result
            ));
        }
        for f in &state.failure_history {
            s.push_str(&format!("failure on #{}: {}\n", f.step_id, f.reason));
        }
        if let Some(reason) = &state.failure_reason {
            s.push_str(&format!("Run failed: {}\n", reason));
        }
        s
    }
}

#[async_trait]
impl KnowledgeExtractor for LlmKnowledgeExtractor {
    async fn extract(&self, state: &TaskState) -> Result<Vec<MemoryRecord>, RoleError> {
        let mut records = OutcomeExtractor::records(state);
        let messages = vec![
            Message::system(
                "Role: KnowledgeExtractor\n\
                 Distill one short, reusable lesson from this run. Reply with the lesson only.",
            ),
            Message::user(Self::transcript(state)),
        ];
        match self.llm.complete(&messages).await {
            Ok(lesson) if !lesson.trim().is_empty() => {
                let confidence = if state.status == TaskStatus::Done { 0.8 } else { 0.5 };
                records.push(MemoryRecord::semantic(lesson.trim(), confidence, state.run_id));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    role = %RoleKind::KnowledgeExtractor,
                    error = %e,
                    "lesson extraction failed, keeping outcome records only"
                );
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RunId, Step};
    use crate::llm::ScriptedLlmClient;
    use crate::memory::MemoryTier;

    fn done_state() -> TaskState {
        let mut state = TaskState::new(RunId::new(), "rotate logs");
        let mut step = Step::new(1, "compress old logs");
        step.status = StepStatus::Done;
        step.result = Some(StepResult::Output("3 files".into()));
        state.steps.push(step);
        state.status = TaskStatus::Done;
        state
    }

    #[tokio::test]
    async fn test_outcome_records_for_done() {
        let records = OutcomeExtractor.extract(&done_state()).await.unwrap();
        assert!(records.iter().any(|r| r.tier == MemoryTier::Episodic));
        assert!(records.iter().any(|r| r.tier == MemoryTier::Semantic));
        assert!(records.iter().all(|r| r.tier != MemoryTier::Working));
    }

    #[tokio::test]
    async fn test_failed_run_gets_episodic_only() {
        let mut state = TaskState::new(RunId::new(), "rotate logs");
        state.status = TaskStatus::Failed;
        state.failure_reason = Some("cancelled".into());
        let records = OutcomeExtractor.extract(&state).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tier, MemoryTier::Episodic);
        assert!(records[0].content.contains("cancelled"));
    }

    #[tokio::test]
    async fn test_llm_lesson_appended() {
        let llm = Arc::new(ScriptedLlmClient::new(["Compress before deleting."]));
        let records = LlmKnowledgeExtractor::new(llm)
            .extract(&done_state())
            .await
            .unwrap();
        let last = records.last().unwrap();
        assert_eq!(last.tier, MemoryTier::Semantic);
        assert_eq!(last.content, "Compress before deleting.");
    }
}
