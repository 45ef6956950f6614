//! 升级策略：校验失败计数、强制重规划与策略转向提示
//!
//! 同一步骤连续失败达到 max_replans 次即强制 REPLANNING；整个运行的重规划轮数超过
//! max_replan_cycles 则直接 FAILED。是否附带「策略转向」提示由可替换的 StrategyShiftPolicy 决定。

use std::sync::Arc;

use crate::config::RuntimeSection;
use crate::core::{FailureRecord, Step};

/// 策略钩子给出的提示
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StrategyShift {
    pub shift: bool,
    pub hint: Option<String>,
}

/// 何时要求 Architect 换一种做法
pub trait StrategyShiftPolicy: Send + Sync {
    /// failures 为该步骤在本轮内的失败记录（按时间顺序）
    fn on_escalation(&self, step: &Step, failures: &[&FailureRecord]) -> StrategyShift;
}

/// 默认策略：每次强制重规划都视为策略转向，并点名失败步骤的类别（描述的首个单词）
#[derive(Debug, Default)]
pub struct ShiftOnEscalation;

impl StrategyShiftPolicy for ShiftOnEscalation {
    fn on_escalation(&self, step: &Step, failures: &[&FailureRecord]) -> StrategyShift {
        let category = step
            .description
            .split_whitespace()
            .next()
            .unwrap_or("step")
            .to_lowercase();
        let last = failures
            .last()
            .map(|f| f.reason.as_str())
            .unwrap_or("unknown");
        StrategyShift {
            shift: true,
            hint: Some(format!(
                "strategy shift: '{}' failed {} times (last: {}); do not repeat the same '{}' approach",
                step.description,
                failures.len(),
                last,
                category
            )),
        }
    }
}

/// 从不转向：只重规划，不附带提示
#[derive(Debug, Default)]
pub struct NeverShift;

impl StrategyShiftPolicy for NeverShift {
    fn on_escalation(&self, _step: &Step, _failures: &[&FailureRecord]) -> StrategyShift {
        StrategyShift::default()
    }
}

/// 校验失败之后的下一步
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Escalation {
    /// 未到阈值，同一步骤重试
    Retry,
    /// 强制重规划
    Replan(StrategyShift),
    /// 超过运行级重规划上限
    GiveUp(String),
}

#[derive(Clone)]
pub struct EscalationPolicy {
    pub max_replans: u32,
    pub max_replan_cycles: u32,
    strategy: Arc<dyn StrategyShiftPolicy>,
}

impl std::fmt::Debug for EscalationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscalationPolicy")
            .field("max_replans", &self.max_replans)
            .field("max_replan_cycles", &self.max_replan_cycles)
            .finish()
    }
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self::from_config(&RuntimeSection::default())
    }
}

impl EscalationPolicy {
    pub fn new(max_replans: u32, max_replan_cycles: u32) -> Self {
        Self {
            max_replans: max_replans.max(1),
            max_replan_cycles,
            strategy: Arc::new(ShiftOnEscalation),
        }
    }

    pub fn from_config(cfg: &RuntimeSection) -> Self {
        Self::new(cfg.max_replans, cfg.max_replan_cycles)
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn StrategyShiftPolicy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// fail_count 为本次失败计入之后的值；replan_count 为已发生的重规划轮数
    pub fn decide(
        &self,
        fail_count: u32,
        replan_count: u32,
        step: &Step,
        failures: &[&FailureRecord],
    ) -> Escalation {
        if fail_count < self.max_replans {
            return Escalation::Retry;
        }
        if replan_count >= self.max_replan_cycles {
            return Escalation::GiveUp(format!(
                "replanning cap reached: {} cycles used, step '{}' still failing",
                replan_count, step.description
            ));
        }
        Escalation::Replan(self.strategy.on_escalation(step, failures))
    }
}
