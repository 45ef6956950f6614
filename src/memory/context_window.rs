//! 上下文窗口管理
//!
//! 从运行历史中按优先级组装受 token 预算约束的视图，供 Architect / Executor / Verifier 使用。
//! 超出预算时按 (优先级, 先后) 升序驱逐整条记录，并用一条紧凑的摘要记录替代被驱逐的内容；
//! 不会在记录中间截断。同样的历史与预算总是得到同样的视图。

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::{RuntimeError, StepId};
use crate::memory::TokenEstimator;

/// 最近的若干条记录获得额外权重
const RECENT_WINDOW: usize = 3;
const RECENT_BONUS: u32 = 50;
/// 每条记录的格式开销（标签、换行）
const ENTRY_OVERHEAD: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// 任务描述，永不驱逐
    Task,
    /// 从记忆中检索到的相关经验
    Retrieved,
    Plan,
    StepSuccess,
    /// 工具层错误等执行结果
    StepOutcome,
    VerificationFailure,
    Permission,
    /// 驱逐后生成的摘要
    Summary,
}

impl EntryKind {
    fn base_priority(&self) -> u32 {
        match self {
            EntryKind::Task => u32::MAX,
            EntryKind::VerificationFailure => 80,
            EntryKind::Plan => 75,
            EntryKind::Permission => 70,
            EntryKind::StepOutcome => 40,
            EntryKind::Retrieved => 30,
            EntryKind::StepSuccess => 20,
            EntryKind::Summary => 10,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            EntryKind::Task => "task",
            EntryKind::Retrieved => "retrieved",
            EntryKind::Plan => "plan",
            EntryKind::StepSuccess => "step ok",
            EntryKind::StepOutcome => "step outcome",
            EntryKind::VerificationFailure => "verification failure",
            EntryKind::Permission => "permission",
            EntryKind::Summary => "summary",
        }
    }
}

/// 运行历史中的一条记录；seq 在运行内单调递增
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub seq: u64,
    pub kind: EntryKind,
    pub step_id: Option<StepId>,
    pub content: String,
}

impl HistoryEntry {
    fn cost(&self) -> usize {
        TokenEstimator::estimate(&self.content) + ENTRY_OVERHEAD
    }
}

/// build_view 的结果：角色输入使用的只读副本
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub entries: Vec<HistoryEntry>,
    pub token_budget: usize,
    pub used_tokens: usize,
    /// 被驱逐记录的 seq
    pub evicted: Vec<u64>,
}

impl ContextSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 渲染为 prompt 片段
    pub fn render(&self) -> String {
        let mut s = String::new();
        for e in &self.entries {
            match e.step_id {
                Some(id) => s.push_str(&format!("[{} #{}] {}\n", e.kind.label(), id, e.content)),
                None => s.push_str(&format!("[{}] {}\n", e.kind.label(), e.content)),
            }
        }
        s
    }
}

fn summary_text(evicted: &[&HistoryEntry]) -> String {
    let mut by_kind: BTreeMap<EntryKind, (usize, BTreeSet<StepId>)> = BTreeMap::new();
    for e in evicted {
        let slot = by_kind.entry(e.kind).or_default();
        slot.0 += 1;
        if let Some(id) = e.step_id {
            slot.1.insert(id);
        }
    }
    let parts: Vec<String> = by_kind
        .iter()
        .map(|(kind, (n, ids))| {
            if ids.is_empty() {
                format!("{} {}", n, kind.label())
            } else {
                let ids: Vec<String> = ids.iter().map(|i| format!("#{i}")).collect();
                format!("{} {} ({})", n, kind.label(), ids.join(", "))
            }
        })
        .collect();
    format!("evicted {} earlier entries: {}", evicted.len(), parts.join("; "))
}

/// 纯函数版本：同样的 history 与 token_budget 总是得到同样的视图
pub fn build_view(history: &[HistoryEntry], token_budget: usize) -> ContextSnapshot {
    let total: usize = history.iter().map(HistoryEntry::cost).sum();
    if total <= token_budget {
        return ContextSnapshot {
            entries: history.to_vec(),
            token_budget,
            used_tokens: total,
            evicted: Vec::new(),
        };
    }

    let overflow = RuntimeError::ContextOverflow {
        needed: total,
        budget: token_budget,
    };
    tracing::debug!(%overflow, "context over budget, evicting");

    let n = history.len();
    let priority = |idx: usize| -> u32 {
        let base = history[idx].kind.base_priority();
        if n - idx <= RECENT_WINDOW {
            base.saturating_add(RECENT_BONUS)
        } else {
            base
        }
    };

    // 候选：优先级低的先驱逐，同优先级旧的先驱逐
    let mut candidates: Vec<usize> = (0..n)
        .filter(|&i| history[i].kind != EntryKind::Task)
        .collect();
    candidates.sort_by_key(|&i| (priority(i), history[i].seq));

    let mut evicted_idx: BTreeSet<usize> = BTreeSet::new();
    let mut kept_cost = total;
    let mut summary_cost = 0;
    for idx in candidates {
        evicted_idx.insert(idx);
        kept_cost -= history[idx].cost();
        let evicted: Vec<&HistoryEntry> = evicted_idx.iter().map(|&i| &history[i]).collect();
        summary_cost = TokenEstimator::estimate(&summary_text(&evicted)) + ENTRY_OVERHEAD;
        if kept_cost + summary_cost <= token_budget {
            break;
        }
    }

    let Some(&first_evicted) = evicted_idx.iter().next() else {
        tracing::warn!(total, token_budget, "only pinned entries, nothing to evict");
        return ContextSnapshot {
            entries: history.to_vec(),
            token_budget,
            used_tokens: total,
            evicted: Vec::new(),
        };
    };
    let evicted_entries: Vec<&HistoryEntry> = evicted_idx.iter().map(|&i| &history[i]).collect();
    let summary = HistoryEntry {
        seq: history[first_evicted].seq,
        kind: EntryKind::Summary,
        step_id: None,
        content: summary_text(&evicted_entries),
    };

    let mut entries = Vec::with_capacity(n - evicted_idx.len() + 1);
    for (i, e) in history.iter().enumerate() {
        if i == first_evicted {
            entries.push(summary.clone());
        }
        if !evicted_idx.contains(&i) {
            entries.push(e.clone());
        }
    }

    let used_tokens = kept_cost + summary_cost;
    let evicted: Vec<u64> = evicted_entries.iter().map(|e| e.seq).collect();
    if used_tokens > token_budget {
        tracing::warn!(
            used_tokens,
            token_budget,
            "context still over budget after evicting every evictable entry"
        );
    }
    tracing::info!(
        evicted = evicted.len(),
        used_tokens,
        token_budget,
        summary = %summary.content,
        "context eviction"
    );

    ContextSnapshot {
        entries,
        token_budget,
        used_tokens,
        evicted,
    }
}

/// 每个运行一个实例，持有该运行的 token 预算
#[derive(Debug, Clone)]
pub struct ContextWindowManager {
    token_budget: usize,
}

impl ContextWindowManager {
    pub fn new(token_budget: usize) -> Self {
        Self { token_budget }
    }

    pub fn token_budget(&self) -> usize {
        self.token_budget
    }

    pub fn build_view(&self, history: &[HistoryEntry]) -> ContextSnapshot {
        build_view(history, self.token_budget)
    }
}
