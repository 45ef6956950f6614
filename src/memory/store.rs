//! 分层记忆门面
//!
//! MemoryStore 是外部持久化后端需满足的契约（query_similar / write）；TieredMemory 是进程内实现：
//! 三个独立的追加式存储，每层一把 RwLock（同层写入串行、读取并发）。相似度为关键词重叠数，
//! 后续可替换为真实向量库。

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::RunId;
use crate::memory::{MemoryRecord, MemoryTier};

/// 写入确认
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryAck {
    pub id: Uuid,
    pub tier: MemoryTier,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("{origin} may not write {tier:?} records")]
    TierViolation {
        tier: MemoryTier,
        origin: &'static str,
    },
}

/// 外部记忆存储契约
///
/// 编排器只通过该 trait 访问记忆；持久化后端实现 query_similar / write / discard_working 即可接入。
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// 最相似的在前；只检索跨会话层
    async fn query_similar(&self, text: &str, k: usize) -> Vec<MemoryRecord>;

    async fn write(&self, record: MemoryRecord) -> Result<MemoryAck, MemoryError>;

    /// 运行结束时丢弃该运行的 WORKING 记录，返回丢弃条数
    async fn discard_working(&self, run: RunId) -> usize;

    /// 运行中的步骤轨迹，只接受 WORKING
    async fn write_working(&self, record: MemoryRecord) -> Result<MemoryAck, MemoryError> {
        if record.tier != MemoryTier::Working {
            return Err(MemoryError::TierViolation {
                tier: record.tier,
                origin: "orchestrator",
            });
        }
        self.write(record).await
    }

    /// KnowledgeExtractor 的产出，拒绝 WORKING
    async fn write_extracted(&self, record: MemoryRecord) -> Result<MemoryAck, MemoryError> {
        if !record.tier.is_persistent() {
            return Err(MemoryError::TierViolation {
                tier: record.tier,
                origin: "knowledge extractor",
            });
        }
        self.write(record).await
    }
}

/// 将文本切分为小写词集合，用于简单相似度（词重叠数）
fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() > 1)
        .collect()
}

struct TierStore {
    entries: RwLock<Vec<(MemoryRecord, HashSet<String>)>>,
    max_entries: usize,
}

impl TierStore {
    fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            max_entries,
        }
    }

    async fn append(&self, record: MemoryRecord) -> MemoryAck {
        let ack = MemoryAck {
            id: record.id,
            tier: record.tier,
        };
        let tokens = tokenize_lower(&record.content);
        let mut entries = self.entries.write().await;
        entries.push((record, tokens));
        let n = entries.len();
        if n > self.max_entries {
            entries.drain(0..n - self.max_entries);
        }
        ack
    }

    /// (score, record)；score = 重叠词数 × (0.5 + confidence / 2)
    async fn scored(&self, query: &HashSet<String>) -> Vec<(f32, MemoryRecord)> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter_map(|(r, tokens)| {
                let overlap = query.intersection(tokens).count();
                (overlap > 0).then(|| (overlap as f32 * (0.5 + r.confidence / 2.0), r.clone()))
            })
            .collect()
    }
}

/// 排序：得分降序，其次更新的在前，最后按 id 保证稳定
fn rank(mut scored: Vec<(f32, MemoryRecord)>, k: usize) -> Vec<MemoryRecord> {
    scored.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then_with(|| b.1.created_at.cmp(&a.1.created_at))
            .then_with(|| a.1.id.cmp(&b.1.id))
    });
    scored.into_iter().take(k).map(|(_, r)| r).collect()
}

/// 三层记忆门面：显式传入需要它的角色，不做全局单例
pub struct TieredMemory {
    working: TierStore,
    episodic: TierStore,
    semantic: TierStore,
}

impl TieredMemory {
    pub fn new(max_entries_per_tier: usize) -> Self {
        Self {
            working: TierStore::new(max_entries_per_tier),
            episodic: TierStore::new(max_entries_per_tier),
            semantic: TierStore::new(max_entries_per_tier),
        }
    }

    fn tier(&self, tier: MemoryTier) -> &TierStore {
        match tier {
            MemoryTier::Working => &self.working,
            MemoryTier::Episodic => &self.episodic,
            MemoryTier::Semantic => &self.semantic,
        }
    }

    pub async fn records(&self, tier: MemoryTier) -> Vec<MemoryRecord> {
        self.tier(tier)
            .entries
            .read()
            .await
            .iter()
            .map(|(r, _)| r.clone())
            .collect()
    }

    pub async fn len(&self, tier: MemoryTier) -> usize {
        self.tier(tier).entries.read().await.len()
    }
}

impl Default for TieredMemory {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl MemoryStore for TieredMemory {
    async fn query_similar(&self, text: &str, k: usize) -> Vec<MemoryRecord> {
        let query = tokenize_lower(text);
        if query.is_empty() || k == 0 {
            return Vec::new();
        }
        let mut scored = self.episodic.scored(&query).await;
        scored.extend(self.semantic.scored(&query).await);
        rank(scored, k)
    }

    async fn write(&self, record: MemoryRecord) -> Result<MemoryAck, MemoryError> {
        Ok(self.tier(record.tier).append(record).await)
    }

    async fn discard_working(&self, run: RunId) -> usize {
        let mut entries = self.working.entries.write().await;
        let before = entries.len();
        entries.retain(|(r, _)| r.source_task_id != run);
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_query_orders_by_similarity() {
        let mem = TieredMemory::default();
        let run = RunId::new();
        mem.write(MemoryRecord::episodic("deploy the web service with docker", 0.9, run))
            .await
            .unwrap();
        mem.write(MemoryRecord::semantic("docker builds need a Dockerfile", 0.9, run))
            .await
            .unwrap();
        mem.write(MemoryRecord::episodic("bake a cake", 0.9, run))
            .await
            .unwrap();

        let hits = mem.query_similar("deploy service using docker", 5).await;
        assert_eq!(hits.len(), 2);
        assert!(hits[0].content.contains("deploy the web service"));
    }

    #[tokio::test]
    async fn test_working_is_excluded_and_discarded() {
        let mem = TieredMemory::default();
        let run = RunId::new();
        let other = RunId::new();
        mem.write_working(MemoryRecord::working("step 1 listed files", run))
            .await
            .unwrap();
        mem.write_working(MemoryRecord::working("step 1 listed files", other))
            .await
            .unwrap();

        assert!(mem.query_similar("listed files", 5).await.is_empty());
        assert_eq!(mem.len(MemoryTier::Working).await, 2);

        assert_eq!(mem.discard_working(run).await, 1);
        assert_eq!(mem.len(MemoryTier::Working).await, 1);
    }

    #[tokio::test]
    async fn test_tier_guards() {
        let mem = TieredMemory::default();
        let run = RunId::new();
        let err = mem
            .write_extracted(MemoryRecord::working("scratch", run))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::TierViolation { tier: MemoryTier::Working, .. }));
        let err = mem
            .write_working(MemoryRecord::semantic("summary", 0.5, run))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::TierViolation { tier: MemoryTier::Semantic, .. }));
    }

    #[tokio::test]
    async fn test_capacity_drops_oldest() {
        let mem = TieredMemory::new(2);
        let run = RunId::new();
        for i in 0..3 {
            mem.write(MemoryRecord::episodic(format!("entry {i}"), 0.5, run))
                .await
                .unwrap();
        }
        let kept = mem.records(MemoryTier::Episodic).await;
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].content, "entry 1");
    }

    #[tokio::test]
    async fn test_concurrent_writers_same_tier() {
        let mem = Arc::new(TieredMemory::default());
        let run = RunId::new();
        let mut handles = Vec::new();
        for i in 0..16 {
            let m = mem.clone();
            handles.push(tokio::spawn(async move {
                m.write(MemoryRecord::episodic(format!("note {i}"), 0.5, run))
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(mem.len(MemoryTier::Episodic).await, 16);
    }
}
