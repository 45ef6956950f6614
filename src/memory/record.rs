//! 记忆记录与分层
//!
//! Working 仅在单次运行内有效，运行结束即丢弃；Episodic 跨会话保存具体经历；
//! Semantic 为 KnowledgeExtractor 整理出的跨会话总结。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::RunId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryTier {
    Working,
    Episodic,
    Semantic,
}

impl MemoryTier {
    /// 是否跨会话保留
    pub fn is_persistent(&self) -> bool {
        !matches!(self, MemoryTier::Working)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub tier: MemoryTier,
    pub content: String,
    /// 0.0 ~ 1.0
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub source_task_id: RunId,
}

impl MemoryRecord {
    pub fn new(
        tier: MemoryTier,
        content: impl Into<String>,
        confidence: f32,
        source_task_id: RunId,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tier,
            content: content.into(),
            confidence: confidence.clamp(0.0, 1.0),
            created_at: Utc::now(),
            source_task_id,
        }
    }

    pub fn working(content: impl Into<String>, source_task_id: RunId) -> Self {
        Self::new(MemoryTier::Working, content, 1.0, source_task_id)
    }

    pub fn episodic(content: impl Into<String>, confidence: f32, source_task_id: RunId) -> Self {
        Self::new(MemoryTier::Episodic, content, confidence, source_task_id)
    }

    pub fn semantic(content: impl Into<String>, confidence: f32, source_task_id: RunId) -> Self {
        Self::new(MemoryTier::Semantic, content, confidence, source_task_id)
    }
}
