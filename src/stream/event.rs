//! 流式事件：角色输出的增量片段

use serde::{Deserialize, Serialize};

/// 单个增量片段；sequence_index 在同一运行内按 agent_name 严格递增
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub agent_name: String,
    pub sequence_index: u64,
    pub delta_text: String,
    /// 本轮输出结束
    pub is_final: bool,
}
