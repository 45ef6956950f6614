//! 记忆层：分层记忆门面（working / episodic / semantic）、上下文窗口、token 估算

pub mod context_window;
pub mod record;
pub mod store;
pub mod tokens;

pub use context_window::{build_view, ContextSnapshot, ContextWindowManager, EntryKind, HistoryEntry};
pub use record::{MemoryRecord, MemoryTier};
pub use store::{MemoryAck, MemoryError, MemoryStore, TieredMemory};
pub use tokens::TokenEstimator;
