//! 流式输出：StreamEvent、按运行隔离的事件通道、参考 UI 槽位渲染

pub mod channel;
pub mod event;
pub mod slots;

pub use channel::{AgentStream, NullSink, RecordingSink, StreamChannel, StreamSink};
pub use event::StreamEvent;
pub use slots::SlotBoard;
