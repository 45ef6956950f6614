//! 事件通道：生产者按序发出，单个后台任务依次交给 StreamSink
//!
//! 每次运行打开一个 StreamChannel；sink 只在 drain 任务中被调用，因此同一运行内不会并发调用。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::llm::{LlmError, TokenStream};
use crate::stream::StreamEvent;

/// UI 协作方的接口
pub trait StreamSink: Send + Sync {
    fn on_event(&self, event: &StreamEvent);
}

/// 丢弃所有事件
#[derive(Debug, Default)]
pub struct NullSink;

impl StreamSink for NullSink {
    fn on_event(&self, _event: &StreamEvent) {}
}

/// 记录所有事件（测试与调试用）
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StreamEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// 某个 agent 的全部文本（按到达顺序拼接）
    pub fn text_of(&self, agent: &str) -> String {
        self.events()
            .iter()
            .filter(|e| e.agent_name == agent)
            .map(|e| e.delta_text.as_str())
            .collect()
    }
}

impl StreamSink for RecordingSink {
    fn on_event(&self, event: &StreamEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

struct Producer {
    tx: mpsc::UnboundedSender<StreamEvent>,
    /// agent -> 下一个 sequence_index
    counters: Mutex<HashMap<String, u64>>,
}

impl Producer {
    fn emit(&self, agent: &str, delta: String, is_final: bool) {
        // 计数与发送在同一把锁内完成，保证到达顺序与序号一致
        let Ok(mut counters) = self.counters.lock() else {
            return;
        };
        let seq = counters.entry(agent.to_string()).or_insert(0);
        let event = StreamEvent {
            agent_name: agent.to_string(),
            sequence_index: *seq,
            delta_text: delta,
            is_final,
        };
        *seq += 1;
        if self.tx.send(event).is_err() {
            tracing::debug!(agent, "stream drain closed, event dropped");
        }
    }
}

/// 单次运行的事件通道
pub struct StreamChannel {
    producer: Arc<Producer>,
    drain: JoinHandle<()>,
}

impl StreamChannel {
    /// 打开通道并启动 drain 任务（需在 tokio 运行时内调用）
    pub fn open(sink: Arc<dyn StreamSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<StreamEvent>();
        let drain = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                sink.on_event(&event);
            }
        });
        Self {
            producer: Arc::new(Producer {
                tx,
                counters: Mutex::new(HashMap::new()),
            }),
            drain,
        }
    }

    pub fn agent(&self, name: &str) -> AgentStream {
        AgentStream {
            agent: name.to_string(),
            producer: self.producer.clone(),
        }
    }

    /// 关闭发送端并等待所有事件交付；调用前应释放所有 AgentStream
    pub async fn close(self) {
        let Self { producer, drain } = self;
        drop(producer);
        if let Err(e) = drain.await {
            tracing::warn!("stream drain task ended abnormally: {}", e);
        }
    }
}

/// 某个角色的发送端
#[derive(Clone)]
pub struct AgentStream {
    agent: String,
    producer: Arc<Producer>,
}

impl AgentStream {
    pub fn agent_name(&self) -> &str {
        &self.agent
    }

    pub fn delta(&self, text: impl Into<String>) {
        self.producer.emit(&self.agent, text.into(), false);
    }

    /// 发出本轮最后一个片段
    pub fn finish(&self, text: impl Into<String>) {
        self.producer.emit(&self.agent, text.into(), true);
    }

    /// 逐块转发 LLM token 流，返回完整文本
    pub async fn pipe(&self, mut tokens: TokenStream) -> Result<String, LlmError> {
        let mut full = String::new();
        while let Some(chunk) = tokens.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            full.push_str(&chunk);
            self.delta(chunk);
        }
        self.finish("");
        Ok(full)
    }
}
