//! SlotBoard：参考 StreamSink 实现
//!
//! 每个 agent 首次出现时占一个槽位，之后原地更新；乱序或重复的事件直接丢弃。

use std::collections::HashMap;
use std::sync::Mutex;

use crate::stream::{StreamEvent, StreamSink};

#[derive(Debug, Default, Clone)]
struct Slot {
    text: String,
    last_seq: Option<u64>,
    done: bool,
}

#[derive(Debug, Default)]
struct Board {
    order: Vec<String>,
    slots: HashMap<String, Slot>,
    dropped: usize,
}

#[derive(Debug, Default)]
pub struct SlotBoard {
    board: Mutex<Board>,
}

impl SlotBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按首次出现顺序的 agent 列表
    pub fn agents(&self) -> Vec<String> {
        self.board.lock().map(|b| b.order.clone()).unwrap_or_default()
    }

    pub fn slot_text(&self, agent: &str) -> Option<String> {
        let board = self.board.lock().ok()?;
        board.slots.get(agent).map(|s| s.text.clone())
    }

    pub fn dropped(&self) -> usize {
        self.board.lock().map(|b| b.dropped).unwrap_or(0)
    }

    pub fn render(&self) -> String {
        let Ok(board) = self.board.lock() else {
            return String::new();
        };
        board
            .order
            .iter()
            .filter_map(|agent| {
                board
                    .slots
                    .get(agent)
                    .map(|s| format!("[{}] {}", agent, s.text.trim()))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl StreamSink for SlotBoard {
    fn on_event(&self, event: &StreamEvent) {
        let Ok(mut guard) = self.board.lock() else {
            return;
        };
        let board = &mut *guard;
        if !board.slots.contains_key(&event.agent_name) {
            board.order.push(event.agent_name.clone());
        }
        let slot = board.slots.entry(event.agent_name.clone()).or_default();
        if slot.last_seq.is_some_and(|last| event.sequence_index <= last) {
            board.dropped += 1;
            return;
        }
        slot.last_seq = Some(event.sequence_index);
        // 上一轮已结束，新一轮覆盖同一槽位
        if slot.done {
            slot.text.clear();
            slot.done = false;
        }
        slot.text.push_str(&event.delta_text);
        slot.done = event.is_final;
    }
}
