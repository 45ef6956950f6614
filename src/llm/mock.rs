//! Mock / Scripted LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! ScriptedLlmClient 按顺序返回预置回复；队列为空时按 system prompt 的角色标记给出一个能跑通流程的默认回复。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{LlmClient, LlmError, Message, Role, TokenStream};

/// 流式回复时每段字符数（模拟打字效果）
const CHUNK_CHARS: usize = 6;

/// 预置回复队列；用尽后回落到 MockLlmClient 的默认行为
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 追加一条预置回复
    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(reply.into());
        }
    }

    /// 已收到的请求（测试中检查 prompt 内容）
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn next_reply(&self, messages: &[Message]) -> String {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        let scripted = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        scripted.unwrap_or_else(|| default_reply(messages))
    }
}

/// 无脚本时的默认回复：依据 system prompt 首行的 "Role: X" 标记
fn default_reply(messages: &[Message]) -> String {
    let system = messages
        .iter()
        .find(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .unwrap_or("");
    let last_user = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("(no input)");

    if system.starts_with("Role: Architect") {
        r#"["Echo the task back to the user"]"#.to_string()
    } else if system.starts_with("Role: Executor") {
        serde_json::json!({
            "tool": "echo",
            "args": { "text": format!("Echo from Mock: {}", first_line(last_user)) }
        })
        .to_string()
    } else if system.starts_with("Role: Verifier") {
        "COMPLETE".to_string()
    } else if system.starts_with("Role: KnowledgeExtractor") {
        format!("Summary: {}", first_line(last_user))
    } else {
        format!("Echo from Mock: {}", last_user)
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("").trim()
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        Ok(self.next_reply(messages))
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let content = self.next_reply(messages);
        let chars: Vec<char> = content.chars().collect();
        let chunks: Vec<Result<String, LlmError>> = chars
            .chunks(CHUNK_CHARS)
            .map(|c| Ok(c.iter().collect()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// 无脚本的 Mock 客户端
pub type MockLlmClient = ScriptedLlmClient;
