//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Scripted）

pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use message::{Message, Role};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError, TokenStream};

use crate::config::LlmSection;

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    let provider = cfg.provider.to_lowercase();
    let api_key = std::env::var("OPENAI_API_KEY").ok();
    match (provider.as_str(), api_key) {
        ("mock", _) => {
            tracing::info!("Using Mock LLM (configured)");
            Arc::new(MockLlmClient::default())
        }
        (_, Some(key)) => {
            tracing::info!(model = %cfg.model, "Using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(
                cfg.base_url.as_deref(),
                &cfg.model,
                Some(&key),
            ))
        }
        (_, None) => {
            tracing::warn!("No API key set, using Mock LLM");
            Arc::new(MockLlmClient::default())
        }
    }
}
