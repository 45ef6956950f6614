//! Hive - Rust 多角色任务运行时
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 运行状态、纯函数状态机、升级策略、编排器、运行注册表与 Resume API
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Scripted）
//! - **memory**: 上下文窗口与分层记忆（Working / Episodic / Semantic）
//! - **observability**: tracing 订阅器初始化
//! - **permission**: 权限闸门（能力标签策略、一次性确认令牌）
//! - **roles**: Architect / Executor / Verifier / KnowledgeExtractor
//! - **stream**: 流式事件通道与槽位渲染
//! - **tools**: Tool trait、注册表与带超时审计的执行器

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod permission;
pub mod roles;
pub mod stream;
pub mod tools;

pub use crate::core::{ResumeDecision, Runtime, RuntimeBuilder, RuntimeError, TaskStatus};
