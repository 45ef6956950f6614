//! 工具层：Tool trait、注册表、带超时与审计的执行器

pub mod echo;
pub mod executor;
pub mod registry;
pub mod schema;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use registry::{capability, Tool, ToolCall, ToolExecutionError, ToolRegistry};
pub use schema::{plan_schema_json, tool_call_schema_json};
