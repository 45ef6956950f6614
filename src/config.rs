//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__RUNTIME__UNSAFE_MODE=true`）。

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub memory: MemorySection,
}

/// [app] 段：应用名与日志过滤
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 追加到 EnvFilter 的指令，如 "hive=debug"
    pub log_filter: Option<String>,
}

/// [runtime] 段：单次运行的预算、权限策略与超时
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeSection {
    /// 打开后绕过确认闸门（不可撤销的能力标签仍然被拦截）
    #[serde(default)]
    pub unsafe_mode: bool,
    /// 同一步骤校验失败达到该次数即强制重规划
    #[serde(default = "default_max_replans")]
    pub max_replans: u32,
    /// 单次运行允许的重规划轮数上限，超过则 FAILED
    #[serde(default = "default_max_replan_cycles")]
    pub max_replan_cycles: u32,
    /// 角色输入上下文的 token 预算
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    #[serde(default = "default_denied_capability_tags")]
    pub denied_capability_tags: BTreeSet<String>,
    /// 未被拒绝但需要人工确认的能力标签
    #[serde(default = "default_sensitive_capability_tags")]
    pub sensitive_capability_tags: BTreeSet<String>,
    /// 即使 unsafe_mode 也始终拦截
    #[serde(default)]
    pub irrevocable_capability_tags: BTreeSet<String>,
    /// 参数（序列化 JSON）命中任一正则时升级为 CONFIRM
    #[serde(default = "default_sensitive_arg_patterns")]
    pub sensitive_arg_patterns: Vec<String>,
    #[serde(default = "default_confirmation_timeout_seconds")]
    pub confirmation_timeout_seconds: u64,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// 规划前从记忆中检索的条数
    #[serde(default = "default_memory_query_k")]
    pub memory_query_k: usize,
}

fn default_max_replans() -> u32 {
    4
}

fn default_max_replan_cycles() -> u32 {
    3
}

fn default_token_budget() -> usize {
    4000
}

fn default_denied_capability_tags() -> BTreeSet<String> {
    ["shell-execution", "native-scripting"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_sensitive_capability_tags() -> BTreeSet<String> {
    ["filesystem-write", "network", "screen-capture"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_sensitive_arg_patterns() -> Vec<String> {
    vec![
        r"rm\s+-(rf|fr|r)\b".into(),
        r"--force\b".into(),
        r"--hard\b".into(),
        r"chmod\s+(777|\+s)".into(),
        r"mkfs".into(),
        r"dd\s+if=".into(),
    ]
}

fn default_confirmation_timeout_seconds() -> u64 {
    300
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_memory_query_k() -> usize {
    5
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            unsafe_mode: false,
            max_replans: default_max_replans(),
            max_replan_cycles: default_max_replan_cycles(),
            token_budget: default_token_budget(),
            denied_capability_tags: default_denied_capability_tags(),
            sensitive_capability_tags: default_sensitive_capability_tags(),
            irrevocable_capability_tags: BTreeSet::new(),
            sensitive_arg_patterns: default_sensitive_arg_patterns(),
            confirmation_timeout_seconds: default_confirmation_timeout_seconds(),
            tool_timeout_secs: default_tool_timeout_secs(),
            memory_query_k: default_memory_query_k(),
        }
    }
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// openai / mock；无 OPENAI_API_KEY 时总是回退到 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
        }
    }
}

/// [memory] 段：每个记忆层的容量
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_max_entries_per_tier")]
    pub max_entries_per_tier: usize,
}

fn default_max_entries_per_tier() -> usize {
    1000
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            max_entries_per_tier: default_max_entries_per_tier(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("runtime.denied_capability_tags")
            .with_list_parse_key("runtime.sensitive_capability_tags")
            .with_list_parse_key("runtime.irrevocable_capability_tags")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
