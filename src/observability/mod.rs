//! 可观测性：tracing 订阅器初始化（仅由二进制入口调用一次）

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 默认 info，可通过 RUST_LOG 覆盖；extra 为 [app].log_filter 中的附加指令
pub fn init(extra: Option<&str>) {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Some(directives) = extra {
        for d in directives.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            match d.parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(e) => eprintln!("ignoring invalid log directive '{}': {}", d, e),
            }
        }
    }
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}
