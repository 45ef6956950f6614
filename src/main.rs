//! hive 命令行入口
//!
//! 用法：`hive [--config <file>] <task...>`。加载配置、初始化日志、运行任务；
//! 运行暂停时在终端询问确认或拒绝，Ctrl-C 取消运行；结束后打印各角色的输出槽位与最终结果。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use hive::config::{load_config, AppConfig};
use hive::core::{ResumeToken, RunSnapshot};
use hive::stream::SlotBoard;
use hive::{observability, ResumeDecision, RuntimeBuilder, TaskStatus};
use tokio::io::{AsyncBufReadExt, BufReader};

fn parse_args() -> (Option<PathBuf>, String) {
    let mut config = None;
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config = args.next().map(PathBuf::from);
        } else {
            words.push(arg);
        }
    }
    (config, words.join(" "))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config_path, mut task) = parse_args();
    let loaded = load_config(config_path);
    let cfg = match &loaded {
        Ok(cfg) => cfg.clone(),
        Err(_) => AppConfig::default(),
    };
    observability::init(cfg.app.log_filter.as_deref());
    if let Err(e) = loaded {
        tracing::warn!("Config load failed ({}), using defaults", e);
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    if task.trim().is_empty() {
        println!("Task:");
        task = stdin
            .next_line()
            .await
            .context("Failed to read task from stdin")?
            .unwrap_or_default();
    }
    if task.trim().is_empty() {
        anyhow::bail!("no task given");
    }

    let runtime = RuntimeBuilder::new(cfg)
        .build()
        .context("Failed to build runtime")?;
    let board = Arc::new(SlotBoard::new());
    let handle = runtime.start(task, board.clone());
    let run_id = handle.run_id;
    let mut snapshots = handle.snapshots();
    let mut answered: Option<ResumeToken> = None;

    loop {
        let snap: RunSnapshot = snapshots.borrow_and_update().clone();
        if snap.status.is_terminal() {
            break;
        }
        if let Some(pause) = snap.pause.filter(|p| answered != Some(p.resume_token)) {
            println!("{}", board.render());
            println!("\n[paused] {}", pause.reason);
            let decision = if pause.confirmable {
                println!("Allow '{}' once? [y/N]", pause.tool_name);
                let line = stdin.next_line().await.context("Failed to read answer")?;
                match line.as_deref().map(str::trim) {
                    Some("y") | Some("Y") | Some("yes") => ResumeDecision::Confirm,
                    _ => ResumeDecision::Deny,
                }
            } else {
                println!("This capability cannot be confirmed; denying.");
                ResumeDecision::Deny
            };
            answered = Some(pause.resume_token);
            if let Err(e) = runtime.resume(run_id, pause.resume_token, decision) {
                tracing::warn!("resume rejected: {}", e);
            }
        }
        let open = tokio::select! {
            r = snapshots.changed() => r.is_ok(),
            _ = tokio::signal::ctrl_c() => {
                println!("\ninterrupted, cancelling run");
                runtime.shutdown();
                true
            }
        };
        if !open {
            break;
        }
    }

    let state = handle.join().await.context("Run did not complete")?;
    println!("{}", board.render());
    match state.status {
        TaskStatus::Done => {
            println!("\n{}", state.final_response.unwrap_or_default());
            Ok(())
        }
        _ => anyhow::bail!(
            "run failed: {}",
            state.failure_reason.unwrap_or_else(|| "unknown".to_string())
        ),
    }
}
