//! Tripmate - 旅游规划助手 REPL
//!
//! 入口：初始化日志与运行时，逐行读取使用者输入并跑一轮对话；输入 exit 离开，Ctrl+C 取消进行中的轮次。
//! 可选参数：配置文件路径（覆盖 config/default.toml）。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tripmate::config::{load_config, AppConfig};
use tripmate::react::ReactEvent;
use tripmate::{observability, AgentError, Orchestrator, RuntimeBuilder};

fn display_welcome() {
    println!("{}", "=".repeat(40));
    println!("歡迎使用旅遊規劃助理！請輸入您的旅遊需求，或輸入 exit 離開程式。");
    println!("提示：您可以輸入像是「推薦台北景點」、「幫我排台中兩天一夜行程」等需求。");
    println!("{}", "=".repeat(40));
}

fn print_event(event: &ReactEvent) {
    match event {
        ReactEvent::StageEntered { stage } => eprintln!("  [{stage}]"),
        ReactEvent::ToolCall { tool, args } => eprintln!("  → {tool} {args}"),
        ReactEvent::ToolFailure { tool, reason } => eprintln!("  ✗ {tool}: {reason}"),
        ReactEvent::Recovery { action, .. } => eprintln!("  ↻ {action}"),
        ReactEvent::DuplicateReply { similarity } => {
            eprintln!("  回覆與上一輪重複（相似度 {similarity:.2}），已改寫")
        }
        _ => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let orchestrator = Orchestrator::new(Arc::new(RuntimeBuilder::new(config).build()));

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ReactEvent>();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
        }
    });

    display_welcome();
    let thread_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(%thread_id, "session started");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("使用者：");
        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") {
            break;
        }

        let cancel = CancellationToken::new();
        let turn = orchestrator.run_turn_with_cancel(&thread_id, input, &cancel, Some(&event_tx));
        tokio::pin!(turn);
        let result = loop {
            tokio::select! {
                r = &mut turn => break r,
                _ = tokio::signal::ctrl_c() => cancel.cancel(),
            }
        };

        match result {
            Ok(view) => {
                println!("助理：{}", view.reply);
                println!("（目前階段：{}）", view.current_stage);
            }
            Err(AgentError::Cancelled) => println!("已取消本輪。"),
            Err(e @ AgentError::TurnFailed { .. }) => {
                println!("多次嘗試後仍無法處理您的需求，請稍後再試。（{e}）")
            }
            Err(e) => println!("抱歉，處理您的請求時發生錯誤：{e}"),
        }
    }

    println!("感謝使用旅遊規劃助理！祝您旅途愉快！");
    Ok(())
}
