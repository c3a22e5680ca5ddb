//! Scholar - 研究报告助理
//!
//! 入口：初始化日志、加载配置并做启动校验，然后在 stdin 上循环读取问题，逐个跑 turn 并打印报告。
//! 用法：scholar [config.toml]；输入 /clear 清空对话记录，exit 或 quit 退出。

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use scholar::agent::{create_agent_components, process_question};
use scholar::config::load_config;
use scholar::decision::TurnEvent;
use scholar::memory::ConversationLog;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// 进度事件打印到 stderr，stdout 只输出报告
async fn print_events(mut rx: mpsc::UnboundedReceiver<TurnEvent>) {
    while let Some(ev) = rx.recv().await {
        match ev {
            TurnEvent::Decision { step, tool, arguments } => {
                eprintln!("[{}] oracle -> {} {}", step, tool, arguments);
            }
            TurnEvent::GuardTriggered { step, proposed, reason } => match proposed {
                Some(p) => eprintln!("[{}] {} rerouted to final_answer ({})", step, p, reason),
                None => eprintln!("[{}] forcing final_answer ({})", step, reason),
            },
            TurnEvent::ToolStarted { step, tool } => eprintln!("[{}] running {} ...", step, tool),
            TurnEvent::ToolFinished {
                step,
                tool,
                success,
                result_count,
                error,
            } => {
                if success {
                    eprintln!("[{}] {} ok, {} results", step, tool, result_count);
                } else {
                    eprintln!("[{}] {} failed: {}", step, tool, error.unwrap_or_default());
                }
            }
            TurnEvent::TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens,
                cumulative_total,
            } => {
                eprintln!(
                    "tokens: {} prompt + {} completion = {} (session {})",
                    prompt_tokens, completion_tokens, total_tokens, cumulative_total
                );
            }
            TurnEvent::Finished { steps, forced } => {
                eprintln!("done in {} steps{}", steps, if forced { " (forced)" } else { "" });
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scholar::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let components = create_agent_components(&cfg)
        .await
        .context("Startup validation failed")?;

    let mut conversation = ConversationLog::new(cfg.app.max_context_turns);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("research> ");
        std::io::stdout().flush().context("Failed to flush stdout")?;
        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let question = line.trim();
        match question {
            "" => continue,
            "exit" | "quit" => break,
            "/clear" => {
                conversation.clear();
                eprintln!("conversation cleared");
                continue;
            }
            _ => {}
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(print_events(rx));
        let result = process_question(&components, question, &conversation, Some(&tx)).await;
        drop(tx);
        let _ = printer.await;

        match result {
            Ok(outcome) => {
                let text = outcome.report.to_string();
                println!("\n{}\n", text);
                conversation.record(question, text);
            }
            Err(e) => {
                tracing::error!(error = %e, "turn failed");
                eprintln!("Turn failed: {}", e);
            }
        }
    }

    Ok(())
}
