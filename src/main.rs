//! Drone - Rust 自主智能体
//!
//! 入口：初始化日志、加载配置、装配控制循环，并在终端打印过程事件。
//! 用法：`drone [config.toml]`

use std::path::PathBuf;

use anyhow::Context;
use drone::config::{load_config, AppConfig};
use drone::core::Termination;
use drone::react::{LoopEvent, StdinInput};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}, using defaults", e);
        AppConfig::default()
    });

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut control = drone::build_control_loop(&cfg, Box::new(StdinInput::new()))
        .context("Failed to assemble agent")?
        .with_event_tx(event_tx);

    let printer = tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            print_event(&ev);
        }
    });

    let termination = control.run().await;
    drop(control);
    let _ = printer.await;

    match termination {
        Termination::TaskComplete { reason } => println!("Task complete: {}", reason),
        Termination::HumanExit => println!("Exiting..."),
        Termination::TurnLimit { limit } => println!("Continuous limit of {} turns reached.", limit),
    }
    Ok(())
}

fn print_event(ev: &LoopEvent) {
    match ev {
        LoopEvent::Thinking => println!("Thinking..."),
        LoopEvent::Thoughts { thoughts } => {
            for key in ["text", "reasoning", "plan", "criticism", "speak"] {
                if let Some(v) = thoughts.get(key).and_then(|v| v.as_str()) {
                    println!("{}: {}", key.to_uppercase(), v);
                }
            }
        }
        LoopEvent::NextAction { name, args } => {
            println!("NEXT ACTION:  COMMAND = {}  ARGUMENTS = {}", name, args)
        }
        LoopEvent::Authorised { auto: true, remaining } => {
            println!("-=-=-=-=-=-=-= COMMAND AUTHORISED ({} left) -=-=-=-=-=-=-=", remaining)
        }
        LoopEvent::Authorised { auto: false, .. } => {
            println!("-=-=-=-=-=-=-= COMMAND AUTHORISED BY USER -=-=-=-=-=-=-=")
        }
        LoopEvent::Repetition { name, count } => {
            println!("Command '{}' repeated {} times, nudging the agent.", name, count)
        }
        LoopEvent::OutputChunk { text } => println!("{}", text),
        LoopEvent::SystemResult { text } => println!("SYSTEM: {}", text),
        LoopEvent::Answer { .. } => {}
        LoopEvent::TurnStarted { .. } | LoopEvent::Recall { .. } | LoopEvent::Terminated { .. } => {}
    }
}
