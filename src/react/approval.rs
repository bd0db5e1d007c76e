//! 人工授权：输入源抽象与授权语法
//!
//! 语法：`y` 授权一次；`y -N` 授权并在之后自动执行 N 条命令（N ≥ 1）；`n` 退出；其它文字视为向智能体提问。
//! 输入流结束视为退出。

use std::collections::VecDeque;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

/// 授权提示
pub const APPROVAL_PROMPT: &str = "Enter 'y' to authorise command, 'y -N' to run N continuous commands, 'n' to exit program, or type a question for the agent...";

/// 解析后的授权决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    ApproveOnce,
    /// 本次授权并设置自动授权预算
    ApproveN(u32),
    Exit,
    /// 自由文本：转入对话覆盖
    Feedback(String),
}

/// `y -N` 中 N 不合法
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid input format. Please enter 'y -N' with N a positive number.")]
pub struct InvalidApproval;

/// 解析一行输入
pub fn parse_approval(line: &str) -> Result<ApprovalDecision, InvalidApproval> {
    let trimmed = line.trim();
    let lower = trimmed.to_lowercase();
    if lower == "y" {
        return Ok(ApprovalDecision::ApproveOnce);
    }
    if let Some(rest) = lower.strip_prefix("y -") {
        return match rest.trim().parse::<u32>() {
            Ok(n) if n >= 1 => Ok(ApprovalDecision::ApproveN(n)),
            _ => Err(InvalidApproval),
        };
    }
    if lower == "n" {
        return Ok(ApprovalDecision::Exit);
    }
    Ok(ApprovalDecision::Feedback(trimmed.to_string()))
}

/// 人类输入源：返回 None 表示输入结束
#[async_trait]
pub trait HumanInput: Send {
    async fn read_line(&mut self, prompt: &str) -> Option<String>;
}

/// 终端标准输入
pub struct StdinInput {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinInput {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HumanInput for StdinInput {
    async fn read_line(&mut self, prompt: &str) -> Option<String> {
        let mut out = tokio::io::stdout();
        let _ = out.write_all(format!("{}\nInput: ", prompt).as_bytes()).await;
        let _ = out.flush().await;
        match self.lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("stdin read failed: {}", e);
                None
            }
        }
    }
}

/// 预置输入（测试与脚本化运行）
#[derive(Debug, Default)]
pub struct ScriptedInput {
    lines: VecDeque<String>,
    prompts_seen: usize,
}

impl ScriptedInput {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            prompts_seen: 0,
        }
    }

    /// 被询问的次数（包括输入耗尽后的那次）
    pub fn prompts_seen(&self) -> usize {
        self.prompts_seen
    }
}

#[async_trait]
impl HumanInput for ScriptedInput {
    async fn read_line(&mut self, _prompt: &str) -> Option<String> {
        self.prompts_seen += 1;
        self.lines.pop_front()
    }
}
