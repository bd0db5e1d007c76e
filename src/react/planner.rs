//! Planner：拼装单轮模型请求并解析命令 JSON
//!
//! 请求 = 基础 prompt + 当前时间 + 相关记忆（「This reminds you of these events from your past」）
//! + 按 token 预算裁剪后的历史 + 人类输入。
//! parse_command 取回复中最外层的 `{...}` 并把参数校验为 Action；任何缺陷（含参数缺失或类型不符）
//! 都得到名为 "Error:" 的合成命令。

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::{fit_history, MemoryStore, Message, TokenEstimator};
use crate::tools::Action;

/// 解析失败时的合成命令名
pub const PARSE_ERROR_NAME: &str = "Error:";

/// 参与相关记忆检索的最近历史条数
const RECALL_HISTORY_MESSAGES: usize = 9;
/// 相关记忆条数
const RECALL_K: usize = 10;
/// 为模型回复预留的 token
const REPLY_RESERVE_TOKENS: usize = 1000;

/// 解析后的命令；参数已校验为 Action，`action` 为 None 即合成的错误命令
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    pub name: String,
    pub args: Value,
    pub thoughts: Option<Value>,
    pub action: Option<Action>,
}

impl ParsedCommand {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            name: PARSE_ERROR_NAME.to_string(),
            args: Value::String(message.into()),
            thoughts: None,
            action: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.action.is_none()
    }

    /// 合成错误命令的错误信息
    pub fn error_message(&self) -> String {
        match &self.args {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// 命令名以 "error" 开头（不区分大小写）时视为模型自报的错误，不分发
fn names_error(name: &str) -> bool {
    name.to_lowercase().starts_with("error")
}

/// 回复中最外层花括号之间的文本
fn outermost_braces(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&reply[start..=end])
}

/// 解析 `{"command": {"name": ..., "args": {...}}, "thoughts": {...}}`
pub fn parse_command(reply: &str) -> ParsedCommand {
    let Some(json_str) = outermost_braces(reply) else {
        return ParsedCommand::error("Invalid JSON");
    };
    let value: Value = match serde_json::from_str(json_str) {
        Ok(v) => v,
        Err(e) => return ParsedCommand::error(format!("Invalid JSON: {}", e)),
    };
    let Some(obj) = value.as_object() else {
        return ParsedCommand::error(format!("'response_json' object is not dictionary {}", value));
    };
    let Some(command) = obj.get("command").and_then(Value::as_object) else {
        return ParsedCommand::error("'command' object missing or invalid");
    };
    let name = match command.get("name").and_then(Value::as_str) {
        Some(n) if !n.trim().is_empty() => n.trim().to_string(),
        _ => return ParsedCommand::error("Missing 'name' in 'command' object"),
    };
    let args = command
        .get("args")
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));
    let thoughts = obj.get("thoughts").cloned();
    if names_error(&name) {
        return ParsedCommand {
            name,
            args,
            thoughts,
            action: None,
        };
    }
    match Action::from_command(&name, &args) {
        Action::Error { message } => ParsedCommand {
            thoughts,
            ..ParsedCommand::error(message)
        },
        action => ParsedCommand {
            name,
            args,
            thoughts,
            action: Some(action),
        },
    }
}

/// Planner：持有 LLM 与 token 预算
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    token_limit: usize,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, token_limit: usize) -> Self {
        Self { llm, token_limit }
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 组装本轮请求消息
    pub fn build_messages(
        &self,
        prompt: &str,
        human_input: &str,
        history: &[Message],
        memory: &MemoryStore,
    ) -> Vec<Message> {
        let recent = &history[history.len().saturating_sub(RECALL_HISTORY_MESSAGES)..];
        let query = recent
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let relevant = if query.trim().is_empty() {
            Vec::new()
        } else {
            match memory.get_relevant(&query, RECALL_K) {
                Ok(entries) => entries.into_iter().map(|e| e.content.clone()).collect(),
                Err(e) => {
                    tracing::warn!("relevant memory lookup failed: {}", e);
                    Vec::new()
                }
            }
        };

        let mut head = vec![
            Message::system(prompt.to_string()),
            Message::system(format!(
                "The current time and date is {}",
                Utc::now().format("%a %b %d %H:%M:%S %Y")
            )),
        ];
        if !relevant.is_empty() {
            head.push(Message::system(format!(
                "This reminds you of these events from your past:\n{}\n\n",
                relevant.join("\n")
            )));
        }
        let user = Message::user(human_input.to_string());

        let reserved = TokenEstimator::estimate_messages(&head) + TokenEstimator::estimate(&user.content);
        let budget = self.token_limit.saturating_sub(REPLY_RESERVE_TOKENS);
        let fitted = fit_history(history, reserved, budget);
        tracing::debug!(
            history = history.len(),
            kept = fitted.len(),
            recalled = relevant.len(),
            "planner context assembled"
        );

        head.extend(fitted);
        head.push(user);
        head
    }

    /// 调用模型得到下一条命令的回复文本
    pub async fn next_reply(
        &self,
        prompt: &str,
        human_input: &str,
        history: &[Message],
        memory: &MemoryStore,
    ) -> Result<String, AgentError> {
        let messages = self.build_messages(prompt, human_input, history, memory);
        self.llm.complete(&messages).await.map_err(AgentError::LlmError)
    }
}
