//! Mock LLM 客户端（用于测试与无 API Key 时的本地运行）
//!
//! 按顺序返回预置回复；用完后回复 do_nothing 命令，保证控制循环始终拿到合法的命令 JSON。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{LlmClient, TokenStream};
use crate::memory::{Message, Role};

/// 预置回复耗尽后的默认回复
pub const IDLE_REPLY: &str = r#"{"thoughts": {"text": "nothing scripted"}, "command": {"name": "do_nothing", "args": {}}}"#;

/// Mock 客户端：依次弹出预置回复，并记录每次收到的消息供测试断言
#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以一组成功回复构造
    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::default();
        for r in replies {
            client.push_reply(r);
        }
        client
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Ok(reply.into()));
        }
    }

    /// 追加一次失败（模拟后端错误）
    pub fn push_failure(&self, error: impl Into<String>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Err(error.into()));
        }
    }

    /// 已收到的请求次数
    pub fn call_count(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// 第 n 次请求的消息列表
    pub fn request(&self, n: usize) -> Option<Vec<Message>> {
        self.seen.lock().ok().and_then(|s| s.get(n).cloned())
    }

    fn next_reply(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        let scripted = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        match scripted {
            Some(r) => r,
            None => {
                let asked = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                tracing::debug!(asked = %asked, "mock llm idle reply");
                Ok(IDLE_REPLY.to_string())
            }
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.next_reply(messages)
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, String> {
        let content = self.next_reply(messages)?;
        // 按行切分，模拟逐段到达
        let chunks: Vec<Result<String, String>> =
            content.lines().map(|l| Ok(l.to_string())).collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}
