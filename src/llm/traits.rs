//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：complete（非流式）、complete_stream（流式 Token）。

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};

use crate::memory::Message;

/// 流式完成返回的输出流：每个元素是一块输出（按行）
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, String>> + Send>>;

/// LLM 客户端 trait：非流式完成与流式完成（返回 Token 流）
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 流式完成，返回 Token 流
    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 将增量 token 流按行重组：每个元素是一整行（不含换行符），末尾不完整的行在流结束时输出
pub fn into_lines(tokens: TokenStream) -> TokenStream {
    let state = (tokens, String::new(), VecDeque::<Result<String, String>>::new(), false);
    Box::pin(stream::unfold(
        state,
        |(mut tokens, mut buf, mut ready, mut done)| async move {
            loop {
                if let Some(item) = ready.pop_front() {
                    return Some((item, (tokens, buf, ready, done)));
                }
                if done {
                    return None;
                }
                match tokens.next().await {
                    Some(Ok(piece)) => {
                        buf.push_str(&piece);
                        while let Some(pos) = buf.find('\n') {
                            let line: String = buf.drain(..=pos).collect();
                            ready.push_back(Ok(line.trim_end_matches(&['\n', '\r'][..]).to_string()));
                        }
                    }
                    Some(Err(e)) => {
                        if !buf.is_empty() {
                            ready.push_back(Ok(std::mem::take(&mut buf)));
                        }
                        ready.push_back(Err(e));
                        done = true;
                    }
                    None => {
                        if !buf.is_empty() {
                            ready.push_back(Ok(std::mem::take(&mut buf)));
                        }
                        done = true;
                    }
                }
            }
        },
    ))
}
