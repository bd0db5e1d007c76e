//! 工具执行器
//!
//! 对每个能力调用施加统一超时，超时或失败时转为 AgentError（ToolTimeout / ToolExecutionFailed）；
//! 每次调用输出一行结构化审计日志（JSON）。

use std::future::Future;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::AgentError;

/// 工具执行器：超时 + 审计
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 在超时内等待 fut；工具返回 Err 转为 ToolExecutionFailed，超时转为 ToolTimeout
    pub async fn execute<T, F>(&self, tool_name: &str, args: &Value, fut: F) -> Result<T, AgentError>
    where
        F: Future<Output = Result<T, String>>,
    {
        let start = Instant::now();
        let result = timeout(self.timeout, fut).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(args),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(e)),
            Err(_) => Err(AgentError::ToolTimeout(format!(
                "{} timed out after {}s",
                tool_name,
                self.timeout.as_secs()
            ))),
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
