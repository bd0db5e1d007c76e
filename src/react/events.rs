//! 控制循环过程事件：供终端或前端展示思考、待执行命令、授权、输出与结束

use serde::Serialize;

use crate::core::Termination;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// 新一轮开始
    TurnStarted { turn: usize },
    /// 正在调用模型
    Thinking,
    /// 模型回复中的 thoughts 段
    Thoughts { thoughts: serde_json::Value },
    /// 解析出的待执行命令
    NextAction {
        name: String,
        args: serde_json::Value,
    },
    /// 命令已授权（人工或自动）；remaining 为剩余自动授权次数
    Authorised { auto: bool, remaining: u32 },
    /// 同一命令重复执行
    Repetition { name: String, count: usize },
    /// 主动召回的记忆条数
    Recall { entries: usize },
    /// 流式输出的一块
    OutputChunk { text: String },
    /// 写入历史的命令结果
    SystemResult { text: String },
    /// 对话覆盖轮的完整回答
    Answer { text: String },
    /// 会话结束
    Terminated { termination: Termination },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminated_event_serializes() {
        let ev = LoopEvent::Terminated {
            termination: Termination::TaskComplete {
                reason: "done".into(),
            },
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "terminated");
        assert_eq!(v["termination"]["kind"], "task_complete");
        assert_eq!(v["termination"]["reason"], "done");
    }
}
