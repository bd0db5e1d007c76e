//! 控制循环状态：阶段与快照
//!
//! 阶段流转：AwaitingModelTurn → ParsingAction → AwaitingApproval | AutoApproved → Dispatching → Recording → 下一轮或 Terminated。

use serde::Serialize;

/// 控制循环当前阶段（事件与日志投影用）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    AwaitingModelTurn,
    ParsingAction,
    AwaitingApproval,
    AutoApproved,
    Dispatching,
    Recording,
    Terminated,
}

/// 会话结束原因
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// 模型发出 task_complete
    TaskComplete { reason: String },
    /// 人类输入 n 或输入流结束
    HumanExit,
    /// 连续模式下超过最大轮数
    TurnLimit { limit: usize },
}

/// 控制循环状态快照（供 UI / 测试读取）
#[derive(Clone, Debug, Serialize)]
pub struct LoopSnapshot {
    pub phase: LoopPhase,
    pub turn_count: usize,
    pub pending_action_budget: u32,
    pub conversational_override_active: bool,
    pub history_len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_termination_serializes_with_kind_tag() {
        let done = serde_json::to_value(Termination::TaskComplete {
            reason: "essay written".into(),
        })
        .unwrap();
        assert_eq!(done["kind"], "task_complete");
        assert_eq!(done["reason"], "essay written");

        let limit = serde_json::to_value(Termination::TurnLimit { limit: 5 }).unwrap();
        assert_eq!(limit, serde_json::json!({"kind": "turn_limit", "limit": 5}));
        assert_eq!(
            serde_json::to_value(Termination::HumanExit).unwrap(),
            serde_json::json!({"kind": "human_exit"})
        );
    }
}
