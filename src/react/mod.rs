//! 认知层：Planner、人工授权、重复检测与控制循环

pub mod approval;
pub mod events;
pub mod guard;
pub mod loop_;
pub mod planner;

pub use approval::{parse_approval, ApprovalDecision, HumanInput, ScriptedInput, StdinInput};
pub use events::LoopEvent;
pub use guard::{ActionSignature, RepetitionGuard, LOOP_DETECTED_MESSAGE};
pub use loop_::{ControlLoop, LoopSettings, INITIAL_USER_INPUT, NEXT_COMMAND_DIRECTIVE};
pub use planner::{parse_command, ParsedCommand, Planner};
