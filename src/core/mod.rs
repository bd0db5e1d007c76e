//! 核心层：错误类型与控制循环状态

pub mod error;
pub mod state;

pub use error::{AgentError, MemoryError};
pub use state::{LoopPhase, LoopSnapshot, Termination};
