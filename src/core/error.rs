//! 错误类型
//!
//! AgentError 覆盖控制循环层（模型、解析、工具、配置）；MemoryError 覆盖记忆存储层（嵌入、维度、读写）。
//! 控制循环从不因单轮错误退出：这些错误最终都会折叠为本轮结果文本。

use thiserror::Error;

use crate::llm::EmbeddingError;

/// Agent 运行过程中可能出现的错误（模型、解析、工具、路径逃逸等）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),
}

/// 记忆存储错误：add 失败时存储保持原样（条目与嵌入矩阵不会失配）
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("embedding dimension mismatch: store has {expected}, provider returned {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("memory file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("memory serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
