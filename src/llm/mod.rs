//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）与嵌入提供方

pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

pub use embedding::{
    create_embedder_from_config, EmbeddingError, EmbeddingProvider, HashingEmbedder,
    OpenAiEmbedder,
};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{into_lines, LlmClient, TokenStream};

/// DeepSeek 的 OpenAI 兼容端点
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
