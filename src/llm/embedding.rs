//! 嵌入 API：供持久化记忆使用
//!
//! OpenAiEmbedder 调用 OpenAI 兼容的 /embeddings 端点；HashingEmbedder 为离线确定性实现
//! （无 API Key 时的回退，也用于测试）。

use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use thiserror::Error;
use tokio::runtime::RuntimeFlavor;

/// 送往嵌入后端的最大字符数（约 6000 token，远低于模型上限）
pub const MAX_SAFE_CHARS: usize = 24_000;

/// 嵌入失败原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding backend error: {0}")]
    Backend(String),

    #[error("embedding backend returned no vector")]
    Empty,
}

/// 可从 sync 上下文调用的嵌入提供方
pub trait EmbeddingProvider: Send + Sync {
    /// 将文本编码为定长向量
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// 归一化空白并截断到安全长度
pub fn prepare_input(text: &str) -> String {
    text.replace('\n', " ").chars().take(MAX_SAFE_CHARS).collect()
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    /// 从环境变量与可选 base_url 创建（与 LLM 共用 OPENAI_API_KEY / base_url）
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    pub async fn embed_async(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let input = prepare_input(text);
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(input))
            .build()
            .map_err(|e| EmbeddingError::Backend(e.to_string()))?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| EmbeddingError::Backend(e.to_string()))?;
        response
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .filter(|v| !v.is_empty())
            .ok_or(EmbeddingError::Empty)
    }
}

/// 同步调用需要多线程 tokio 运行时（block_in_place）；其它情况返回 Backend 错误
impl EmbeddingProvider for OpenAiEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| EmbeddingError::Backend("no tokio runtime available".to_string()))?;
        if handle.runtime_flavor() != RuntimeFlavor::MultiThread {
            return Err(EmbeddingError::Backend(
                "blocking embedding requires a multi-threaded tokio runtime".to_string(),
            ));
        }
        tokio::task::block_in_place(|| handle.block_on(self.embed_async(text)))
    }
}

/// 离线嵌入：小写词经 FNV-1a 散列到固定维度的桶，再做 L2 归一化
///
/// 同词越多点积越高，足以支撑本地运行与测试中的相似度检索。
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

fn fnv1a(word: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in word.as_bytes() {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

impl EmbeddingProvider for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut v = vec![0.0f32; self.dimension];
        let input = prepare_input(text).to_lowercase();
        for word in input
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = (fnv1a(word) % self.dimension as u64) as usize;
            v[bucket] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        Ok(v)
    }
}

/// 从应用配置创建嵌入提供方；未启用或无 API Key 时回退到 HashingEmbedder
pub fn create_embedder_from_config(
    enabled: bool,
    base_url: Option<&str>,
    model: &str,
    api_key: Option<&str>,
) -> Arc<dyn EmbeddingProvider> {
    let key = api_key
        .map(String::from)
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());
    if !enabled || key.as_deref().unwrap_or("").is_empty() || key.as_deref() == Some("sk-placeholder") {
        tracing::warn!("embedding backend unavailable, using offline hashing embedder");
        return Arc::new(HashingEmbedder::default());
    }
    tracing::info!("Using OpenAI embeddings ({})", model);
    Arc::new(OpenAiEmbedder::new(base_url, model, key.as_deref()))
}
