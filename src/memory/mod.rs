//! 记忆层：对话历史（短期）、持久化向量记忆（长期）、token 预算

pub mod conversation;
pub mod entry;
pub mod matrix;
pub mod persistence;
pub mod store;
pub mod token_budget;

pub use conversation::{ConversationMemory, Message, Role};
pub use entry::{
    tag_set, MemoryEntry, LONG_TASK_KEYWORDS, TAG_ACTION, TAG_DONE, TAG_ESSAY, TAG_IN_PROGRESS,
    TAG_SEARCH,
};
pub use matrix::EmbeddingMatrix;
pub use persistence::{Loaded, StoreFile, StorePersistence};
pub use store::{MemoryStats, MemoryStore, StoreOptions, ERROR_REPORT_MARKER, SIMILARITY_THRESHOLD};
pub use token_budget::{fit_history, TokenEstimator};
