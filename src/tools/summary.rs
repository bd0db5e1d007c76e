//! 基于记忆的对话式回答：召回相关记忆作为知识库，让模型以对话方式回答（流式）
//!
//! conversational_summary 命令与人类提问（对话覆盖轮）共用。

use std::sync::Arc;

use crate::llm::{LlmClient, TokenStream};
use crate::memory::{MemoryStore, Message};

/// 召回条数
pub const SUMMARY_RECALL_K: usize = 10;

const NO_KNOWLEDGE: &str =
    "I have no prior knowledge of this topic. Answering based on general knowledge.\n";

/// 拼装问答消息；召回失败时按无知识处理并记录 warn
pub fn summary_messages(memory: &MemoryStore, question: &str) -> Vec<Message> {
    let knowledge = match memory.get_relevant(question, SUMMARY_RECALL_K) {
        Ok(entries) => entries
            .iter()
            .map(|e| e.content.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        Err(e) => {
            tracing::warn!("recall for conversational answer failed: {}", e);
            String::new()
        }
    };
    let knowledge = if knowledge.is_empty() {
        NO_KNOWLEDGE.to_string()
    } else {
        knowledge
    };
    vec![
        Message::system(format!(
            "You are the assistant. Use the following knowledge to answer the user question in a conversational way.\n\n\
             Knowledge Base:\n{}\n\n\
             User Question: {}\n\n\
             Answer conversationally and in detail:",
            knowledge, question
        )),
        Message::user(question.to_string()),
    ]
}

/// 发起流式回答
pub async fn conversational_answer(
    llm: &Arc<dyn LlmClient>,
    memory: &MemoryStore,
    question: &str,
) -> Result<TokenStream, String> {
    let messages = summary_messages(memory, question);
    llm.complete_stream(&messages).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashingEmbedder;
    use crate::memory::StoreOptions;

    #[test]
    fn test_empty_memory_falls_back_to_general_knowledge() {
        let store = MemoryStore::in_memory(Arc::new(HashingEmbedder::new(16)), StoreOptions::default());
        let msgs = summary_messages(&store, "what did you learn?");
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].content.contains("I have no prior knowledge"));
        assert!(msgs[0].content.contains("User Question: what did you learn?"));
    }

    #[test]
    fn test_knowledge_base_includes_recalled_entries() {
        let mut store = MemoryStore::in_memory(
            Arc::new(HashingEmbedder::new(16)),
            StoreOptions {
                save_on_every_action: false,
                ..StoreOptions::default()
            },
        );
        store.add("rust ownership notes", ["action"], None).unwrap();
        let msgs = summary_messages(&store, "ownership");
        assert!(msgs[0].content.contains("rust ownership notes"));
    }
}
