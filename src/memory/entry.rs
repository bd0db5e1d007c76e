//! 记忆条目：带标签的文本、创建时间与内容摘要
//!
//! 嵌入向量不放在条目里，而是存储在 MemoryStore 的并行矩阵中（同序同长）。

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const TAG_ACTION: &str = "action";
pub const TAG_ESSAY: &str = "essay";
pub const TAG_IN_PROGRESS: &str = "in-progress";
pub const TAG_DONE: &str = "done";
pub const TAG_SEARCH: &str = "search";

/// 长篇任务关键词：命中时自动打上 in-progress
pub const LONG_TASK_KEYWORDS: &[&str] = &["essay", "report", "article", "story"];

/// 超长内容截断后追加的标记
pub const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// 单条记忆
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    /// 有序集合，重复标签自动合并
    pub tags: BTreeSet<String>,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub content_hash: String,
}

impl MemoryEntry {
    pub fn new(id: impl Into<String>, content: impl Into<String>, tags: BTreeSet<String>) -> Self {
        let content = content.into();
        Self {
            id: id.into(),
            content_hash: content_hash(&content),
            tags,
            timestamp: Utc::now(),
            content,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// 标签与查询集合是否相交
    pub fn matches_any<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        tags.iter().any(|t| self.tags.contains(t.as_ref()))
    }

    /// 去掉 in-progress 并补上 done；返回标签是否有变化
    pub fn mark_done(&mut self) -> bool {
        let removed = self.tags.remove(TAG_IN_PROGRESS);
        let added = self.tags.insert(TAG_DONE.to_string());
        removed || added
    }
}

/// 内容的 SHA-256 十六进制摘要
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// 按字符数截断；截断时追加可见标记
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let mut out: String = content.chars().take(max_chars).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// 文本是否提到长篇任务关键词（不区分大小写）
pub fn mentions_long_task(text: &str) -> bool {
    let lower = text.to_lowercase();
    LONG_TASK_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// 将任意标签列表收拢为集合
pub fn tag_set<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    tags.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_content_marks_cut() {
        assert_eq!(truncate_content("short", 10), "short");
        let cut = truncate_content("记忆存储测试", 2);
        assert_eq!(cut, format!("记忆{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_mark_done_transitions_tags() {
        let mut e = MemoryEntry::new("a", "x", tag_set(["action", "in-progress", "action"]));
        assert_eq!(e.tags.len(), 2);
        assert!(e.mark_done());
        assert_eq!(e.tags.iter().collect::<Vec<_>>(), vec!["action", "done"]);
        assert!(!e.mark_done());
    }

    #[test]
    fn test_content_hash_is_stable() {
        let e = MemoryEntry::new("a", "hello", BTreeSet::new());
        assert_eq!(e.content_hash, content_hash("hello"));
        assert_eq!(e.content_hash.len(), 64);
    }

    #[test]
    fn test_mentions_long_task() {
        assert!(mentions_long_task("Write a REPORT on bees"));
        assert!(!mentions_long_task("list files"));
    }
}
