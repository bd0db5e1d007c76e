//! 持久化向量记忆：带标签的文本条目 + 并行嵌入矩阵
//!
//! - add：拒绝错误报告、截断、自动打 in-progress、近窗去重、嵌入、条数上限淘汰、可选立即落盘
//! - search：按标签相交检索（存储顺序）
//! - get_relevant：点积精确线性扫描，阈值仅作建议，不足 k 条时按排名补齐
//! - save：序列化超出字节上限时按批淘汰最旧条目
//!
//! 不变量：entries.len() == embeddings.rows()，任何操作（包括失败的 add）之后都成立；
//! 淘汰总是移除最旧的连续前缀。

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use crate::core::MemoryError;
use crate::llm::EmbeddingProvider;
use crate::memory::entry::{
    content_hash, mentions_long_task, truncate_content, MemoryEntry, TAG_IN_PROGRESS,
};
use crate::memory::{EmbeddingMatrix, Loaded, StorePersistence};

/// 相似度建议阈值（经验值，0.10–0.20 之间）
pub const SIMILARITY_THRESHOLD: f32 = 0.15;

/// 含此标记的内容视为失败命令的错误报告，不写入记忆
pub const ERROR_REPORT_MARKER: &str = "Command Error:";

/// 存储容量与行为选项
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// 最大条目数，超出时淘汰最旧条目
    pub max_entries: usize,
    /// 单条内容最大字符数
    pub max_content_chars: usize,
    /// 记忆文件最大字节数（save 时检查）
    pub max_file_bytes: usize,
    /// 超出字节上限时每批淘汰的条目数
    pub eviction_batch: usize,
    /// 去重时向前扫描的最近条目数
    pub dedup_window: usize,
    /// 每次变更后立即落盘
    pub save_on_every_action: bool,
    /// 长篇任务关键词命中时自动打 in-progress
    pub auto_tag_in_progress: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_content_chars: 8000,
            max_file_bytes: 10 * 1024 * 1024,
            eviction_batch: 10,
            dedup_window: 50,
            save_on_every_action: true,
            auto_tag_in_progress: true,
        }
    }
}

/// 存储统计：(条目数, 嵌入矩阵形状)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub entry_count: usize,
    pub shape: (usize, usize),
}

pub struct MemoryStore {
    entries: Vec<MemoryEntry>,
    embeddings: EmbeddingMatrix,
    embedder: Arc<dyn EmbeddingProvider>,
    persistence: Option<StorePersistence>,
    options: StoreOptions,
    next_seq: u64,
}

impl MemoryStore {
    /// 纯内存存储（save 不写盘）
    pub fn in_memory(embedder: Arc<dyn EmbeddingProvider>, options: StoreOptions) -> Self {
        Self {
            entries: Vec::new(),
            embeddings: EmbeddingMatrix::new(),
            embedder,
            persistence: None,
            options,
            next_seq: 0,
        }
    }

    /// 打开记忆文件：不存在则以空存储开始（warn），损坏则以空存储开始（error）
    pub fn open(
        path: impl AsRef<Path>,
        embedder: Arc<dyn EmbeddingProvider>,
        options: StoreOptions,
    ) -> Self {
        let persistence = StorePersistence::new(path);
        let (entries, embeddings) = match persistence.load() {
            Loaded::Missing => {
                tracing::warn!(
                    path = %persistence.path().display(),
                    "memory file does not exist, memory will be initialized empty"
                );
                (Vec::new(), EmbeddingMatrix::new())
            }
            Loaded::Restored(entries, embeddings) => {
                tracing::info!(
                    path = %persistence.path().display(),
                    entries = entries.len(),
                    "memory restored"
                );
                (entries, embeddings)
            }
            Loaded::Corrupt(reason) => {
                tracing::error!(
                    path = %persistence.path().display(),
                    reason = %reason,
                    "memory file is not valid, memory will be initialized empty"
                );
                (Vec::new(), EmbeddingMatrix::new())
            }
        };
        let next_seq = entries.len() as u64;
        Self {
            entries,
            embeddings,
            embedder,
            persistence: Some(persistence),
            options,
            next_seq,
        }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn embedding_rows(&self) -> usize {
        self.embeddings.rows()
    }

    /// 写入一条记忆
    ///
    /// 返回 `Ok(None)` 表示内容是错误报告被拒绝；近窗内已有相同内容时返回已有条目；
    /// 嵌入失败时返回错误且存储不变。
    pub fn add<I, S>(
        &mut self,
        content: &str,
        tags: I,
        id: Option<String>,
    ) -> Result<Option<MemoryEntry>, MemoryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if content.contains(ERROR_REPORT_MARKER) {
            tracing::debug!("skipping error report, not added to memory");
            return Ok(None);
        }

        let content = truncate_content(content, self.options.max_content_chars);
        let mut tags: BTreeSet<String> = tags.into_iter().map(Into::into).collect();
        if self.options.auto_tag_in_progress
            && !tags.contains(TAG_IN_PROGRESS)
            && mentions_long_task(&content)
        {
            tags.insert(TAG_IN_PROGRESS.to_string());
        }

        let hash = content_hash(&content);
        let window_start = self.entries.len().saturating_sub(self.options.dedup_window);
        if let Some(existing) = self.entries[window_start..]
            .iter()
            .rev()
            .find(|e| e.content_hash == hash)
        {
            tracing::debug!(id = %existing.id, "duplicate content, returning existing entry");
            return Ok(Some(existing.clone()));
        }

        let embedding = self.embedder.embed(&content)?;
        self.embeddings.check_row(&embedding)?;

        let id = id.unwrap_or_else(|| format!("mem_{}_{}", self.next_seq, Utc::now().timestamp()));
        self.next_seq += 1;
        let entry = MemoryEntry::new(id, content, tags);

        self.embeddings.push_row(&embedding)?;
        self.entries.push(entry.clone());

        if self.entries.len() > self.options.max_entries {
            let overflow = self.entries.len() - self.options.max_entries;
            self.evict_oldest(overflow);
        }

        if self.options.save_on_every_action {
            self.save()?;
        }
        Ok(Some(entry))
    }

    /// 标签与 match_tags 相交的条目：去掉 in-progress、补上 done；返回命中条目数
    pub fn mark_done<S: AsRef<str>>(&mut self, match_tags: &[S]) -> Result<usize, MemoryError> {
        let mut matched = 0;
        let mut changed = false;
        for entry in self.entries.iter_mut().filter(|e| e.matches_any(match_tags)) {
            matched += 1;
            changed |= entry.mark_done();
        }
        if changed && self.options.save_on_every_action {
            self.save()?;
        }
        Ok(matched)
    }

    /// 标签相交检索，按存储顺序返回
    pub fn search<S: AsRef<str>>(&self, tags: &[S]) -> Vec<&MemoryEntry> {
        self.entries.iter().filter(|e| e.matches_any(tags)).collect()
    }

    /// 按点积相似度返回最多 k 条（降序）；阈值之下的条目用于补齐
    pub fn get_relevant(&self, query: &str, k: usize) -> Result<Vec<&MemoryEntry>, MemoryError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(query)?;
        self.embeddings.check_row(&query_embedding)?;
        let scores = self.embeddings.dot_scores(&query_embedding);

        let mut ranked: Vec<usize> = (0..scores.len()).collect();
        ranked.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(Ordering::Equal)
                .then(b.cmp(&a))
        });
        ranked.truncate(k);

        let mut selected: Vec<usize> = ranked
            .iter()
            .copied()
            .filter(|&i| scores[i] >= SIMILARITY_THRESHOLD)
            .collect();
        if selected.len() < k {
            for &i in &ranked {
                if selected.len() >= k {
                    break;
                }
                if !selected.contains(&i) {
                    selected.push(i);
                }
            }
        }
        Ok(selected.into_iter().map(|i| &self.entries[i]).collect())
    }

    /// 最相关的一条
    pub fn get(&self, query: &str) -> Result<Option<&MemoryEntry>, MemoryError> {
        Ok(self.get_relevant(query, 1)?.into_iter().next())
    }

    pub fn clear(&mut self) -> &'static str {
        self.entries.clear();
        self.embeddings.clear();
        if self.options.save_on_every_action {
            if let Err(e) = self.save() {
                tracing::warn!("memory save after clear failed: {}", e);
            }
        }
        "Memory cleared."
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            entry_count: self.entries.len(),
            shape: self.embeddings.shape(),
        }
    }

    /// 当前内容序列化后的字节数
    pub fn serialized_size(&self) -> Result<usize, MemoryError> {
        Ok(StorePersistence::encode(&self.entries, &self.embeddings)?.len())
    }

    /// 整体写盘；超出字节上限时按批淘汰最旧条目直到低于上限
    pub fn save(&mut self) -> Result<(), MemoryError> {
        let Some(persistence) = self.persistence.clone() else {
            return Ok(());
        };
        let batch = self.options.eviction_batch.max(1);
        let mut bytes = StorePersistence::encode(&self.entries, &self.embeddings)?;
        while bytes.len() > self.options.max_file_bytes && !self.entries.is_empty() {
            self.evict_oldest(batch);
            bytes = StorePersistence::encode(&self.entries, &self.embeddings)?;
        }
        persistence.write(&bytes)?;
        tracing::debug!(entries = self.entries.len(), bytes = bytes.len(), "memory saved");
        Ok(())
    }

    fn evict_oldest(&mut self, n: usize) {
        let n = n.min(self.entries.len());
        if n == 0 {
            return;
        }
        self.entries.drain(..n);
        self.embeddings.drain_front(n);
        tracing::debug!(evicted = n, remaining = self.entries.len(), "evicted oldest memories");
    }
}
