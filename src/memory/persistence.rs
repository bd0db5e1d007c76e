//! 记忆文件持久化
//!
//! 单个 JSON 文件：`{"entries": [...], "embeddings": [[...], ...]}`，每次保存整体重写。
//! 文件缺失或损坏时返回空存储（记录日志），不会让进程崩溃。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::MemoryError;
use crate::memory::{EmbeddingMatrix, MemoryEntry};

/// 落盘格式
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StoreFile {
    #[serde(default)]
    pub entries: Vec<MemoryEntry>,
    #[serde(default)]
    pub embeddings: Vec<Vec<f32>>,
}

/// 加载结果：区分「新建」「读取成功」「损坏后重置」，便于调用方与测试判断
#[derive(Debug)]
pub enum Loaded {
    Missing,
    Restored(Vec<MemoryEntry>, EmbeddingMatrix),
    Corrupt(String),
}

/// 记忆文件读写
#[derive(Debug, Clone)]
pub struct StorePersistence {
    path: PathBuf,
}

impl StorePersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取并校验记忆文件（条目数必须等于矩阵行数，各行同维）
    pub fn load(&self) -> Loaded {
        if !self.path.exists() {
            return Loaded::Missing;
        }
        let data = match std::fs::read(&self.path) {
            Ok(d) => d,
            Err(e) => return Loaded::Corrupt(e.to_string()),
        };
        if data.iter().all(|b| b.is_ascii_whitespace()) {
            return Loaded::Restored(Vec::new(), EmbeddingMatrix::new());
        }
        let file: StoreFile = match serde_json::from_slice(&data) {
            Ok(f) => f,
            Err(e) => return Loaded::Corrupt(e.to_string()),
        };
        if file.entries.len() != file.embeddings.len() {
            return Loaded::Corrupt(format!(
                "{} entries but {} embedding rows",
                file.entries.len(),
                file.embeddings.len()
            ));
        }
        match EmbeddingMatrix::from_rows(file.embeddings) {
            Some(matrix) => Loaded::Restored(file.entries, matrix),
            None => Loaded::Corrupt("embedding rows have inconsistent dimensions".to_string()),
        }
    }

    /// 序列化为写盘字节（大小即文件大小）
    pub fn encode(entries: &[MemoryEntry], matrix: &EmbeddingMatrix) -> Result<Vec<u8>, MemoryError> {
        #[derive(Serialize)]
        struct StoreFileRef<'a> {
            entries: &'a [MemoryEntry],
            embeddings: Vec<Vec<f32>>,
        }
        let file = StoreFileRef {
            entries,
            embeddings: matrix.to_rows(),
        };
        Ok(serde_json::to_vec(&file)?)
    }

    /// 写入文件；父目录不存在时自动创建
    pub fn write(&self, bytes: &[u8]) -> Result<(), MemoryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}
