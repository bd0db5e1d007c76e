//! 沙箱文件系统
//!
//! SafeFs 绑定工作区根目录，所有路径必须落在根下（禁止绝对路径与 ../ 逃逸）。
//! 读写、追加、删除、列目录、合并文本文件，以及按块流式读取大文件（FileCursor 记录每个文件的读取进度）。

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::core::AgentError;

/// stream_file 每块字符数
pub const STREAM_CHUNK_CHARS: usize = 2000;
/// 相邻块重叠字符数
pub const STREAM_CHUNK_OVERLAP: usize = 200;

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    /// 绑定根目录；目录不存在时创建
    pub fn new(root_dir: impl AsRef<Path>) -> Result<Self, AgentError> {
        let root = root_dir.as_ref();
        std::fs::create_dir_all(root)
            .map_err(|e| AgentError::ConfigError(format!("workspace {}: {}", root.display(), e)))?;
        let root_dir = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        Ok(Self { root_dir })
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 已存在路径：规范化后必须在根下
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let path = path.trim_start_matches("./");
        let full = self.root_dir.join(path);
        let canonical = full
            .canonicalize()
            .map_err(|_| AgentError::ToolExecutionFailed(format!("Path not found: {}", path)))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(AgentError::PathEscape(path.to_string()))
        }
    }

    /// 可能尚不存在的路径（写入目标）：只允许相对路径且不含 ..
    pub fn resolve_new(&self, path: &str) -> Result<PathBuf, AgentError> {
        let trimmed = path.trim_start_matches("./");
        let rel = Path::new(trimmed);
        if trimmed.is_empty()
            || rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(AgentError::PathEscape(path.to_string()));
        }
        Ok(self.root_dir.join(rel))
    }

    pub fn read_file(&self, path: &str) -> Result<String, AgentError> {
        let resolved = self.resolve(path)?;
        std::fs::read_to_string(&resolved)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Read failed: {}", e)))
    }

    pub fn write_file(&self, path: &str, text: &str) -> Result<String, AgentError> {
        let target = self.resolve_new(path)?;
        ensure_parent(&target)?;
        std::fs::write(&target, text)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Write failed: {}", e)))?;
        Ok("File written to successfully.".to_string())
    }

    pub fn append_file(&self, path: &str, text: &str) -> Result<String, AgentError> {
        use std::io::Write;
        let target = self.resolve_new(path)?;
        ensure_parent(&target)?;
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Append failed: {}", e)))?;
        f.write_all(text.as_bytes())
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Append failed: {}", e)))?;
        Ok("Text appended successfully.".to_string())
    }

    pub fn delete_file(&self, path: &str) -> Result<String, AgentError> {
        let resolved = self.resolve(path)?;
        if resolved == self.root_dir || resolved.is_dir() {
            return Err(AgentError::ToolExecutionFailed(format!("Not a file: {}", path)));
        }
        std::fs::remove_file(&resolved)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Delete failed: {}", e)))?;
        Ok("File deleted successfully.".to_string())
    }

    /// 递归列出目录下的文件（相对根目录，跳过隐藏文件）
    pub fn search_files(&self, directory: &str) -> Result<Vec<String>, AgentError> {
        let base = if directory.is_empty() || directory == "." {
            self.root_dir.clone()
        } else {
            self.resolve(directory)?
        };
        let mut found = Vec::new();
        for entry in WalkDir::new(&base)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() {
                let rel = entry.path().strip_prefix(&self.root_dir).unwrap_or(entry.path());
                found.push(rel.to_string_lossy().to_string());
            }
        }
        found.sort();
        Ok(found)
    }

    /// 将 folder 下的 .txt 文件按名称排序依次写入 output（每个文件后空一行）
    pub fn merge_text_files(&self, folder: &str, output: &str) -> Result<String, AgentError> {
        let dir = self.resolve(folder)?;
        let mut parts: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("List failed: {}", e)))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().map(|x| x == "txt").unwrap_or(false))
            .collect();
        parts.sort();

        let target = self.resolve_new(output)?;
        let mut merged = String::new();
        for p in &parts {
            if *p == target {
                continue;
            }
            let text = std::fs::read_to_string(p)
                .map_err(|e| AgentError::ToolExecutionFailed(format!("Read failed: {}", e)))?;
            merged.push_str(&text);
            merged.push_str("\n\n");
        }
        let count = parts.iter().filter(|p| **p != target).count();
        ensure_parent(&target)?;
        std::fs::write(&target, merged)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Write failed: {}", e)))?;
        Ok(format!("Merged {} files into {}", count, output))
    }
}

fn ensure_parent(target: &Path) -> Result<(), AgentError> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Create dir failed: {}", e)))?;
    }
    Ok(())
}

/// 按字符切块，相邻块重叠 overlap 个字符（UTF-8 安全）
pub fn split_chunks(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < total {
        let end = (start + chunk_size).min(total);
        chunks.push(chars[start..end].iter().collect());
        if end == total {
            break;
        }
        start += step;
    }
    chunks
}

/// 每个文件的流式读取进度（下一块的序号）
#[derive(Debug, Default)]
pub struct FileCursor {
    positions: HashMap<String, usize>,
}

impl FileCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回文件的下一块；读完后返回结束提示
    pub fn next_chunk(&mut self, fs: &SafeFs, file: &str) -> Result<String, AgentError> {
        let content = fs.read_file(file)?;
        let chunks = split_chunks(&content, STREAM_CHUNK_CHARS, STREAM_CHUNK_OVERLAP);
        let idx = self.positions.entry(file.to_string()).or_insert(0);
        if *idx >= chunks.len() {
            return Ok(format!("End of file reached for {}.", file));
        }
        let text = format!(
            "Reading {}, part {} of {}:\n{}",
            file,
            *idx + 1,
            chunks.len(),
            chunks[*idx]
        );
        *idx += 1;
        Ok(text)
    }

    pub fn position(&self, file: &str) -> usize {
        self.positions.get(file).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rejects_escapes() {
        let dir = TempDir::new().unwrap();
        let fs = SafeFs::new(dir.path()).unwrap();
        assert!(matches!(fs.resolve_new("../x.txt"), Err(AgentError::PathEscape(_))));
        assert!(matches!(fs.resolve_new("/etc/passwd"), Err(AgentError::PathEscape(_))));
        assert!(fs.read_file("../../etc/passwd").is_err());
    }

    #[test]
    fn test_write_append_read_delete() {
        let dir = TempDir::new().unwrap();
        let fs = SafeFs::new(dir.path()).unwrap();
        fs.write_file("notes/a.txt", "hello").unwrap();
        fs.append_file("notes/a.txt", " world").unwrap();
        assert_eq!(fs.read_file("notes/a.txt").unwrap(), "hello world");
        assert_eq!(fs.search_files("").unwrap(), vec!["notes/a.txt".to_string()]);
        fs.delete_file("notes/a.txt").unwrap();
        assert!(fs.read_file("notes/a.txt").is_err());
    }

    #[test]
    fn test_merge_text_files_sorted() {
        let dir = TempDir::new().unwrap();
        let fs = SafeFs::new(dir.path()).unwrap();
        fs.write_file("parts/2.txt", "second").unwrap();
        fs.write_file("parts/1.txt", "first").unwrap();
        fs.write_file("parts/skip.md", "nope").unwrap();
        let msg = fs.merge_text_files("parts", "all.txt").unwrap();
        assert_eq!(msg, "Merged 2 files into all.txt");
        assert_eq!(fs.read_file("all.txt").unwrap(), "first\n\nsecond\n\n");
    }

    #[test]
    fn test_split_chunks_overlap() {
        let text: String = "abcdefghij".into();
        assert_eq!(split_chunks(&text, 4, 1), vec!["abcd", "defg", "ghij"]);
        assert!(split_chunks("", 4, 1).is_empty());
    }

    #[test]
    fn test_cursor_advances_per_file() {
        let dir = TempDir::new().unwrap();
        let fs = SafeFs::new(dir.path()).unwrap();
        fs.write_file("big.txt", &"x".repeat(STREAM_CHUNK_CHARS + 500)).unwrap();
        let mut cursor = FileCursor::new();
        assert!(cursor.next_chunk(&fs, "big.txt").unwrap().starts_with("Reading big.txt, part 1 of 2:"));
        assert!(cursor.next_chunk(&fs, "big.txt").unwrap().starts_with("Reading big.txt, part 2 of 2:"));
        assert_eq!(
            cursor.next_chunk(&fs, "big.txt").unwrap(),
            "End of file reached for big.txt."
        );
        assert_eq!(cursor.position("big.txt"), 2);
        assert_eq!(cursor.position("other.txt"), 0);
    }
}
