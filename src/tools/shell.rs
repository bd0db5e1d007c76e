//! 本地命令执行：单条 shell 命令与 Python 文件
//!
//! 在工作区目录内执行；shell 只允许单条命令（含 `;`、`&&`、`|` 拒绝），并拒绝危险子串；
//! Python 只允许工作区内已存在的 .py 文件。超时由 ToolExecutor 统一施加。

use std::process::Output;

use tokio::process::Command;

use crate::tools::SafeFs;

/// 禁止的子串（与配置中的 forbidden_patterns 合并）
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "wget ",
    "chmod 777",
    "chmod +s",
    "mkfs",
    "dd if=",
    "> /dev/sd",
];

/// 命令连接符：出现即视为多条命令
const CHAINING: &[&str] = &[";", "&&", "|"];

/// 本地命令执行器
#[derive(Debug, Clone)]
pub struct ShellRunner {
    fs: SafeFs,
    forbidden: Vec<String>,
}

impl ShellRunner {
    pub fn new(fs: SafeFs, extra_forbidden: Vec<String>) -> Self {
        let forbidden = FORBIDDEN_SUBSTR
            .iter()
            .map(|s| s.to_string())
            .chain(extra_forbidden.into_iter().map(|s| s.to_lowercase()))
            .collect();
        Self { fs, forbidden }
    }

    fn check(&self, command_line: &str) -> Result<(), String> {
        if command_line.trim().is_empty() {
            return Err("Empty command".to_string());
        }
        if CHAINING.iter().any(|c| command_line.contains(c)) {
            return Err("Multiple commands not allowed for safety.".to_string());
        }
        let lower = command_line.to_lowercase();
        if let Some(p) = self.forbidden.iter().find(|p| lower.contains(p.as_str())) {
            return Err(format!("Forbidden pattern: {}", p));
        }
        Ok(())
    }

    /// 在工作区内执行单条 shell 命令
    pub async fn execute_shell(&self, command_line: &str) -> Result<String, String> {
        self.check(command_line)?;
        tracing::info!(command = %command_line, "execute_shell");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command_line]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command_line]);
            c
        };
        let output = cmd
            .current_dir(self.fs.root())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("Execution failed: {}", e))?;
        Ok(format_output(&output))
    }

    /// 执行工作区内的 Python 文件
    pub async fn execute_python_file(&self, file: &str) -> Result<String, String> {
        if !file.ends_with(".py") {
            return Err("Invalid file type. Only .py files are allowed.".to_string());
        }
        let path = self
            .fs
            .resolve(file)
            .map_err(|_| format!("file {} does not exist.", file))?;
        tracing::info!(file = %file, "execute_python_file");

        let output = Command::new("python3")
            .arg(&path)
            .current_dir(self.fs.root())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("Execution failed: {}", e))?;
        Ok(format_output(&output))
    }
}

/// 有 stderr 时同时给出两路输出
fn format_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.trim().is_empty() {
        stdout.to_string()
    } else {
        format!("STDOUT:\n{}\n\nSTDERR:\n{}", stdout, stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn runner(dir: &TempDir) -> ShellRunner {
        ShellRunner::new(SafeFs::new(dir.path()).unwrap(), vec!["shutdown".into()])
    }

    #[test]
    fn test_rejects_chaining_and_forbidden() {
        let dir = TempDir::new().unwrap();
        let r = runner(&dir);
        assert_eq!(
            r.check("ls; rm x").unwrap_err(),
            "Multiple commands not allowed for safety."
        );
        assert!(r.check("ls && pwd").is_err());
        assert!(r.check("cat a | wc").is_err());
        assert!(r.check("rm -rf /").unwrap_err().starts_with("Forbidden"));
        assert!(r.check("SHUTDOWN now").is_err());
        assert!(r.check("ls -la").is_ok());
    }

    #[tokio::test]
    async fn test_python_requires_py_extension() {
        let dir = TempDir::new().unwrap();
        let r = runner(&dir);
        assert_eq!(
            r.execute_python_file("script.sh").await.unwrap_err(),
            "Invalid file type. Only .py files are allowed."
        );
        assert_eq!(
            r.execute_python_file("missing.py").await.unwrap_err(),
            "file missing.py does not exist."
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_runs_in_workspace() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let out = runner(&dir).execute_shell("ls").await.unwrap();
        assert!(out.contains("marker.txt"));
    }
}
