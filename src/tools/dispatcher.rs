//! 命令分发
//!
//! 将模型给出的 (name, args) 校验为 Action 后路由到对应能力；每个能力在 ToolExecutor 的超时与审计下运行，
//! 失败一律转为结果文本（"Error: ..."），从不向上抛出。task_complete 返回 Shutdown 信号。
//! 分发器持有 stream_file 的读取进度（FileCursor），记忆存储由控制循环按调用借出。

use std::sync::Arc;

use serde_json::Value;

use crate::config::{GithubSection, ToolsSection};
use crate::core::AgentError;
use crate::llm::{LlmClient, TokenStream};
use crate::memory::{MemoryStore, TAG_ACTION, TAG_SEARCH};
use crate::tools::git::clone_repository;
use crate::tools::summary::conversational_answer;
use crate::tools::{Action, FileCursor, SafeFs, ShellRunner, ToolExecutor, WebClient};

/// 模型用来表示「从上次搜索结果里取 URL」的占位符
pub const URL_PLACEHOLDER: &str = "<url_from_search_results>";

pub const NO_URL_IN_MEMORY: &str =
    "Error: No valid URL found in memory. Please run search again and provide a URL.";

const LOCAL_COMMANDS_DISABLED: &str =
    "Local shell execution not allowed. Set tools.execute_local_commands = true to enable.";

/// 能力输出：一次性文本，或逐块产出的流
pub enum ToolOutput {
    Text(String),
    Stream(TokenStream),
}

impl std::fmt::Debug for ToolOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolOutput::Text(t) => f.debug_tuple("Text").field(t).finish(),
            ToolOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// 分发结果
#[derive(Debug)]
pub enum DispatchOutcome {
    Output(ToolOutput),
    /// 任务完成，控制循环记录后结束
    Shutdown { reason: String },
}

impl DispatchOutcome {
    fn text(s: impl Into<String>) -> Self {
        DispatchOutcome::Output(ToolOutput::Text(s.into()))
    }
}

pub struct CommandDispatcher {
    fs: SafeFs,
    shell: ShellRunner,
    web: WebClient,
    github: GithubSection,
    llm: Arc<dyn LlmClient>,
    executor: ToolExecutor,
    cursor: FileCursor,
    execute_local_commands: bool,
}

impl CommandDispatcher {
    pub fn new(fs: SafeFs, llm: Arc<dyn LlmClient>, tools: &ToolsSection) -> Self {
        Self {
            shell: ShellRunner::new(fs.clone(), tools.shell.forbidden_patterns.clone()),
            web: WebClient::new(&tools.search),
            github: tools.github.clone(),
            executor: ToolExecutor::new(tools.tool_timeout_secs),
            cursor: FileCursor::new(),
            execute_local_commands: tools.execute_local_commands,
            fs,
            llm,
        }
    }

    pub fn fs(&self) -> &SafeFs {
        &self.fs
    }

    pub fn cursor(&self) -> &FileCursor {
        &self.cursor
    }

    /// 折叠同义词、校验参数后分发
    pub async fn dispatch(&mut self, name: &str, args: &Value, memory: &mut MemoryStore) -> DispatchOutcome {
        let action = Action::from_command(name, args);
        self.dispatch_action(action, args, memory).await
    }

    pub async fn dispatch_action(
        &mut self,
        action: Action,
        args: &Value,
        memory: &mut MemoryStore,
    ) -> DispatchOutcome {
        let name = action.name().to_string();
        let exec = &self.executor;
        let fs = &self.fs;

        let result: Result<ToolOutput, AgentError> = match action {
            Action::TaskComplete { reason } => return DispatchOutcome::Shutdown { reason },
            Action::Unknown { name } => {
                return DispatchOutcome::text(format!("Unknown command '{}'.", name))
            }
            Action::Error { message } => return DispatchOutcome::text(format!("Error: {}", message)),
            Action::DoNothing {} => return DispatchOutcome::text("No action performed."),
            Action::HumanFeedback {} => return DispatchOutcome::text("Human feedback: "),

            Action::ReadFile { file } => exec
                .execute(&name, args, async { fs.read_file(&file).map_err(|e| e.to_string()) })
                .await
                .map(ToolOutput::Text),
            Action::WriteToFile { file, text } => exec
                .execute(&name, args, async {
                    fs.write_file(&file, &text).map_err(|e| e.to_string())
                })
                .await
                .map(ToolOutput::Text),
            Action::AppendToFile { file, text } => exec
                .execute(&name, args, async {
                    fs.append_file(&file, &text).map_err(|e| e.to_string())
                })
                .await
                .map(ToolOutput::Text),
            Action::DeleteFile { file } => exec
                .execute(&name, args, async { fs.delete_file(&file).map_err(|e| e.to_string()) })
                .await
                .map(ToolOutput::Text),
            Action::SearchFiles { directory } => exec
                .execute(&name, args, async {
                    fs.search_files(&directory)
                        .map(|files| files.join("\n"))
                        .map_err(|e| e.to_string())
                })
                .await
                .map(ToolOutput::Text),
            Action::StreamFile { file } => {
                let cursor = &mut self.cursor;
                exec.execute(&name, args, async {
                    cursor.next_chunk(fs, &file).map_err(|e| e.to_string())
                })
                .await
                .map(ToolOutput::Text)
            }
            Action::MergeTextFiles { folder, output } => exec
                .execute(&name, args, async {
                    fs.merge_text_files(&folder, &output).map_err(|e| e.to_string())
                })
                .await
                .map(ToolOutput::Text),
            Action::ExecuteShell { command_line } => {
                if !self.execute_local_commands {
                    return DispatchOutcome::text(LOCAL_COMMANDS_DISABLED);
                }
                exec.execute(&name, args, self.shell.execute_shell(&command_line))
                    .await
                    .map(ToolOutput::Text)
            }
            Action::ExecutePythonFile { file } => {
                if !self.execute_local_commands {
                    return DispatchOutcome::text(LOCAL_COMMANDS_DISABLED);
                }
                exec.execute(&name, args, self.shell.execute_python_file(&file))
                    .await
                    .map(ToolOutput::Text)
            }
            Action::CloneRepository {
                repository_url,
                clone_path,
            } => exec
                .execute(
                    &name,
                    args,
                    clone_repository(fs, &self.github, &repository_url, clone_path.as_deref()),
                )
                .await
                .map(ToolOutput::Text),
            Action::BrowseWebsite { url, question } => {
                let url = match url.filter(|u| !u.trim().is_empty() && u != URL_PLACEHOLDER) {
                    Some(u) => u,
                    None => match last_search_url(memory) {
                        Some(u) => u,
                        None => return DispatchOutcome::text(NO_URL_IN_MEMORY),
                    },
                };
                exec.execute(&name, args, self.web.browse(&url, &question))
                    .await
                    .map(ToolOutput::Text)
            }
            Action::Google { input } => {
                match exec.execute(&name, args, self.web.search(&input)).await {
                    Ok(hits) => {
                        let urls: Vec<&str> = hits.iter().map(|h| h.url.as_str()).collect();
                        if !urls.is_empty() {
                            let record = format!("Search results for '{}':\n{}", input, urls.join("\n"));
                            if let Err(e) = memory.add(&record, [TAG_ACTION, TAG_SEARCH], None) {
                                tracing::warn!("failed to record search results: {}", e);
                            }
                        }
                        Ok(ToolOutput::Text(
                            serde_json::to_string_pretty(&hits).unwrap_or_default(),
                        ))
                    }
                    Err(e) => Err(e),
                }
            }
            Action::MemoryAdd { string } => exec
                .execute(&name, args, async {
                    match memory.add(&string, Vec::<String>::new(), None) {
                        Ok(Some(entry)) => Ok(format!("Committed to memory as {}.", entry.id)),
                        Ok(None) => Ok("Not committed: error reports are not stored.".to_string()),
                        Err(e) => Err(e.to_string()),
                    }
                })
                .await
                .map(ToolOutput::Text),
            Action::ConversationalSummary { prompt } => exec
                .execute(&name, args, conversational_answer(&self.llm, memory, &prompt))
                .await
                .map(ToolOutput::Stream),
        };

        match result {
            Ok(out) => DispatchOutcome::Output(out),
            Err(e) => DispatchOutcome::text(format!("Error: {}", e)),
        }
    }
}

/// 最近一条 search 记忆的最后一行，且以 http 开头
fn last_search_url(memory: &MemoryStore) -> Option<String> {
    let entry = memory.search(&[TAG_SEARCH]).into_iter().last()?;
    let candidate = entry.content.lines().last()?.trim();
    if candidate.starts_with("http") {
        Some(candidate.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{HashingEmbedder, MockLlmClient};
    use crate::memory::StoreOptions;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (CommandDispatcher, MemoryStore) {
        let fs = SafeFs::new(dir.path().join("ws")).unwrap();
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::new());
        let dispatcher = CommandDispatcher::new(fs, llm, &ToolsSection::default());
        let store = MemoryStore::in_memory(
            Arc::new(HashingEmbedder::new(16)),
            StoreOptions {
                save_on_every_action: false,
                ..StoreOptions::default()
            },
        );
        (dispatcher, store)
    }

    fn text(outcome: DispatchOutcome) -> String {
        match outcome {
            DispatchOutcome::Output(ToolOutput::Text(t)) => t,
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_synonym_write_then_read() {
        let dir = TempDir::new().unwrap();
        let (mut d, mut store) = setup(&dir);
        let out = d
            .dispatch("create_file", &json!({"file": "a.txt", "text": "hi"}), &mut store)
            .await;
        assert_eq!(text(out), "File written to successfully.");
        let out = d.dispatch("read_file", &json!({"file": "a.txt"}), &mut store).await;
        assert_eq!(text(out), "hi");
    }

    #[tokio::test]
    async fn test_failures_become_error_text() {
        let dir = TempDir::new().unwrap();
        let (mut d, mut store) = setup(&dir);
        let out = text(d.dispatch("read_file", &json!({"file": "nope.txt"}), &mut store).await);
        assert!(out.starts_with("Error: "));
        let out = text(d.dispatch("read_file", &json!({}), &mut store).await);
        assert!(out.starts_with("Error: invalid arguments for 'read_file'"));
        let out = text(d.dispatch("teleport", &json!({}), &mut store).await);
        assert_eq!(out, "Unknown command 'teleport'.");
    }

    #[tokio::test]
    async fn test_shell_disabled_by_default() {
        let dir = TempDir::new().unwrap();
        let (mut d, mut store) = setup(&dir);
        let out = text(d.dispatch("run_shell", &json!({"command_line": "ls"}), &mut store).await);
        assert_eq!(out, LOCAL_COMMANDS_DISABLED);
    }

    #[tokio::test]
    async fn test_browse_without_url_needs_search_memory() {
        let dir = TempDir::new().unwrap();
        let (mut d, mut store) = setup(&dir);
        let out = text(
            d.dispatch("browse_website", &json!({"url": URL_PLACEHOLDER}), &mut store)
                .await,
        );
        assert_eq!(out, NO_URL_IN_MEMORY);

        store
            .add("Search results for 'x':\nnot a url", [TAG_ACTION, TAG_SEARCH], None)
            .unwrap();
        let out = text(d.dispatch("browse_website", &json!({}), &mut store).await);
        assert_eq!(out, NO_URL_IN_MEMORY);
    }

    #[test]
    fn test_last_search_url_takes_latest_entry() {
        let mut store = MemoryStore::in_memory(Arc::new(HashingEmbedder::new(16)), StoreOptions {
            save_on_every_action: false,
            ..StoreOptions::default()
        });
        store
            .add("Search results for 'a':\nhttps://old.example", [TAG_SEARCH], None)
            .unwrap();
        store
            .add("Search results for 'b':\nhttps://one.example\nhttps://two.example", [TAG_SEARCH], None)
            .unwrap();
        assert_eq!(last_search_url(&store).as_deref(), Some("https://two.example"));
    }

    #[tokio::test]
    async fn test_task_complete_and_memory_add() {
        let dir = TempDir::new().unwrap();
        let (mut d, mut store) = setup(&dir);
        let out = d
            .dispatch("task_complete", &json!({"reason": "done"}), &mut store)
            .await;
        assert!(matches!(out, DispatchOutcome::Shutdown { reason } if reason == "done"));

        let out = text(d.dispatch("memory_add", &json!({"string": "remember me"}), &mut store).await);
        assert!(out.starts_with("Committed to memory as mem_"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_file_cursor_lives_in_dispatcher() {
        let dir = TempDir::new().unwrap();
        let (mut d, mut store) = setup(&dir);
        d.fs().write_file("doc.txt", "short").unwrap();
        let first = text(d.dispatch("stream_file", &json!({"file": "doc.txt"}), &mut store).await);
        assert_eq!(first, "Reading doc.txt, part 1 of 1:\nshort");
        let second = text(d.dispatch("stream_file", &json!({"file": "doc.txt"}), &mut store).await);
        assert_eq!(second, "End of file reached for doc.txt.");
        assert_eq!(d.cursor().position("doc.txt"), 1);
    }
}
