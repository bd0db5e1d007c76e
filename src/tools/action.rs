//! 类型化的动作：模型给出的 (name, args) 在解析阶段校验为 Action
//!
//! 同义词先折叠（write_file → write_to_file 等）；未知名称为 Unknown；缺少或类型不对的必填参数为 Error。

use serde::Deserialize;
use serde_json::Value;

/// 模型可调用的命令目录：(名称, 参数说明, 描述)，同时用于生成 prompt 中的命令列表
pub const COMMANDS: &[(&str, &str, &str)] = &[
    ("read_file", r#""file": "<file>""#, "Read a file from the workspace"),
    ("write_to_file", r#""file": "<file>", "text": "<text>""#, "Write text to a file, replacing it"),
    ("append_to_file", r#""file": "<file>", "text": "<text>""#, "Append text to a file"),
    ("delete_file", r#""file": "<file>""#, "Delete a file"),
    ("search_files", r#""directory": "<directory>""#, "List files in a workspace directory"),
    ("stream_file", r#""file": "<file>""#, "Read the next chunk of a large file"),
    ("merge_text_files", r#""folder": "<folder>", "output": "<file>""#, "Concatenate the .txt files of a folder"),
    ("execute_shell", r#""command_line": "<command>""#, "Run a single shell command in the workspace"),
    ("execute_python_file", r#""file": "<file>""#, "Run a Python file from the workspace"),
    ("clone_repository", r#""repository_url": "<url>", "clone_path": "<directory>""#, "Clone a git repository into the workspace"),
    ("browse_website", r#""url": "<url>", "question": "<what you want to find>""#, "Fetch a web page as text"),
    ("google", r#""input": "<search>""#, "Search the web"),
    ("memory_add", r#""string": "<text>""#, "Add text to long-term memory"),
    ("conversational_summary", r#""prompt": "<question>""#, "Answer a question from memory"),
    ("do_nothing", "", "Do nothing"),
    ("human_feedback", "", "Ask the user for input"),
    ("task_complete", r#""reason": "<reason>""#, "Shut down when the task is finished"),
];

/// 名称同义词折叠
pub fn normalize_synonym(name: &str) -> &str {
    match name {
        "write_file" | "create_file" => "write_to_file",
        "search" => "google",
        "run_shell" => "execute_shell",
        "merge_files" => "merge_text_files",
        other => other,
    }
}

/// 经过校验的动作（每种命令一个变体）
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "name", content = "args", rename_all = "snake_case")]
pub enum Action {
    ReadFile {
        file: String,
    },
    WriteToFile {
        file: String,
        text: String,
    },
    AppendToFile {
        file: String,
        text: String,
    },
    DeleteFile {
        file: String,
    },
    SearchFiles {
        #[serde(default)]
        directory: String,
    },
    StreamFile {
        #[serde(alias = "filename")]
        file: String,
    },
    MergeTextFiles {
        folder: String,
        output: String,
    },
    ExecuteShell {
        command_line: String,
    },
    ExecutePythonFile {
        file: String,
    },
    CloneRepository {
        repository_url: String,
        clone_path: Option<String>,
    },
    BrowseWebsite {
        url: Option<String>,
        #[serde(default)]
        question: String,
    },
    Google {
        input: String,
    },
    MemoryAdd {
        string: String,
    },
    ConversationalSummary {
        #[serde(default)]
        prompt: String,
    },
    DoNothing {},
    HumanFeedback {},
    TaskComplete {
        #[serde(default)]
        reason: String,
    },
    /// 参数缺失或类型错误
    #[serde(skip)]
    Error { message: String },
    /// 目录中没有的命令
    #[serde(skip)]
    Unknown { name: String },
}

impl Action {
    /// 从原始 (name, args) 构造：先折叠同义词，再按命令目录校验参数
    pub fn from_command(name: &str, args: &Value) -> Self {
        let name = normalize_synonym(name.trim());
        if !COMMANDS.iter().any(|(n, _, _)| *n == name) {
            return Action::Unknown {
                name: name.to_string(),
            };
        }
        let args = if args.is_object() {
            args.clone()
        } else {
            Value::Object(Default::default())
        };
        match serde_json::from_value(serde_json::json!({ "name": name, "args": args })) {
            Ok(action) => action,
            Err(e) => Action::Error {
                message: format!("invalid arguments for '{}': {}", name, e),
            },
        }
    }

    /// 规范化后的命令名
    pub fn name(&self) -> &str {
        match self {
            Action::ReadFile { .. } => "read_file",
            Action::WriteToFile { .. } => "write_to_file",
            Action::AppendToFile { .. } => "append_to_file",
            Action::DeleteFile { .. } => "delete_file",
            Action::SearchFiles { .. } => "search_files",
            Action::StreamFile { .. } => "stream_file",
            Action::MergeTextFiles { .. } => "merge_text_files",
            Action::ExecuteShell { .. } => "execute_shell",
            Action::ExecutePythonFile { .. } => "execute_python_file",
            Action::CloneRepository { .. } => "clone_repository",
            Action::BrowseWebsite { .. } => "browse_website",
            Action::Google { .. } => "google",
            Action::MemoryAdd { .. } => "memory_add",
            Action::ConversationalSummary { .. } => "conversational_summary",
            Action::DoNothing {} => "do_nothing",
            Action::HumanFeedback {} => "human_feedback",
            Action::TaskComplete { .. } => "task_complete",
            Action::Error { .. } => "Error:",
            Action::Unknown { name } => name,
        }
    }
}

/// 生成 prompt 中的命令列表（编号 + 名称 + 参数）
pub fn commands_prompt() -> String {
    COMMANDS
        .iter()
        .enumerate()
        .map(|(i, (name, args, desc))| {
            format!("{}. {}: \"{}\", args: {}", i + 1, desc, name, args)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_synonyms_fold_to_canonical_names() {
        let a = Action::from_command("create_file", &json!({"file": "a.txt", "text": "hi"}));
        assert_eq!(
            a,
            Action::WriteToFile {
                file: "a.txt".into(),
                text: "hi".into()
            }
        );
        assert_eq!(Action::from_command("search", &json!({"input": "rust"})).name(), "google");
        assert_eq!(
            Action::from_command("run_shell", &json!({"command_line": "ls"})).name(),
            "execute_shell"
        );
        assert_eq!(
            Action::from_command("merge_files", &json!({"folder": "d", "output": "o.txt"})).name(),
            "merge_text_files"
        );
    }

    #[test]
    fn test_missing_and_mistyped_fields_become_errors() {
        assert!(matches!(
            Action::from_command("read_file", &json!({})),
            Action::Error { .. }
        ));
        assert!(matches!(
            Action::from_command("write_to_file", &json!({"file": "a", "text": 3})),
            Action::Error { .. }
        ));
    }

    #[test]
    fn test_unknown_and_argless_commands() {
        assert_eq!(
            Action::from_command("fly_to_moon", &json!({})),
            Action::Unknown {
                name: "fly_to_moon".into()
            }
        );
        assert_eq!(Action::from_command("do_nothing", &Value::Null), Action::DoNothing {});
        assert_eq!(
            Action::from_command("browse_website", &json!({})),
            Action::BrowseWebsite {
                url: None,
                question: String::new()
            }
        );
    }

    #[test]
    fn test_commands_prompt_lists_every_command() {
        let p = commands_prompt();
        assert!(p.contains("\"task_complete\""));
        assert_eq!(p.lines().count(), COMMANDS.len());
    }
}
