//! 工具层：动作校验、命令分发与各项能力（文件、shell、Web、git、记忆问答）

pub mod action;
pub mod dispatcher;
pub mod executor;
pub mod filesystem;
pub mod git;
pub mod schema;
pub mod search;
pub mod shell;
pub mod summary;

pub use action::{commands_prompt, normalize_synonym, Action, COMMANDS};
pub use dispatcher::{CommandDispatcher, DispatchOutcome, ToolOutput, NO_URL_IN_MEMORY, URL_PLACEHOLDER};
pub use executor::ToolExecutor;
pub use filesystem::{split_chunks, FileCursor, SafeFs};
pub use schema::response_schema_json;
pub use search::{SearchHit, WebClient};
pub use shell::ShellRunner;
pub use summary::{conversational_answer, summary_messages};
