//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DRONE__*` 覆盖（双下划线表示嵌套，如 `DRONE__AGENT__CONTINUOUS_MODE=true`）。
//! 配置以值的形式传给各组件，没有进程级单例。

use std::path::PathBuf;

use serde::Deserialize;

use crate::memory::StoreOptions;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub embedding: EmbeddingSection,
    pub memory: MemorySection,
    pub agent: AgentSection,
    pub essay: EssaySection,
    pub browsing: BrowsingSection,
    pub behavior: BehaviorSection,
    pub tools: ToolsSection,
}

/// [app] 段：应用名、工作目录、对话历史上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 工具的沙箱根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    /// 对话历史保留轮数
    pub max_context_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            workspace_root: None,
            max_context_turns: 50,
        }
    }
}

/// [llm] 段：后端选择与 token 预算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai；优先级由 API Key 与 provider 共同决定
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 单次请求的 token 预算（system + 历史）
    pub token_limit: usize,
    pub deepseek: LlmModelSection,
    pub openai: LlmModelSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            token_limit: 4000,
            deepseek: LlmModelSection::default(),
            openai: LlmModelSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmModelSection {
    pub model: Option<String>,
}

/// [embedding] 段：是否启用远端嵌入
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    pub enabled: bool,
    pub model: String,
    pub base_url: Option<String>,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "text-embedding-ada-002".to_string(),
            base_url: None,
        }
    }
}

/// [memory] 段：记忆文件与容量上限、标签生命周期
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// 记忆文件名（不含 .json）
    pub index: String,
    pub max_entries: usize,
    pub max_content_chars: usize,
    pub max_file_bytes: usize,
    pub eviction_batch: usize,
    pub dedup_window: usize,
    pub save_on_every_action: bool,
    pub auto_tag_in_progress: bool,
    /// 任务完成时将 in-progress 改为 done
    pub auto_tag_done: bool,
    /// 每轮调用模型前主动召回相关记忆
    pub recall_before_task: bool,
}

impl Default for MemorySection {
    fn default() -> Self {
        let store = StoreOptions::default();
        Self {
            index: "auto-gpt".to_string(),
            max_entries: store.max_entries,
            max_content_chars: store.max_content_chars,
            max_file_bytes: store.max_file_bytes,
            eviction_batch: store.eviction_batch,
            dedup_window: store.dedup_window,
            save_on_every_action: store.save_on_every_action,
            auto_tag_in_progress: store.auto_tag_in_progress,
            auto_tag_done: true,
            recall_before_task: false,
        }
    }
}

impl MemorySection {
    /// 记忆文件路径：{index}.json
    pub fn file_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.json", self.index))
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            max_entries: self.max_entries,
            max_content_chars: self.max_content_chars,
            max_file_bytes: self.max_file_bytes,
            eviction_batch: self.eviction_batch,
            dedup_window: self.dedup_window,
            save_on_every_action: self.save_on_every_action,
            auto_tag_in_progress: self.auto_tag_in_progress,
        }
    }
}

/// [agent] 段：连续模式与轮数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub ai_name: String,
    pub ai_role: String,
    /// 任务目标（逐条写入 system prompt）
    pub ai_goals: Vec<String>,
    /// 连续模式：不询问人类，自动执行
    pub continuous_mode: bool,
    /// 连续模式下的最大轮数（0 表示不限）
    pub continuous_limit: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            ai_name: "Drone".to_string(),
            ai_role: "an AI designed to autonomously carry out tasks with the tools available".to_string(),
            ai_goals: Vec::new(),
            continuous_mode: false,
            continuous_limit: 0,
        }
    }
}

/// [essay] 段：长篇任务的标签策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EssaySection {
    pub in_progress_tagging: bool,
}

impl Default for EssaySection {
    fn default() -> Self {
        Self {
            in_progress_tagging: true,
        }
    }
}

/// [browsing] 段：主动搜索提示
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BrowsingSection {
    pub enable_browsing: bool,
    pub proactive_search: bool,
}

/// [behavior] 段：行为修饰
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BehaviorSection {
    /// 每轮结束后提示模型先规划再行动
    pub plan_ahead: bool,
}

/// [tools] 段：工具超时、Shell 开关、Web 抓取与搜索、Git 凭据
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 是否允许执行本地 shell / python
    pub execute_local_commands: bool,
    pub shell: ShellSection,
    pub search: SearchSection,
    pub github: GithubSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 60,
            execute_local_commands: false,
            shell: ShellSection::default(),
            search: SearchSection::default(),
            github: GithubSection::default(),
        }
    }
}

/// [tools.shell] 段：额外禁止的子串（与内置黑名单合并）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ShellSection {
    pub forbidden_patterns: Vec<String>,
}

/// [tools.search] 段：抓取超时、最大字符数、域名白名单（空表示不限制）、搜索结果条数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub timeout_secs: u64,
    pub max_result_chars: usize,
    pub allowed_domains: Vec<String>,
    pub num_results: usize,
    /// 存放 Brave Search 订阅令牌的环境变量名
    pub brave_token_env: String,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_result_chars: 8000,
            allowed_domains: Vec::new(),
            num_results: 8,
            brave_token_env: "BRAVE_SUBSCRIPTION_TOKEN".to_string(),
        }
    }
}

/// [tools.github] 段：clone_repository 使用的凭据
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GithubSection {
    pub username: Option<String>,
    pub api_key: Option<String>,
}

/// 从 config 目录加载配置，环境变量 DRONE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DRONE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DRONE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_store_options() {
        let cfg = AppConfig::default();
        let opts = cfg.memory.store_options();
        assert_eq!(opts.eviction_batch, 10);
        assert_eq!(opts.dedup_window, 50);
        assert!(opts.save_on_every_action);
        assert_eq!(cfg.memory.file_path(), PathBuf::from("auto-gpt.json"));
        assert!(!cfg.agent.continuous_mode);
        assert!(!cfg.tools.execute_local_commands);
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[agent]\ncontinuous_mode = true\ncontinuous_limit = 5\n\n[memory]\nindex = \"notes\"\nmax_entries = 20\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert!(cfg.agent.continuous_mode);
        assert_eq!(cfg.agent.continuous_limit, 5);
        assert_eq!(cfg.memory.max_entries, 20);
        assert_eq!(cfg.memory.eviction_batch, 10);
        assert_eq!(cfg.memory.file_path(), PathBuf::from("notes.json"));
    }
}
