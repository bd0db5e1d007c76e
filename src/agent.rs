//! 会话装配
//!
//! 从 AppConfig 构建控制循环：选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）与嵌入后端、
//! 打开记忆文件、组装 system prompt（角色与目标、约束、命令列表、回复格式 Schema），
//! 并把上次未完成的 in-progress 记忆接到 prompt 末尾。

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::{
    create_embedder_from_config, LlmClient, MockLlmClient, OpenAiClient, DEEPSEEK_BASE_URL,
    DEEPSEEK_CHAT,
};
use crate::memory::{MemoryStore, TAG_IN_PROGRESS};
use crate::react::{ControlLoop, HumanInput, LoopSettings, Planner};
use crate::tools::{commands_prompt, response_schema_json, CommandDispatcher, SafeFs};

/// 续接时取最近的 in-progress 条数
const RESUME_ENTRIES: usize = 5;
const RESUME_ENTRY_CHARS: usize = 500;

const CONSTRAINTS: &[&str] = &[
    "~4000 word limit for short term memory. Your short term memory is short, so immediately save important information to files.",
    "If you are unsure how you previously did something or want to recall past events, thinking about similar events will help you remember.",
    "No user assistance unless you ask for it with the human_feedback command.",
    "Exclusively use the commands listed in double quotes e.g. \"command name\".",
];

/// 按配置与环境变量选择 LLM：有 DeepSeek Key（或 provider=deepseek 且有 OpenAI Key）走 DeepSeek，
/// 有 OpenAI Key 走 OpenAI 兼容端点，否则使用 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let deepseek_key = std::env::var("DEEPSEEK_API_KEY").ok();
    let openai_key = std::env::var("OPENAI_API_KEY").ok();
    let use_deepseek = deepseek_key.is_some() || (provider == "deepseek" && openai_key.is_some());
    let use_openai = openai_key.is_some() && provider != "deepseek";

    if use_deepseek {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());
        tracing::info!("Using DeepSeek LLM ({})", model);
        let key = deepseek_key.or(openai_key);
        Arc::new(OpenAiClient::new(Some(DEEPSEEK_BASE_URL), &model, key.as_deref()))
    } else if use_openai {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        tracing::info!("Using OpenAI LLM ({})", model);
        Arc::new(OpenAiClient::new(cfg.llm.base_url.as_deref(), &model, openai_key.as_deref()))
    } else {
        tracing::warn!("No API key set, using Mock LLM");
        Arc::new(MockLlmClient::new())
    }
}

/// 基础 system prompt
pub fn build_prompt(cfg: &AppConfig) -> String {
    let agent = &cfg.agent;
    let mut prompt = format!(
        "You are {}, {}\nYour decisions must always be made independently without seeking user assistance. \
         Play to your strengths as an LLM and pursue simple strategies with no legal complications.\n\nGOALS:\n\n",
        agent.ai_name, agent.ai_role
    );
    for (i, goal) in agent.ai_goals.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, goal));
    }
    prompt.push_str("\nConstraints:\n");
    for (i, c) in CONSTRAINTS.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, c));
    }
    prompt.push_str("\nCommands:\n");
    prompt.push_str(&commands_prompt());
    prompt.push_str(
        "\n\nYou should only respond in JSON format as described below\nResponse Format JSON Schema:\n",
    );
    prompt.push_str(&response_schema_json());
    prompt.push_str("\nEnsure the response can be parsed by a standard JSON parser.");
    prompt
}

/// 最近几条 in-progress 记忆（各截断），用于会话开始时续接
pub fn resume_section(memory: &MemoryStore) -> Option<String> {
    let pending = memory.search(&[TAG_IN_PROGRESS]);
    if pending.is_empty() {
        return None;
    }
    let start = pending.len().saturating_sub(RESUME_ENTRIES);
    let body = pending[start..]
        .iter()
        .map(|e| e.content.chars().take(RESUME_ENTRY_CHARS).collect::<String>())
        .collect::<Vec<_>>()
        .join("\n---\n");
    Some(format!("Previous progress (truncated):\n{}", body))
}

/// 工作区根目录：配置 > 当前目录下的 workspace
pub fn workspace_root(cfg: &AppConfig) -> PathBuf {
    cfg.app
        .workspace_root
        .clone()
        .unwrap_or_else(|| PathBuf::from("workspace"))
}

/// 装配完整的控制循环（使用配置选出的 LLM 与嵌入后端）
pub fn build_control_loop(
    cfg: &AppConfig,
    input: Box<dyn HumanInput>,
) -> Result<ControlLoop, AgentError> {
    let llm = create_llm_from_config(cfg);
    let embedder = create_embedder_from_config(
        cfg.embedding.enabled,
        cfg.embedding.base_url.as_deref(),
        &cfg.embedding.model,
        None,
    );
    let memory = MemoryStore::open(cfg.memory.file_path(), embedder, cfg.memory.store_options());
    assemble(cfg, llm, memory, input)
}

/// 用给定的 LLM 与记忆存储装配控制循环
pub fn assemble(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    memory: MemoryStore,
    input: Box<dyn HumanInput>,
) -> Result<ControlLoop, AgentError> {
    let fs = SafeFs::new(workspace_root(cfg))?;
    let dispatcher = CommandDispatcher::new(fs, llm.clone(), &cfg.tools);
    let planner = Planner::new(llm, cfg.llm.token_limit);

    let mut prompt = build_prompt(cfg);
    if let Some(resume) = resume_section(&memory) {
        tracing::info!("resuming from in-progress memory");
        prompt.push_str("\n\n");
        prompt.push_str(&resume);
    }
    tracing::info!(entries = memory.len(), "session assembled");

    Ok(ControlLoop::new(
        planner,
        dispatcher,
        memory,
        input,
        LoopSettings::from_config(cfg),
        prompt,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashingEmbedder;
    use crate::memory::StoreOptions;

    #[test]
    fn test_prompt_contains_goals_commands_and_schema() {
        let mut cfg = AppConfig::default();
        cfg.agent.ai_goals = vec!["Write an essay about bees".into()];
        let p = build_prompt(&cfg);
        assert!(p.starts_with("You are Drone,"));
        assert!(p.contains("1. Write an essay about bees"));
        assert!(p.contains("\"read_file\""));
        assert!(p.contains("Response Format JSON Schema"));
    }

    #[test]
    fn test_resume_section_takes_latest_five_in_progress() {
        let mut store = MemoryStore::in_memory(
            Arc::new(HashingEmbedder::new(16)),
            StoreOptions {
                save_on_every_action: false,
                ..StoreOptions::default()
            },
        );
        assert!(resume_section(&store).is_none());
        for i in 0..7 {
            store
                .add(&format!("draft part {}", i), ["action", "in-progress"], None)
                .unwrap();
        }
        store.add(&"y".repeat(900), ["in-progress"], None).unwrap();
        let s = resume_section(&store).unwrap();
        assert!(s.starts_with("Previous progress (truncated):"));
        assert!(!s.contains("draft part 2"));
        assert!(s.contains("draft part 3"));
        assert!(!s.contains(&"y".repeat(501)));
    }
}
