//! 控制循环
//!
//! 每轮：主动召回 → （对话覆盖则直接回答）→ 调用模型 → 解析并校验命令 → 人工授权或自动授权 →
//! 重复检测 → 分发执行 → 写入记忆 → 结果写回历史 → 轮后钩子。
//! 单轮内的模型、解析、工具失败都折叠为本轮结果文本；只有退出、任务完成或连续模式轮数上限会结束会话。

use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::AppConfig;
use crate::core::{LoopPhase, LoopSnapshot, Termination};
use crate::llm::TokenStream;
use crate::memory::entry::mentions_long_task;
use crate::memory::{
    ConversationMemory, MemoryStore, Message, TAG_ACTION, TAG_ESSAY, TAG_IN_PROGRESS,
};
use crate::react::approval::{parse_approval, ApprovalDecision, HumanInput, APPROVAL_PROMPT};
use crate::react::guard::{ActionSignature, RepetitionGuard, GUARD_THRESHOLD, LOOP_DETECTED_MESSAGE};
use crate::react::planner::{parse_command, ParsedCommand, Planner};
use crate::react::LoopEvent;
use crate::tools::{conversational_answer, Action, CommandDispatcher, DispatchOutcome, ToolOutput};

/// 会话开始时的人类输入
pub const INITIAL_USER_INPUT: &str =
    "Determine which next command to use, and respond using the format specified above:";
/// 授权后交给模型的指令
pub const NEXT_COMMAND_DIRECTIVE: &str = "GENERATE NEXT COMMAND JSON";
pub const PROACTIVE_SEARCH_HINT: &str = "SEARCH_WEB_PROACTIVELY";
pub const PLAN_AHEAD_HINT: &str = "Plan your next steps carefully before acting.";
pub const UNABLE_TO_EXECUTE: &str = "Unable to execute command";

/// 主动召回的标签
const RECALL_TAGS: [&str; 4] = ["action", "essay", "code", "research"];
const RECALL_LIMIT: usize = 5;
const RECALL_ENTRY_CHARS: usize = 500;

/// 人类输入这些短语时视为任务结束
const FINISH_PHRASES: [&str; 2] = ["essay complete", "finish task"];

/// 控制循环的行为开关（从 AppConfig 各段汇总）
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub ai_name: String,
    pub continuous_mode: bool,
    /// 0 表示不限
    pub continuous_limit: usize,
    pub recall_before_task: bool,
    pub auto_tag_done: bool,
    pub essay_tagging: bool,
    pub auto_tag_in_progress: bool,
    pub proactive_search: bool,
    pub plan_ahead: bool,
    pub max_context_turns: usize,
}

impl LoopSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            ai_name: cfg.agent.ai_name.clone(),
            continuous_mode: cfg.agent.continuous_mode,
            continuous_limit: cfg.agent.continuous_limit,
            recall_before_task: cfg.memory.recall_before_task,
            auto_tag_done: cfg.memory.auto_tag_done,
            essay_tagging: cfg.essay.in_progress_tagging,
            auto_tag_in_progress: cfg.memory.auto_tag_in_progress,
            proactive_search: cfg.browsing.enable_browsing && cfg.browsing.proactive_search,
            plan_ahead: cfg.behavior.plan_ahead,
            max_context_turns: cfg.app.max_context_turns,
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

fn send_event(tx: &Option<UnboundedSender<LoopEvent>>, ev: LoopEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

/// 逐块输出流，以换行拼接；流中出错时附上错误并停止
async fn drain_stream(tx: &Option<UnboundedSender<LoopEvent>>, mut stream: TokenStream) -> String {
    let mut chunks = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => {
                send_event(tx, LoopEvent::OutputChunk { text: chunk.clone() });
                chunks.push(chunk);
            }
            Err(e) => {
                chunks.push(format!("Error: {}", e));
                break;
            }
        }
    }
    chunks.join("\n")
}

fn cap_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// 控制循环：持有 Planner、分发器、记忆存储与人类输入源
pub struct ControlLoop {
    planner: Planner,
    dispatcher: CommandDispatcher,
    memory: MemoryStore,
    input: Box<dyn HumanInput>,
    settings: LoopSettings,
    prompt: String,
    history: ConversationMemory,
    human_input: String,
    turn_count: usize,
    pending_action_budget: u32,
    guard: RepetitionGuard,
    conversational_override_active: bool,
    phase: LoopPhase,
    plan_ahead_applied: bool,
    event_tx: Option<UnboundedSender<LoopEvent>>,
}

impl ControlLoop {
    pub fn new(
        planner: Planner,
        dispatcher: CommandDispatcher,
        memory: MemoryStore,
        input: Box<dyn HumanInput>,
        settings: LoopSettings,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            history: ConversationMemory::new(settings.max_context_turns),
            planner,
            dispatcher,
            memory,
            input,
            settings,
            prompt: prompt.into(),
            human_input: INITIAL_USER_INPUT.to_string(),
            turn_count: 0,
            pending_action_budget: 0,
            guard: RepetitionGuard::new(),
            conversational_override_active: false,
            phase: LoopPhase::AwaitingModelTurn,
            plan_ahead_applied: false,
            event_tx: None,
        }
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<LoopEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn snapshot(&self) -> LoopSnapshot {
        LoopSnapshot {
            phase: self.phase,
            turn_count: self.turn_count,
            pending_action_budget: self.pending_action_budget,
            conversational_override_active: self.conversational_override_active,
            history_len: self.history.len(),
        }
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn history(&self) -> &[Message] {
        self.history.messages()
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn human_input(&self) -> &str {
        &self.human_input
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// 运行直到会话结束
    pub async fn run(&mut self) -> Termination {
        tracing::info!(ai_name = %self.settings.ai_name, continuous = self.settings.continuous_mode, "control loop started");
        loop {
            if let Some(termination) = self.step().await {
                self.phase = LoopPhase::Terminated;
                tracing::info!(turns = self.turn_count, ?termination, "control loop terminated");
                send_event(
                    &self.event_tx,
                    LoopEvent::Terminated {
                        termination: termination.clone(),
                    },
                );
                return termination;
            }
        }
    }

    /// 执行一轮；返回 Some 表示会话结束
    pub async fn step(&mut self) -> Option<Termination> {
        self.turn_count += 1;
        let turn = self.turn_count;
        if self.settings.continuous_mode
            && self.settings.continuous_limit > 0
            && turn > self.settings.continuous_limit
        {
            tracing::info!(limit = self.settings.continuous_limit, "continuous limit reached");
            return Some(Termination::TurnLimit {
                limit: self.settings.continuous_limit,
            });
        }
        send_event(&self.event_tx, LoopEvent::TurnStarted { turn });

        let turn_prompt = self.turn_prompt();

        if self.conversational_override_active {
            self.answer_human().await;
            return None;
        }

        // 模型
        self.phase = LoopPhase::AwaitingModelTurn;
        send_event(&self.event_tx, LoopEvent::Thinking);
        let planned = self
            .planner
            .next_reply(&turn_prompt, &self.human_input, self.history.messages(), &self.memory)
            .await;
        let (reply, command) = match planned {
            Ok(reply) => {
                self.history.push(Message::user(self.human_input.clone()));
                self.history.push(Message::assistant(reply.clone()));
                self.phase = LoopPhase::ParsingAction;
                let command = parse_command(&reply);
                (reply, command)
            }
            Err(e) => {
                tracing::warn!(turn, "model call failed: {}", e);
                (String::new(), ParsedCommand::error(e.to_string()))
            }
        };
        if let Some(thoughts) = &command.thoughts {
            send_event(
                &self.event_tx,
                LoopEvent::Thoughts {
                    thoughts: thoughts.clone(),
                },
            );
        }
        send_event(
            &self.event_tx,
            LoopEvent::NextAction {
                name: command.name.clone(),
                args: command.args.clone(),
            },
        );
        tracing::debug!(turn, command = %command.name, "next action");

        // 授权
        let auto_approved = if !self.settings.continuous_mode && self.pending_action_budget == 0 {
            self.phase = LoopPhase::AwaitingApproval;
            match self.ask_approval().await {
                Gate::Approved => {}
                Gate::Exit => return Some(Termination::HumanExit),
                Gate::Deferred => return None,
            }
            send_event(
                &self.event_tx,
                LoopEvent::Authorised {
                    auto: false,
                    remaining: self.pending_action_budget,
                },
            );
            false
        } else {
            self.phase = LoopPhase::AutoApproved;
            !self.settings.continuous_mode
        };

        // 执行
        self.phase = LoopPhase::Dispatching;
        let canonical = command
            .action
            .as_ref()
            .map(|a| a.name().to_string())
            .unwrap_or_else(|| command.name.clone());
        let mut shutdown = None;
        let result = match command.action.clone() {
            None => format!(
                "Command {} threw the following error: {}",
                command.name,
                command.error_message()
            ),
            Some(Action::HumanFeedback {}) => format!("Human feedback: {}", self.human_input),
            Some(action) => {
                self.guard_repetition(&canonical, &command.args);
                let outcome = self
                    .dispatcher
                    .dispatch_action(action, &command.args, &mut self.memory)
                    .await;
                if auto_approved {
                    self.pending_action_budget = self.pending_action_budget.saturating_sub(1);
                    send_event(
                        &self.event_tx,
                        LoopEvent::Authorised {
                            auto: true,
                            remaining: self.pending_action_budget,
                        },
                    );
                }
                match outcome {
                    DispatchOutcome::Output(ToolOutput::Text(text)) => text,
                    DispatchOutcome::Output(ToolOutput::Stream(stream)) => {
                        drain_stream(&self.event_tx, stream).await
                    }
                    DispatchOutcome::Shutdown { reason } => {
                        let text = format!("Shutting down: {}", reason);
                        shutdown = Some(reason);
                        text
                    }
                }
            }
        };

        // 记忆
        self.phase = LoopPhase::Recording;
        self.record(turn, &reply, &result, &canonical);

        // 历史
        let system_text = if result.is_empty() {
            UNABLE_TO_EXECUTE.to_string()
        } else {
            result
        };
        send_event(
            &self.event_tx,
            LoopEvent::SystemResult {
                text: system_text.clone(),
            },
        );
        self.history.push(Message::system(system_text));

        self.post_turn_hooks();

        shutdown.map(|reason| Termination::TaskComplete { reason })
    }

    /// 本轮 system prompt：开启主动召回时在基础 prompt 后追加最近的相关记忆（基础 prompt 不变）
    fn turn_prompt(&self) -> String {
        if !self.settings.recall_before_task {
            return self.prompt.clone();
        }
        let recalled = self.memory.search(&RECALL_TAGS);
        let start = recalled.len().saturating_sub(RECALL_LIMIT);
        let blocks: Vec<String> = recalled[start..]
            .iter()
            .map(|e| format!("\n---\nMemory Recall:\n{}", cap_chars(&e.content, RECALL_ENTRY_CHARS)))
            .collect();
        if blocks.is_empty() {
            return self.prompt.clone();
        }
        tracing::debug!(entries = blocks.len(), "proactively recalled memory");
        send_event(
            &self.event_tx,
            LoopEvent::Recall {
                entries: blocks.len(),
            },
        );
        format!("{}\n{}", self.prompt, blocks.join("\n"))
    }

    /// 对话覆盖轮：从记忆回答人类的提问，不执行命令、不写记忆
    async fn answer_human(&mut self) {
        let question = std::mem::replace(&mut self.human_input, NEXT_COMMAND_DIRECTIVE.to_string());
        self.conversational_override_active = false;
        send_event(&self.event_tx, LoopEvent::Thinking);
        let answer = match conversational_answer(self.planner.llm(), &self.memory, &question).await {
            Ok(stream) => drain_stream(&self.event_tx, stream).await,
            Err(e) => {
                tracing::warn!("conversational answer failed: {}", e);
                format!("Error generating conversational answer: {}", e)
            }
        };
        send_event(&self.event_tx, LoopEvent::Answer { text: answer });
    }

    /// 询问人类直到得到合法输入
    async fn ask_approval(&mut self) -> Gate {
        self.human_input.clear();
        loop {
            let Some(line) = self.input.read_line(APPROVAL_PROMPT).await else {
                tracing::info!("input closed, exiting");
                return Gate::Exit;
            };
            match parse_approval(&line) {
                Ok(ApprovalDecision::ApproveOnce) => {
                    self.human_input = NEXT_COMMAND_DIRECTIVE.to_string();
                    return Gate::Approved;
                }
                Ok(ApprovalDecision::ApproveN(n)) => {
                    self.pending_action_budget = n;
                    self.human_input = NEXT_COMMAND_DIRECTIVE.to_string();
                    return Gate::Approved;
                }
                Ok(ApprovalDecision::Exit) => return Gate::Exit,
                Ok(ApprovalDecision::Feedback(text)) => {
                    tracing::debug!("human question, deferring proposed action");
                    self.human_input = text;
                    self.conversational_override_active = true;
                    return Gate::Deferred;
                }
                Err(e) => {
                    tracing::warn!("{}", e);
                    continue;
                }
            }
        }
    }

    fn guard_repetition(&mut self, name: &str, args: &serde_json::Value) {
        let count = self.guard.record(ActionSignature::new(name, args));
        if count >= GUARD_THRESHOLD {
            tracing::warn!(command = %name, count, "repeated command detected");
            self.history.push(Message::system(LOOP_DETECTED_MESSAGE));
            send_event(
                &self.event_tx,
                LoopEvent::Repetition {
                    name: name.to_string(),
                    count,
                },
            );
        }
    }

    /// 写入本轮记录；存储错误只记日志
    fn record(&mut self, turn: usize, reply: &str, result: &str, command: &str) {
        let mut tags = vec![TAG_ACTION];
        if self.settings.essay_tagging && mentions_long_task(&self.prompt) {
            tags.push(TAG_ESSAY);
            if self.settings.auto_tag_in_progress {
                tags.push(TAG_IN_PROGRESS);
            }
        }
        let content = format!(
            "Assistant Reply: {}\nResult: {}\nHuman Feedback: {}",
            reply, result, self.human_input
        );
        let id = format!("action_{}_{}", turn, Utc::now().timestamp());
        match self.memory.add(&content, tags, Some(id)) {
            Ok(Some(entry)) => tracing::debug!(id = %entry.id, "turn recorded"),
            Ok(None) => tracing::debug!("turn not recorded (error report)"),
            Err(e) => tracing::warn!("failed to record turn: {}", e),
        }

        let input = self.human_input.trim().to_lowercase();
        let finished = command == "task_complete" || FINISH_PHRASES.contains(&input.as_str());
        if finished && self.settings.auto_tag_done {
            match self.memory.mark_done(&[TAG_IN_PROGRESS]) {
                Ok(n) => tracing::info!(entries = n, "in-progress entries marked done"),
                Err(e) => tracing::warn!("mark_done failed: {}", e),
            }
            if let Err(e) = self.memory.save() {
                tracing::warn!("memory save failed: {}", e);
            }
        }
    }

    fn post_turn_hooks(&mut self) {
        if self.settings.proactive_search && !self.human_input.contains(PROACTIVE_SEARCH_HINT) {
            self.human_input.push('\n');
            self.human_input.push_str(PROACTIVE_SEARCH_HINT);
        }
        if self.settings.plan_ahead && !self.plan_ahead_applied {
            self.prompt.push('\n');
            self.prompt.push_str(PLAN_AHEAD_HINT);
            self.plan_ahead_applied = true;
        }
    }
}

/// 授权结果
enum Gate {
    Approved,
    Exit,
    /// 人类提问，本轮命令作废
    Deferred,
}
