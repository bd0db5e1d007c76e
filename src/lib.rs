//! Drone - Rust 自主智能体
//!
//! 模块划分：
//! - **agent**: 会话装配（LLM / 嵌入后端选择、system prompt、续接进度）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与控制循环状态
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）与嵌入提供方
//! - **memory**: 对话历史、持久化向量记忆、token 预算
//! - **react**: Planner、人工授权、重复检测、控制循环
//! - **tools**: 命令校验与分发，以及文件、shell、Web、git 等能力

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod react;
pub mod tools;

pub use agent::build_control_loop;
pub use react::ControlLoop;
