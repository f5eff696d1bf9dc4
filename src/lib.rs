//! Tripmate - 多智能体旅游规划助手的编排运行时
//!
//! 模块划分：
//! - **agent**: 运行时上下文（模型、嵌入、Tokenizer、知识库、能力、检查点、配置）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 会话状态、阶段路由、错误恢复、会话监管、编排器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / 脚本化 Mock）与嵌入
//! - **memory**: Token 预算、prompt 组装、知识检索、重复检测、检查点持久化
//! - **react**: 有界能力循环（Planner、循环、过程事件）
//! - **schema**: 从模型文本恢复结构化记录
//! - **stages**: 推荐 / 规划 / 评估阶段与回复处理
//! - **tools**: 能力注册表、执行器与旅行能力（预算、天气、地名标准化）

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod schema;
pub mod stages;
pub mod tools;

pub use agent::RuntimeContext;
pub use core::{AgentError, Orchestrator, RuntimeBuilder, SessionView};
