//! 核心编排层：错误与恢复、会话状态、阶段路由、会话监管、运行时构建、主控流程

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod routing;
pub mod session_supervisor;
pub mod state;

pub use builder::{create_llm_from_config, default_knowledge, default_tool_registry, RuntimeBuilder};
pub use error::{AgentError, RecoveryAction};
pub use orchestrator::Orchestrator;
pub use recovery::RecoveryEngine;
pub use routing::{parse_stage, route};
pub use session_supervisor::{SessionSupervisor, TurnGuard};
pub use state::{Content, Session, SessionView, Stage, Turn, TurnRole};
