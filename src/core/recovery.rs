//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供编排器决定整轮重试、缩短上下文还是终止。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default, Clone)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::LlmError(_) | AgentError::NetworkTimeout => RecoveryAction::RetryTurn,
            AgentError::BudgetExhausted { .. } => RecoveryAction::ShortenContext,
            // 工具类错误应已在 Agent 循环内被吸收；漏到这里说明是编排层问题，不重试
            AgentError::ToolExecutionFailed(_)
            | AgentError::ToolTimeout(_)
            | AgentError::HallucinatedTool(_)
            | AgentError::JsonParseError(_) => RecoveryAction::Abort,
            AgentError::Cancelled => RecoveryAction::Abort,
            _ => RecoveryAction::Abort,
        }
    }
}
