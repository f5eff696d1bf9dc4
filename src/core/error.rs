//! 运行时错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 RetryTurn / ShortenContext / Abort。
//! 组件内部可恢复的情况（解析失败、工具失败、重复回复）不会走到这里，只有资源耗尽类错误才向上传播。

use thiserror::Error;

/// 运行过程中可能向调用方传播的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Network timeout")]
    NetworkTimeout,

    /// 模型调用本身失败（端点不可达、鉴权失败等）
    #[error("LLM error: {0}")]
    LlmError(String),

    /// 固定前缀（system + 上下文块）已超出 token 上限，调用方应缩短上下文块
    #[error("Token budget exhausted: fixed prefix needs {required} tokens, ceiling is {ceiling}")]
    BudgetExhausted { required: usize, ceiling: usize },

    #[error("Cancelled")]
    Cancelled,

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Hallucinated tool: {0}")]
    HallucinatedTool(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    /// 整轮重试次数用尽
    #[error("Turn failed after {attempts} attempts: {last}")]
    TurnFailed { attempts: usize, last: Box<AgentError> },
}

impl AgentError {
    /// 传输类错误（模型不可达 / 超时），整轮可重试
    pub fn is_transport(&self) -> bool {
        matches!(self, AgentError::LlmError(_) | AgentError::NetworkTimeout)
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 丢弃本次尝试的全部修改，从已提交的会话状态重跑整轮
    RetryTurn,
    /// 缩短上下文块后重新组装 prompt
    ShortenContext,
    /// 终止当前轮，向用户报告
    Abort,
}
