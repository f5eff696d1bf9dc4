//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / 脚本化 Mock）实现 LlmClient，运行时只依赖这一接口。

use std::time::Duration;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::memory::Message;

/// 语言模型客户端：给定按顺序排列的消息，返回一段文本。
/// 失败以字符串描述返回，由调用方映射为 `AgentError::LlmError`。
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 带超时的模型调用：超时映射为 NetworkTimeout，其余失败映射为 LlmError
pub async fn complete_within(
    llm: &dyn LlmClient,
    messages: &[Message],
    timeout: Duration,
) -> Result<String, AgentError> {
    match tokio::time::timeout(timeout, llm.complete(messages)).await {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(AgentError::LlmError(e)),
        Err(_) => Err(AgentError::NetworkTimeout),
    }
}
