//! Planner：调用模型并解析能力请求
//!
//! `parse_llm_output` 判断模型回复是能力请求（`{"tool": ..., "args": {...}}`）还是最终回答。
//! 不含 `tool` 键的 JSON（例如行程 JSON）按最终回答处理；看起来像能力请求但 JSON 损坏时返回
//! `JsonParseError`，由循环发出格式纠正提示。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;
use crate::llm::{complete_within, LlmClient};
use crate::memory::Message;

/// 能力请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlannerOutput {
    Response(String),
    ToolCall(ToolCall),
}

/// 取出候选 JSON 片段：```json 围栏内容，或第一个 `{` 到最后一个 `}`
fn json_candidate(trimmed: &str) -> Option<&str> {
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

pub fn parse_llm_output(output: &str) -> Result<PlannerOutput, AgentError> {
    let trimmed = output.trim();
    let Some(json_str) = json_candidate(trimmed) else {
        if trimmed.contains('{') && trimmed.contains("\"tool\"") {
            return Err(AgentError::JsonParseError(format!("unterminated JSON: {trimmed}")));
        }
        return Ok(PlannerOutput::Response(trimmed.to_string()));
    };

    match serde_json::from_str::<Value>(json_str) {
        Ok(Value::Object(obj)) => match obj.get("tool").and_then(Value::as_str) {
            Some(tool) if !tool.trim().is_empty() => {
                let args = match obj.get("args") {
                    Some(Value::Object(m)) => Value::Object(m.clone()),
                    _ => Value::Object(Default::default()),
                };
                Ok(PlannerOutput::ToolCall(ToolCall {
                    tool: tool.trim().to_string(),
                    args,
                }))
            }
            _ => Ok(PlannerOutput::Response(trimmed.to_string())),
        },
        Ok(_) => Ok(PlannerOutput::Response(trimmed.to_string())),
        Err(e) if json_str.contains("\"tool\"") => Err(AgentError::JsonParseError(format!(
            "{}: {}",
            e, json_str
        ))),
        Err(_) => Ok(PlannerOutput::Response(trimmed.to_string())),
    }
}

/// 持有模型客户端与 system prompt；每次调用带超时
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    timeout: Duration,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// messages 已包含 system 前缀（由预算器组装）
    pub async fn plan(&self, messages: &[Message]) -> Result<String, AgentError> {
        complete_within(self.llm.as_ref(), messages, self.timeout).await
    }
}
