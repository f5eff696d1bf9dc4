//! 脚本化 Mock（用于测试与离线运行，无需 API）
//!
//! `ScriptedLlmClient` 按首条 system 消息中的关键字匹配规则，依次弹出预设回复；
//! 队列只剩最后一条时重复返回它。没有匹配的规则时返回默认回复。
//! `StaticEmbedder` 为登记过的文本返回固定向量，其余文本报错。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{EmbeddingProvider, LlmClient};
use crate::memory::Message;

struct Rule {
    needle: String,
    replies: VecDeque<Result<String, String>>,
}

pub struct ScriptedLlmClient {
    rules: Mutex<Vec<Rule>>,
    default_reply: String,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            default_reply: default_reply.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn push(self, needle: &str, reply: Result<String, String>) -> Self {
        {
            let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
            match rules.iter_mut().find(|r| r.needle == needle) {
                Some(rule) => rule.replies.push_back(reply),
                None => rules.push(Rule {
                    needle: needle.to_string(),
                    replies: VecDeque::from([reply]),
                }),
            }
        }
        self
    }

    /// 首条消息包含 `needle` 时返回 `reply`（多次调用按登记顺序排队）
    pub fn on(self, needle: &str, reply: impl Into<String>) -> Self {
        self.push(needle, Ok(reply.into()))
    }

    /// 注入一次失败
    pub fn on_error(self, needle: &str, error: impl Into<String>) -> Self {
        self.push(needle, Err(error.into()))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// 所有调用收到的消息（按调用顺序）
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        let head = messages.first().map(|m| m.content.as_str()).unwrap_or("");
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        let Some(rule) = rules.iter_mut().find(|r| head.contains(&r.needle)) else {
            return Ok(self.default_reply.clone());
        };
        if rule.replies.len() > 1 {
            rule.replies
                .pop_front()
                .unwrap_or_else(|| Ok(self.default_reply.clone()))
        } else {
            rule.replies
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(self.default_reply.clone()))
        }
    }
}

/// 固定向量表嵌入
#[derive(Debug, Default, Clone)]
pub struct StaticEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

impl StaticEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.trim().to_string(), vector);
        self
    }
}

#[async_trait]
impl EmbeddingProvider for StaticEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        self.vectors
            .get(text.trim())
            .cloned()
            .ok_or_else(|| format!("no embedding registered for {:?}", text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rules_match_first_message_and_repeat_last() {
        let llm = ScriptedLlmClient::new("default")
            .on("planner", "first")
            .on("planner", "second");
        let msgs = vec![Message::system("you are the planner"), Message::user("go")];
        assert_eq!(llm.complete(&msgs).await.unwrap(), "first");
        assert_eq!(llm.complete(&msgs).await.unwrap(), "second");
        assert_eq!(llm.complete(&msgs).await.unwrap(), "second");
        assert_eq!(
            llm.complete(&[Message::system("other")]).await.unwrap(),
            "default"
        );
        assert_eq!(llm.call_count(), 4);
    }

    #[tokio::test]
    async fn test_injected_error() {
        let llm = ScriptedLlmClient::new("ok")
            .on_error("x", "boom")
            .on("x", "recovered");
        let msgs = [Message::system("x")];
        assert_eq!(llm.complete(&msgs).await.unwrap_err(), "boom");
        assert_eq!(llm.complete(&msgs).await.unwrap(), "recovered");
    }
}
