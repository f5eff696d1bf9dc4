//! 会话状态
//!
//! `Session` 是一次对话线程的完整状态（可序列化为检查点）；Turn 日志只追加。
//! `SessionView` 是一轮结束后交给调用方的投影：当前阶段、对应阶段的结果与本轮回复。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::Message;
use crate::schema::Record;

/// 对话阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Recommendation,
    Planner,
    Evaluator,
    Terminal,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Recommendation => "recommendation",
            Stage::Planner => "planner",
            Stage::Evaluator => "evaluator",
            Stage::Terminal => "terminal",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 阶段结果与模型回复：纯文本或结构化记录
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Content {
    Text(String),
    Structured(Record),
}

impl Content {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(t) => Some(t),
            Content::Structured(_) => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Content::Structured(r) => Some(r),
            Content::Text(_) => None,
        }
    }

    /// 渲染为文本（结构化记录输出为缩进 JSON）
    pub fn render(&self) -> String {
        match self {
            Content::Text(t) => t.clone(),
            Content::Structured(r) => r.to_pretty_text(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// 单条对话记录，写入后不再修改
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
}

impl Turn {
    pub fn to_message(&self) -> Message {
        match self.role {
            TurnRole::User => Message::user(self.content.clone()),
            TurnRole::Assistant => Message::assistant(self.content.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub thread_id: String,
    turns: Vec<Turn>,
    #[serde(default)]
    pub preferences: BTreeMap<String, String>,
    /// 原始阶段标签；从检查点读入时可能是任意字符串，路由对其是全函数
    #[serde(default)]
    pub current_stage: String,
    #[serde(default)]
    pub need_planning: bool,
    #[serde(default)]
    pub need_evaluation: bool,
    #[serde(default)]
    pub recommendation_result: Option<Content>,
    #[serde(default)]
    pub planner_result: Option<Content>,
    #[serde(default)]
    pub evaluation_result: Option<Content>,
    #[serde(default)]
    pub conversation_summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(thread_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            thread_id: thread_id.into(),
            turns: Vec::new(),
            preferences: BTreeMap::new(),
            current_stage: String::new(),
            need_planning: false,
            need_evaluation: false,
            recommendation_result: None,
            planner_result: None,
            evaluation_result: None,
            conversation_summary: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub(crate) fn push_turn(&mut self, role: TurnRole, content: impl Into<String>) {
        self.turns.push(Turn {
            role,
            content: content.into(),
        });
        self.updated_at = Utc::now();
    }

    /// 最近一条助手回复
    pub fn last_assistant_reply(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::Assistant)
            .map(|t| t.content.as_str())
    }

    /// 最近 n 条用户消息（按时间顺序）
    pub fn recent_user_messages(&self, n: usize) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .turns
            .iter()
            .rev()
            .filter(|t| t.role == TurnRole::User)
            .take(n)
            .map(|t| t.content.as_str())
            .collect();
        out.reverse();
        out
    }

    pub fn history_messages(&self) -> Vec<Message> {
        self.turns.iter().map(Turn::to_message).collect()
    }

    /// 合并非空偏好
    pub fn merge_preferences<I, K, V>(&mut self, prefs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in prefs {
            let v = v.into();
            if !v.trim().is_empty() {
                self.preferences.insert(k.into(), v);
            }
        }
    }

    /// 阶段对应的结果槽
    pub fn result_for(&self, stage: Stage) -> Option<&Content> {
        match stage {
            Stage::Recommendation => self.recommendation_result.as_ref(),
            Stage::Planner => self.planner_result.as_ref(),
            Stage::Evaluator => self.evaluation_result.as_ref(),
            Stage::Terminal => None,
        }
    }
}

/// 一轮结束后返回给调用方的投影
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionView {
    pub thread_id: String,
    pub current_stage: String,
    pub result: Option<Content>,
    pub reply: String,
}

impl SessionView {
    pub fn project(session: &Session, stage: Stage, reply: impl Into<String>) -> Self {
        Self {
            thread_id: session.thread_id.clone(),
            current_stage: session.current_stage.clone(),
            result: session.result_for(stage).cloned(),
            reply: reply.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_log_and_lookups() {
        let mut s = Session::new("t1");
        s.push_turn(TurnRole::User, "a");
        s.push_turn(TurnRole::Assistant, "b");
        s.push_turn(TurnRole::User, "c");
        assert_eq!(s.turns().len(), 3);
        assert_eq!(s.last_assistant_reply(), Some("b"));
        assert_eq!(s.recent_user_messages(2), vec!["a", "c"]);
        assert_eq!(s.recent_user_messages(1), vec!["c"]);
    }

    #[test]
    fn test_merge_preferences_skips_empty() {
        let mut s = Session::new("t1");
        s.merge_preferences([("location", "台中"), ("date", "  ")]);
        assert_eq!(s.preferences.get("location").map(String::as_str), Some("台中"));
        assert!(!s.preferences.contains_key("date"));
    }

    #[test]
    fn test_session_json_roundtrip_keeps_unknown_stage() {
        let mut s = Session::new("t1");
        s.current_stage = "Weird-Stage".into();
        s.planner_result = Some(Content::Text("plan".into()));
        let text = serde_json::to_string(&s).unwrap();
        let back: Session = serde_json::from_str(&text).unwrap();
        assert_eq!(back, s);
    }
}
