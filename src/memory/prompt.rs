//! Prompt 组装
//!
//! 固定前缀 = 系统指令 + 上下文块（参考文件、对话摘要、本轮重点、偏好、近期使用者讯息）。
//! 前缀交给 `TokenBudgeter::assemble` 后再拼接历史；超预算时调用方按 `ContextDetail` 逐级缩短上下文块。

use std::collections::BTreeMap;

use crate::core::state::Session;
use crate::memory::knowledge::{format_documents, RetrievedDoc};
use crate::memory::{format_transcript, Message};

pub const SYSTEM_PROMPT: &str = "你是一位專業旅遊規劃助理，請務必優先根據下方文件內容，針對使用者問題進行整理、摘要與彙整，不要直接貼出原文。\n\
請參考整個對話歷史，維持上下文連貫性，針對使用者持續的需求給出回應。\n\
若文件資訊不足，請用旅遊專業知識補充，並說明資料來源非文件庫。\n\
請避免重複前一輪回應，針對新問題給出新建議。\n\
若已無新資訊可補充，請主動告知使用者，並引導其詢問其他主題。\n\
請確保回應簡潔、友善、實用，並使用繁體中文。";

pub const SUMMARY_PROMPT: &str =
    "請根據使用者偏好與對話歷史，摘要目前使用者的旅遊需求與狀態，回覆繁體中文：";

/// 重复回复重生成时参考的最近对话条数
const REGENERATION_CONTEXT_TURNS: usize = 6;

/// 上下文块详细程度，超预算时按 Full → NoDocuments → Minimal 缩短
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextDetail {
    Full,
    NoDocuments,
    Minimal,
}

impl ContextDetail {
    /// 下一级更短的上下文；已是最短时返回 None
    pub fn shorter(self) -> Option<Self> {
        match self {
            ContextDetail::Full => Some(ContextDetail::NoDocuments),
            ContextDetail::NoDocuments => Some(ContextDetail::Minimal),
            ContextDetail::Minimal => None,
        }
    }
}

/// 偏好格式化为 `key: value, ...`（BTreeMap 保证顺序稳定）
pub fn format_preferences(prefs: &BTreeMap<String, String>) -> String {
    prefs
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// 上下文块正文
pub fn context_block(session: &Session, docs: &[RetrievedDoc], detail: ContextDetail) -> String {
    let focus = session.recent_user_messages(1).first().copied().unwrap_or("");
    let focus_line = if focus.is_empty() {
        String::new()
    } else {
        format!("本輪問題重點：{focus}")
    };

    if detail == ContextDetail::Minimal {
        return focus_line;
    }

    let mut out = String::new();
    if detail == ContextDetail::Full {
        out.push_str(&format!("以下是參考文件：\n{}\n", format_documents(docs)));
    }
    if !session.conversation_summary.trim().is_empty() {
        out.push_str(&format!("對話摘要：{}\n", session.conversation_summary.trim()));
    }
    if !focus_line.is_empty() {
        out.push_str(&focus_line);
        out.push('\n');
    }
    let prefs = format_preferences(&session.preferences);
    if !prefs.is_empty() {
        out.push_str(&format!("使用者偏好：{prefs}\n"));
    }
    let recent = session.recent_user_messages(2);
    if !recent.is_empty() {
        out.push_str(&format!("近期使用者訊息：{}", recent.join(" / ")));
    }
    out.trim_end().to_string()
}

/// 推荐阶段的固定前缀 [system, 上下文块]
pub fn build_prefix(session: &Session, docs: &[RetrievedDoc], detail: ContextDetail) -> [Message; 2] {
    [
        Message::system(SYSTEM_PROMPT),
        Message::user(context_block(session, docs, detail)),
    ]
}

/// 检测到重复回复后，用于生成替代回复的消息：确认问题已答完、引导新主题并结合偏好
pub fn regeneration_messages(session: &Session) -> Vec<Message> {
    let prefs = format_preferences(&session.preferences);
    let instruction = format!(
        "目前您的問題已獲得完整回答，請根據現有對話情境與使用者偏好：{prefs}\n\
         提供一段通用回應並主動引導使用者切換到其他旅遊主題或提出新需求，回覆繁體中文。"
    );
    let history = session.history_messages();
    let start = history.len().saturating_sub(REGENERATION_CONTEXT_TURNS);
    vec![
        Message::system(instruction),
        Message::user(format_transcript(&history[start..])),
    ]
}

/// 对话摘要请求
pub fn summary_messages(session: &Session) -> Vec<Message> {
    let history = session.history_messages();
    let start = history.len().saturating_sub(REGENERATION_CONTEXT_TURNS);
    let content = format!(
        "使用者偏好：{}\n對話歷史：\n{}",
        format_preferences(&session.preferences),
        format_transcript(&history[start..])
    );
    vec![Message::system(SUMMARY_PROMPT), Message::user(content)]
}
