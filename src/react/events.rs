//! 运行过程事件：供 REPL / 前端展示阶段切换、能力调用与观察结果

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 进入某个阶段（recommendation / planner / evaluator）
    StageEntered { stage: String },
    /// 循环迭代计数（当前第几次模型调用）
    StepUpdate { step: usize, max_steps: usize },
    Thinking,
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 能力返回（预览，避免过长）
    Observation { tool: String, preview: String },
    ToolFailure { tool: String, reason: String },
    /// 恢复动作（格式纠正提示、强制收尾、整轮重试、缩短上下文）
    Recovery { action: String, detail: String },
    /// 回复与上一轮重复，已改写
    DuplicateReply { similarity: f32 },
    FinalAnswer { preview: String },
    Error { text: String },
}

pub(crate) fn send_event(
    tx: Option<&tokio::sync::mpsc::UnboundedSender<ReactEvent>>,
    ev: ReactEvent,
) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

/// 取前 `max` 个字符作为预览
pub(crate) fn preview(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}
