//! 行程规划阶段
//!
//! 以「偏好 + 推荐结果 + 本轮输入」为开场消息跑有界能力循环（预算、天气、住宿、景点、路线、知识检索），
//! 最终回答按 `itinerary` 记录恢复后写入 planner_result。

use crate::core::state::{Content, Session, Stage};
use crate::core::AgentError;
use crate::memory::prompt::format_preferences;
use crate::memory::Message;
use crate::react::{CapabilityLoop, Planner};
use crate::schema::travel::ITINERARY;
use crate::schema::{recover_with_source, RecoverySource};
use crate::stages::reply::render_itinerary;
use crate::stages::TurnScope;
use crate::tools::{tool_call_schema_json, ToolRegistry};

pub const PLANNER_DIRECTIVE: &str = "你是一位旅遊行程規劃師，負責根據使用者偏好產生逐日行程。\n\
需要資料時，一次只呼叫一個能力，並只輸出能力呼叫 JSON（不要加其他文字）。\n\
資料足夠後，直接輸出最終行程 JSON，不要再呼叫能力。";

const ITINERARY_FORMAT: &str = r#"最終行程 JSON 格式：
{
  "summary": "行程摘要",
  "location": "地點",
  "days": 2,
  "budget_level": "中等",
  "total_budget": 10000,
  "transport_plan": "交通建議",
  "daily_plans": [
    {"day": 1, "theme": "主題", "weather": "天氣", "activities": [
      {"name": "活動", "time": "09:00-11:00", "location": "地點", "cost": 300, "notes": "備註"}
    ]}
  ],
  "tips": ["提醒"]
}
請使用繁體中文。"#;

/// 规划阶段 system prompt：指令 + 能力清单 + 能力调用 Schema + 行程格式
pub fn planner_system_prompt(registry: &ToolRegistry) -> String {
    format!(
        "{}\n\n## 可用能力\n```json\n{}\n```\n\n## 能力呼叫 JSON Schema\n```json\n{}\n```\n\n{}",
        PLANNER_DIRECTIVE,
        registry.to_schema_json(),
        tool_call_schema_json(),
        ITINERARY_FORMAT
    )
}

fn opening_message(session: &Session) -> Message {
    let mut text = String::new();
    let prefs = format_preferences(&session.preferences);
    if !prefs.is_empty() {
        text.push_str(&format!("使用者偏好：{prefs}\n"));
    }
    if let Some(rec) = &session.recommendation_result {
        text.push_str(&format!("推薦內容：\n{}\n", rec.render()));
    }
    let request = session.recent_user_messages(1).first().copied().unwrap_or("");
    text.push_str(&format!("使用者需求：{request}"));
    Message::user(text)
}

/// 规划阶段：写 planner_result 与 current_stage，返回候选回复
pub async fn run_planner(scope: &TurnScope<'_>, session: &mut Session) -> Result<String, AgentError> {
    let ctx = scope.ctx;
    let planner = Planner::new(ctx.llm.clone(), planner_system_prompt(ctx.executor.registry()))
        .with_timeout(ctx.request_timeout());
    let budgeter = ctx.budgeter();
    let mut capability_loop = CapabilityLoop::new(&planner, &ctx.executor, scope.cancel.clone())
        .with_limits(ctx.limits)
        .with_budgeter(&budgeter);
    if let Some(tx) = scope.events {
        capability_loop = capability_loop.with_event_tx(tx);
    }

    let outcome = capability_loop.run(opening_message(session)).await?;
    tracing::info!(
        invocations = outcome.invocations.len(),
        iterations = outcome.iterations,
        stop_reason = ?outcome.stop_reason,
        "planner loop finished"
    );

    let (record, source) = recover_with_source(&outcome.answer, &ITINERARY);
    let reply = if source == RecoverySource::Fallback {
        outcome.answer.clone()
    } else if outcome.failed_sources.is_empty() {
        render_itinerary(&record)
    } else {
        format!(
            "{}\n\n（註：部分資料來源查詢失敗：{}）",
            render_itinerary(&record),
            outcome.failed_sources.join("、")
        )
    };

    session.planner_result = Some(Content::Structured(record));
    session.current_stage = Stage::Planner.as_str().to_string();
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::BudgetEstimateTool;

    #[test]
    fn test_system_prompt_lists_capabilities() {
        let mut registry = ToolRegistry::new();
        registry.register(BudgetEstimateTool);
        let prompt = planner_system_prompt(&registry);
        assert!(prompt.starts_with(PLANNER_DIRECTIVE));
        assert!(prompt.contains("calculate_budget"));
        assert!(prompt.contains("\"tool\""));
    }

    #[test]
    fn test_opening_message_carries_context() {
        let mut s = Session::new("t");
        s.push_turn(crate::core::state::TurnRole::User, "幫我排台中兩天行程");
        s.merge_preferences([("location", "台中")]);
        s.recommendation_result = Some(Content::Text("推薦逢甲夜市".into()));
        let msg = opening_message(&s);
        assert!(msg.content.contains("location: 台中"));
        assert!(msg.content.contains("推薦逢甲夜市"));
        assert!(msg.content.ends_with("使用者需求：幫我排台中兩天行程"));
    }
}
