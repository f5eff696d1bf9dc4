//! 推荐阶段
//!
//! 1. 一次模型调用把使用者输入拆成 `travel_intent` 记录，非空欄位并入偏好，决定是否进入规划 / 评估；
//! 2. 检索知识库，组装 [system, 上下文块] 前缀 + 对话历史，经 Token 预算后调用模型作答。
//!    前缀超预算时按 Full → NoDocuments → Minimal 缩短上下文块，仍放不下才返回错误。

use crate::core::state::{Content, Session, Stage};
use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::memory::prompt::{build_prefix, ContextDetail};
use crate::memory::Message;
use crate::react::ReactEvent;
use crate::schema::travel::TRAVEL_INTENT;
use crate::schema::{recover, Record};
use crate::stages::TurnScope;

pub const INTENT_PROMPT: &str = "請將使用者的旅遊需求精確拆解成 JSON 格式，欄位包括：\
need_planning, need_evaluation, location, days, budget_level, date。\n\
- need_planning（布林）：使用者希望安排具體行程（例如「幫我排三天行程」）時為 true，只是詢問推薦時為 false\n\
- need_evaluation（布林）：使用者希望評估或優化行程時為 true\n\
- location（字串）：從「我想去台中玩」中提取「台中」，只回傳地點名稱\n\
- days（整數）：從「2天1夜」中提取 2，無法解析請填 0\n\
- budget_level（字串）：「經濟」、「中等」、「高級」之一，無法解析請填「中等」\n\
- date（字串，YYYY-MM-DD）：出發日期，無法解析請填空字串\n\
請直接回覆 JSON，不要加任何自然語言說明或 markdown 標記。";

/// 抽取本轮旅行意图；解析失败时得到全默认记录（不规划、不评估）
pub async fn extract_intent(scope: &TurnScope<'_>, user_message: &str) -> Result<Record, AgentError> {
    let messages = [Message::system(INTENT_PROMPT), Message::user(user_message)];
    let text = scope.invoke(&messages).await?;
    Ok(recover(&text, &TRAVEL_INTENT))
}

/// 合并意图到会话：偏好只收非空值；need_evaluation 与配置开关取或
pub fn apply_intent(session: &mut Session, intent: &Record, evaluate_plans: bool) {
    let days = intent.get_i64("days");
    let days = if days > 0 { days.to_string() } else { String::new() };
    session.merge_preferences([
        ("location", intent.get_str("location").to_string()),
        ("days", days),
        ("budget_level", intent.get_str("budget_level").to_string()),
        ("date", intent.get_str("date").to_string()),
    ]);
    session.need_planning = intent.get_bool("need_planning");
    session.need_evaluation = intent.get_bool("need_evaluation") || evaluate_plans;
}

/// 检索 + 预算组装 + 调用模型
pub async fn respond(scope: &TurnScope<'_>, session: &Session) -> Result<String, AgentError> {
    let ctx = scope.ctx;
    let query = session.recent_user_messages(1).first().copied().unwrap_or("").to_string();
    let docs = ctx.knowledge.search(&query, ctx.config.memory.retrieval_k).await;
    tracing::debug!(hits = docs.len(), "knowledge lookup");

    let history = session.history_messages();
    let budgeter = ctx.budgeter();
    let recovery = RecoveryEngine::new();
    let mut detail = ContextDetail::Full;
    let prompt = loop {
        match budgeter.assemble(build_prefix(session, &docs, detail), &history) {
            Ok(prompt) => break prompt,
            Err(e) => match (recovery.handle(&e), detail.shorter()) {
                (RecoveryAction::ShortenContext, Some(shorter)) => {
                    tracing::warn!(error = %e, ?shorter, "prefix over budget, shortening context block");
                    scope.emit(ReactEvent::Recovery {
                        action: "shorten_context".into(),
                        detail: e.to_string(),
                    });
                    detail = shorter;
                }
                _ => return Err(e),
            },
        }
    };
    if prompt.has_marker() {
        tracing::debug!(elided = prompt.elided, ceiling = prompt.ceiling, "history truncated");
    }

    scope.invoke(&prompt.messages).await
}

/// 推荐阶段：写 recommendation_result 与 current_stage，返回候选回复
pub async fn run_recommendation(
    scope: &TurnScope<'_>,
    session: &mut Session,
) -> Result<String, AgentError> {
    let user_message = session.recent_user_messages(1).first().copied().unwrap_or("").to_string();
    let intent = extract_intent(scope, &user_message).await?;
    apply_intent(session, &intent, scope.ctx.config.stages.evaluate_plans);
    tracing::info!(
        need_planning = session.need_planning,
        need_evaluation = session.need_evaluation,
        "travel intent extracted"
    );

    let reply = respond(scope, session).await?;
    session.recommendation_result = Some(Content::Text(reply.clone()));
    session.current_stage = Stage::Recommendation.as_str().to_string();
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_intent_merges_non_empty_preferences() {
        let intent = recover(
            r#"{"need_planning": "是", "location": "台中", "days": "2天", "date": ""}"#,
            &TRAVEL_INTENT,
        );
        let mut s = Session::new("t");
        s.merge_preferences([("date", "2024-12-20")]);
        apply_intent(&mut s, &intent, false);
        assert!(s.need_planning);
        assert!(!s.need_evaluation);
        assert_eq!(s.preferences["location"], "台中");
        assert_eq!(s.preferences["days"], "2");
        assert_eq!(s.preferences["budget_level"], "中等");
        assert_eq!(s.preferences["date"], "2024-12-20");
    }

    #[test]
    fn test_evaluate_plans_config_forces_evaluation() {
        let intent = recover("not json at all", &TRAVEL_INTENT);
        let mut s = Session::new("t");
        apply_intent(&mut s, &intent, true);
        assert!(!s.need_planning);
        assert!(s.need_evaluation);
        assert!(!s.preferences.contains_key("days"));
    }
}
