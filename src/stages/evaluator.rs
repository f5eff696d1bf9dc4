//! 行程评估阶段：一次模型调用，对规划结果打分并给出优化建议

use crate::core::state::{Content, Session, Stage};
use crate::core::AgentError;
use crate::memory::prompt::format_preferences;
use crate::memory::Message;
use crate::schema::travel::EVALUATION;
use crate::schema::{recover_with_source, RecoverySource};
use crate::stages::reply::render_evaluation;
use crate::stages::TurnScope;

pub const EVALUATOR_PROMPT: &str = r#"你是一位旅遊行程評估專家，請根據使用者偏好評估下方行程的合理性，並提出具體優化建議。
請只回覆以下 JSON 格式（分數 0-10）：
{
  "行程摘要": "一句話摘要",
  "評分": {"預算合理性": 8, "時間安排": 7, "交通便利性": 8, "活動豐富度": 9, "整體評分": 8},
  "優化建議": [{"類型": "交通", "原因": "原因", "建議": "具體建議", "優先級": "高"}],
  "整體評價": "總結",
  "是否需要調整": false
}
請使用繁體中文。"#;

fn evaluation_request(session: &Session) -> Message {
    let itinerary = session
        .planner_result
        .as_ref()
        .map(Content::render)
        .unwrap_or_else(|| "（尚無行程）".to_string());
    Message::user(format!(
        "使用者偏好：{}\n\n待評估行程：\n{}",
        format_preferences(&session.preferences),
        itinerary
    ))
}

/// 评估阶段：写 evaluation_result 与 current_stage，返回候选回复
pub async fn run_evaluator(scope: &TurnScope<'_>, session: &mut Session) -> Result<String, AgentError> {
    let messages = [Message::system(EVALUATOR_PROMPT), evaluation_request(session)];
    let text = scope.invoke(&messages).await?;
    let (record, source) = recover_with_source(&text, &EVALUATION);
    tracing::info!(?source, "itinerary evaluated");

    let reply = if source == RecoverySource::Fallback && !text.trim().is_empty() {
        text
    } else {
        render_evaluation(&record)
    };
    session.evaluation_result = Some(Content::Structured(record));
    session.current_stage = Stage::Evaluator.as_str().to_string();
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::recover;
    use crate::schema::travel::ITINERARY;

    #[test]
    fn test_request_includes_itinerary_json() {
        let mut s = Session::new("t");
        s.merge_preferences([("budget_level", "經濟")]);
        s.planner_result = Some(Content::Structured(recover(
            r#"{"summary": "台中兩日遊", "days": 2}"#,
            &ITINERARY,
        )));
        let msg = evaluation_request(&s);
        assert!(msg.content.contains("budget_level: 經濟"));
        assert!(msg.content.contains("台中兩日遊"));
    }

    #[test]
    fn test_request_without_itinerary() {
        let msg = evaluation_request(&Session::new("t"));
        assert!(msg.content.contains("（尚無行程）"));
    }
}
