//! 回复渲染、重复检测与对话摘要
//!
//! 结构化结果（行程、评估）渲染为给使用者看的文字；候选回复与上一条助手回复比对，
//! 重复时改用「已完整回答 + 引导新主题」的指令重新生成。

use serde_json::Value;

use crate::core::state::Session;
use crate::core::AgentError;
use crate::memory::prompt::{regeneration_messages, summary_messages};
use crate::react::ReactEvent;
use crate::schema::travel::SCORES;
use crate::schema::Record;
use crate::stages::TurnScope;

fn amount(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value:.1}")
    }
}

fn value_text<'a>(value: &'a Value, field: &str) -> &'a str {
    value.get(field).and_then(Value::as_str).unwrap_or("")
}

pub fn render_itinerary(record: &Record) -> String {
    let mut lines: Vec<String> = Vec::new();

    let location = record.get_str("location");
    let days = record.get_i64("days");
    let mut header = if location.is_empty() {
        "行程規劃".to_string()
    } else {
        format!("{location}行程")
    };
    if days > 0 {
        header.push_str(&format!("（{days} 天，預算{}）", record.get_str("budget_level")));
    }
    lines.push(header);
    lines.push(record.get_str("summary").to_string());

    let total = record.get_f64("total_budget");
    if total > 0.0 {
        lines.push(format!("預估總預算：約 {} 元", amount(total)));
    }
    let transport = record.get_str("transport_plan");
    if !transport.is_empty() {
        lines.push(format!("交通：{transport}"));
    }

    for day in record.get_list("daily_plans") {
        let number = day.get("day").and_then(Value::as_i64).unwrap_or(0);
        let mut title = format!("\n第 {number} 天");
        let theme = value_text(day, "theme");
        if !theme.is_empty() {
            title.push_str(&format!("｜{theme}"));
        }
        let weather = value_text(day, "weather");
        if !weather.is_empty() {
            title.push_str(&format!("（{weather}）"));
        }
        lines.push(title);

        let activities = day.get("activities").and_then(Value::as_array);
        for activity in activities.into_iter().flatten() {
            let mut line = String::from("- ");
            let time = value_text(activity, "time");
            if !time.is_empty() {
                line.push_str(time);
                line.push(' ');
            }
            line.push_str(value_text(activity, "name"));
            let place = value_text(activity, "location");
            if !place.is_empty() {
                line.push_str(&format!(" @ {place}"));
            }
            let cost = activity.get("cost").and_then(Value::as_f64).unwrap_or(0.0);
            if cost > 0.0 {
                line.push_str(&format!("（約 {} 元）", amount(cost)));
            }
            let notes = value_text(activity, "notes");
            if !notes.is_empty() {
                line.push_str(&format!("：{notes}"));
            }
            lines.push(line);
        }
    }

    let tips: Vec<&str> = record
        .get_list("tips")
        .iter()
        .filter_map(Value::as_str)
        .collect();
    if !tips.is_empty() {
        lines.push("\n提醒：".to_string());
        lines.extend(tips.iter().map(|t| format!("- {t}")));
    }

    lines
        .into_iter()
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_evaluation(record: &Record) -> String {
    let mut lines: Vec<String> = Vec::new();
    let summary = record.get_str("行程摘要");
    lines.push(if summary.is_empty() {
        "行程評估".to_string()
    } else {
        format!("行程評估：{summary}")
    });

    if let Some(scores) = record.get_record("評分") {
        let parts: Vec<String> = SCORES
            .fields
            .iter()
            .map(|f| format!("{} {}", f.name, amount(scores.get_f64(f.name))))
            .collect();
        lines.push(format!("評分：{}", parts.join("、")));
    }

    let suggestions = record.get_list("優化建議");
    if !suggestions.is_empty() {
        lines.push("優化建議：".to_string());
        for s in suggestions {
            let mut line = format!("- [{}]", value_text(s, "優先級"));
            let kind = value_text(s, "類型");
            if !kind.is_empty() {
                line.push_str(&format!(" {kind}："));
            } else {
                line.push(' ');
            }
            line.push_str(value_text(s, "建議"));
            let reason = value_text(s, "原因");
            if !reason.is_empty() {
                line.push_str(&format!("（{reason}）"));
            }
            lines.push(line);
        }
    }

    let overall = record.get_str("整體評價");
    if !overall.is_empty() {
        lines.push(format!("整體評價：{overall}"));
    }
    lines.push(if record.get_bool("是否需要調整") {
        "建議依上述方向調整行程。".to_string()
    } else {
        "目前行程無需大幅調整。".to_string()
    });
    lines.join("\n")
}

/// 与上一条助手回复比对；重复时重新生成。重复检测只跑一次，替代回复不再检测
pub async fn vet_reply(
    scope: &TurnScope<'_>,
    session: &Session,
    candidate: String,
) -> Result<String, AgentError> {
    if !scope.ctx.config.dedup.enabled {
        return Ok(candidate);
    }
    let verdict = tokio::select! {
        biased;
        _ = scope.cancel.cancelled() => return Err(AgentError::Cancelled),
        v = scope.ctx.detector.check(&candidate, session.last_assistant_reply()) => v,
    };
    if !verdict.duplicate {
        return Ok(candidate);
    }

    let similarity = verdict.similarity.unwrap_or(1.0);
    scope.emit(ReactEvent::DuplicateReply { similarity });
    scope.invoke(&regeneration_messages(session)).await
}

/// 更新对话摘要；失败只记日志，取消照常向上传播
pub async fn summarize(scope: &TurnScope<'_>, session: &mut Session) -> Result<(), AgentError> {
    if !scope.ctx.config.memory.summarize_turns {
        return Ok(());
    }
    match scope.invoke(&summary_messages(session)).await {
        Ok(summary) if !summary.trim().is_empty() => {
            session.conversation_summary = summary.trim().to_string();
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
        Err(e) => {
            tracing::warn!(error = %e, "conversation summary failed, keeping previous summary");
            Ok(())
        }
    }
}
