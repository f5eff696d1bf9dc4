//! 旅行助手用到的结构化记录声明

use super::{FieldDefault, FieldKind, FieldSpec, Schema};

/// 用户意图与偏好（推荐阶段从用户消息中提取）
pub static TRAVEL_INTENT: Schema = Schema {
    name: "travel_intent",
    fields: &[
        FieldSpec::optional("need_planning", FieldKind::Flag),
        FieldSpec::optional("need_evaluation", FieldKind::Flag),
        FieldSpec::optional("location", FieldKind::Text),
        FieldSpec::optional("days", FieldKind::Integer),
        FieldSpec::optional("budget_level", FieldKind::Text)
            .with_default(FieldDefault::Text("中等")),
        FieldSpec::optional("date", FieldKind::Text),
    ],
    error_field: None,
};

pub static WEATHER_ITEM: Schema = Schema {
    name: "weather_item",
    fields: &[
        FieldSpec::required("日期", FieldKind::Text),
        FieldSpec::optional("天氣", FieldKind::Text),
        FieldSpec::optional("溫度", FieldKind::Text),
        FieldSpec::optional("降雨機率", FieldKind::Text),
    ],
    error_field: None,
};

pub static WEATHER_REPORT: Schema = Schema {
    name: "weather_report",
    fields: &[
        FieldSpec::required("查詢地點", FieldKind::Text),
        FieldSpec::optional("查詢日期範圍", FieldKind::Text),
        FieldSpec::optional("天氣預報", FieldKind::List(&WEATHER_ITEM)),
        FieldSpec::optional("整體分析", FieldKind::Text),
    ],
    error_field: None,
};

pub static ACTIVITY: Schema = Schema {
    name: "activity",
    fields: &[
        FieldSpec::required("name", FieldKind::Text),
        FieldSpec::optional("time", FieldKind::Text),
        FieldSpec::optional("location", FieldKind::Text),
        FieldSpec::optional("cost", FieldKind::Number),
        FieldSpec::optional("notes", FieldKind::Text),
    ],
    error_field: None,
};

pub static DAY_PLAN: Schema = Schema {
    name: "day_plan",
    fields: &[
        FieldSpec::required("day", FieldKind::Integer),
        FieldSpec::optional("theme", FieldKind::Text),
        FieldSpec::optional("weather", FieldKind::Text),
        FieldSpec::optional("activities", FieldKind::List(&ACTIVITY)),
    ],
    error_field: None,
};

/// 规划阶段的最终行程
pub static ITINERARY: Schema = Schema {
    name: "itinerary",
    fields: &[
        FieldSpec::required("summary", FieldKind::Text),
        FieldSpec::optional("location", FieldKind::Text),
        FieldSpec::optional("days", FieldKind::Integer),
        FieldSpec::optional("budget_level", FieldKind::Text)
            .with_default(FieldDefault::Text("中等")),
        FieldSpec::optional("total_budget", FieldKind::Number),
        FieldSpec::optional("transport_plan", FieldKind::Text),
        FieldSpec::optional("daily_plans", FieldKind::List(&DAY_PLAN)),
        FieldSpec::optional("tips", FieldKind::TextList),
        FieldSpec::optional("error", FieldKind::Text),
    ],
    error_field: Some("error"),
};

pub static SCORES: Schema = Schema {
    name: "scores",
    fields: &[
        FieldSpec::optional("預算合理性", FieldKind::Number),
        FieldSpec::optional("時間安排", FieldKind::Number),
        FieldSpec::optional("交通便利性", FieldKind::Number),
        FieldSpec::optional("活動豐富度", FieldKind::Number),
        FieldSpec::optional("整體評分", FieldKind::Number),
    ],
    error_field: None,
};

pub static SUGGESTION: Schema = Schema {
    name: "suggestion",
    fields: &[
        FieldSpec::required("建議", FieldKind::Text),
        FieldSpec::optional("類型", FieldKind::Text),
        FieldSpec::optional("原因", FieldKind::Text),
        FieldSpec::optional("優先級", FieldKind::Text).with_default(FieldDefault::Text("中")),
    ],
    error_field: None,
};

/// 评估阶段对行程的打分与建议
pub static EVALUATION: Schema = Schema {
    name: "evaluation",
    fields: &[
        FieldSpec::optional("行程摘要", FieldKind::Text),
        FieldSpec::required("評分", FieldKind::Object(&SCORES)),
        FieldSpec::optional("優化建議", FieldKind::List(&SUGGESTION)),
        FieldSpec::optional("整體評價", FieldKind::Text),
        FieldSpec::optional("是否需要調整", FieldKind::Flag),
        FieldSpec::optional("error", FieldKind::Text),
    ],
    error_field: Some("error"),
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::recover;

    #[test]
    fn test_every_error_field_is_declared_text() {
        for schema in [&TRAVEL_INTENT, &WEATHER_REPORT, &ITINERARY, &EVALUATION] {
            if let Some(name) = schema.error_field {
                let field = schema.field(name).expect("error field declared");
                assert!(matches!(field.kind, FieldKind::Text));
            }
        }
    }

    #[test]
    fn test_evaluation_from_model_json() {
        let text = r#"{
            "行程摘要": "台中三日遊",
            "評分": {"預算合理性": 8, "時間安排": "7.5", "交通便利性": 9, "活動豐富度": 8, "整體評分": 8.1},
            "優化建議": [{"類型": "交通", "原因": "夜市距離遠", "建議": "改搭捷運", "優先級": "高"}],
            "整體評價": "安排合理",
            "是否需要調整": false
        }"#;
        let r = recover(text, &EVALUATION);
        let scores = r.get_record("評分").expect("scores");
        assert_eq!(scores.get_f64("時間安排"), 7.5);
        assert_eq!(r.get_list("優化建議").len(), 1);
        assert_eq!(r.get_str("error"), "");
    }

    #[test]
    fn test_itinerary_day_without_number_is_dropped() {
        let text = r#"{"summary": "s", "daily_plans": [{"theme": "no day"}, {"day": "第2天", "activities": []}]}"#;
        let r = recover(text, &ITINERARY);
        let plans = r.get_list("daily_plans");
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0]["day"], 2);
    }
}
