//! 预算估算能力（calculate_budget）
//!
//! 按预算等级查每日预算（经济 3000 / 中等 5000 / 高级 10000，未知等级按中等），
//! 乘以天数得到总预算，并按住宿 40%、餐饮 30%、交通 20%、活动 10% 拆分。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::Tool;

pub const DEFAULT_DAILY_BUDGET: u64 = 5000;

/// 每日预算（新台币）
pub fn daily_budget(level: &str) -> u64 {
    match level.trim() {
        "經濟" | "经济" => 3000,
        "中等" => 5000,
        "高級" | "高级" => 10000,
        _ => DEFAULT_DAILY_BUDGET,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetEstimate {
    pub days: u64,
    pub level: String,
    pub daily: u64,
    pub total: u64,
    pub lodging: u64,
    pub food: u64,
    pub transport: u64,
    pub activities: u64,
}

impl BudgetEstimate {
    pub fn compute(days: u64, level: &str) -> Self {
        let daily = daily_budget(level);
        let total = daily * days;
        Self {
            days,
            level: level.trim().to_string(),
            daily,
            total,
            lodging: total * 4 / 10,
            food: total * 3 / 10,
            transport: total * 2 / 10,
            activities: total / 10,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "天數": self.days,
            "預算等級": self.level,
            "每日預算": format!("NT$ {}", self.daily),
            "總預算估算": format!("NT$ {}", self.total),
            "預算明細": {
                "住宿": format!("NT$ {}", self.lodging),
                "餐飲": format!("NT$ {}", self.food),
                "交通": format!("NT$ {}", self.transport),
                "活動": format!("NT$ {}", self.activities),
            }
        })
    }
}

/// 从数字或「3天」之类的文本中取天数
fn parse_days(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let digits: String = s
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

pub struct BudgetEstimateTool;

#[async_trait]
impl Tool for BudgetEstimateTool {
    fn name(&self) -> &str {
        "calculate_budget"
    }

    fn description(&self) -> &str {
        "Estimate total trip budget from number of days and budget level (經濟/中等/高級). Args: {\"days\": 3, \"budget_level\": \"中等\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "days": {"type": "integer", "minimum": 1},
                "budget_level": {"type": "string", "enum": ["經濟", "中等", "高級"]}
            },
            "required": ["days"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let days = args
            .get("days")
            .and_then(parse_days)
            .filter(|d| *d > 0)
            .ok_or_else(|| "days must be a positive integer".to_string())?;
        let level = args
            .get("budget_level")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("中等");
        let estimate = BudgetEstimate::compute(days, level);
        serde_json::to_string_pretty(&estimate.to_json()).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split() {
        let e = BudgetEstimate::compute(3, "中等");
        assert_eq!(e.total, 15000);
        assert_eq!(e.lodging, 6000);
        assert_eq!(e.food, 4500);
        assert_eq!(e.transport, 3000);
        assert_eq!(e.activities, 1500);
    }

    #[test]
    fn test_unknown_level_uses_default() {
        assert_eq!(daily_budget("豪華"), DEFAULT_DAILY_BUDGET);
        assert_eq!(daily_budget("經濟"), 3000);
        assert_eq!(daily_budget("高級"), 10000);
    }

    #[tokio::test]
    async fn test_execute_accepts_text_days() {
        let out = BudgetEstimateTool
            .execute(json!({"days": "2天", "budget_level": "經濟"}))
            .await
            .unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["總預算估算"], "NT$ 6000");
    }

    #[tokio::test]
    async fn test_execute_rejects_missing_days() {
        assert!(BudgetEstimateTool.execute(json!({})).await.is_err());
        assert!(BudgetEstimateTool.execute(json!({"days": 0})).await.is_err());
    }
}
