//! 能力调用 JSON Schema（schemars 生成）
//!
//! 拼入规划阶段的 system prompt，告诉模型请求能力时应输出的 JSON 结构。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 能力调用请求：与解析器识别的 `{"tool": "...", "args": {...}}` 一致（仅用于生成 Schema）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct CapabilityCall {
    /// 能力名，如 calculate_budget、weather_forecast
    pub tool: String,
    /// 参数，依能力不同而不同（days、budget_level、location、start_date 等）
    pub args: HashMap<String, Value>,
}

pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(CapabilityCall);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
