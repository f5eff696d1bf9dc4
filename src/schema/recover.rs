//! 从不可靠的模型文本中恢复结构化记录
//!
//! 依次尝试，先成功者返回：
//! 1. 整段按 JSON 解析；
//! 2. 带调试前缀时按 repr 文本提取字段；
//! 3. 去掉代码围栏，取第一个 `{` 与其配对的 `}`（找不到配对时退到最后一个 `}`）；
//! 4. 全部失败：所有字段取默认值，错误说明写入 error_field。
//!
//! 每一步都要通过 `conform`（必填字段缺失视为失败），因此结果总是合法记录。

use serde_json::Value;

use super::repr::{parse_repr, strip_debug_prefix};
use super::{conform, Record, Schema};

/// 记录来自哪一层
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySource {
    Direct,
    DebugRepr,
    Embedded,
    Fallback,
}

/// 恢复记录（永不失败）
pub fn recover(text: &str, schema: &'static Schema) -> Record {
    recover_with_source(text, schema).0
}

pub fn recover_with_source(text: &str, schema: &'static Schema) -> (Record, RecoverySource) {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Ok(record) = conform(&value, schema) {
            return (record, RecoverySource::Direct);
        }
    }

    if let Some(rest) = strip_debug_prefix(trimmed) {
        let value = parse_repr(rest);
        if let Ok(record) = conform(&value, schema) {
            tracing::debug!(schema = schema.name, "record recovered from debug repr");
            return (record, RecoverySource::DebugRepr);
        }
    }

    let unfenced = strip_code_fences(trimmed);
    if let Some(value) = embedded_object(&unfenced) {
        if let Ok(record) = conform(&value, schema) {
            return (record, RecoverySource::Embedded);
        }
    }

    let note = if trimmed.is_empty() {
        "empty model output".to_string()
    } else {
        format!("could not parse {} output", schema.name)
    };
    tracing::warn!(schema = schema.name, "structured recovery fell back to defaults");
    (schema.fallback_record(&note), RecoverySource::Fallback)
}

/// 去掉 ```json / ``` 围栏行
pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 第一个 `{` 与其配对 `}` 之间的对象；配对失败时退到最后一个 `}`
fn embedded_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    if let Some(end) = matching_brace(text, start) {
        if let Ok(v) = serde_json::from_str::<Value>(&text[start..=end]) {
            return Some(v);
        }
    }
    let last = text.rfind('}')?;
    if last <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=last]).ok()
}

/// 从 `open`（`{` 的字节下标）起找配对的 `}`，跳过字符串内的花括号
fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[open..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}
