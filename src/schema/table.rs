//! 声明式 Schema 表与规整（conform）
//!
//! Schema 是静态字段表；提取与类型转换都由字段表驱动，不为单个 Schema 写专用代码。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Number, Value};
use thiserror::Error;

use super::Record;

/// 字段类型
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    Text,
    Integer,
    Number,
    Flag,
    TextList,
    Object(&'static Schema),
    List(&'static Schema),
}

/// 字段默认值；`KindDefault` 取类型默认（空串 / 0 / false / 空列表 / 嵌套默认记录）
#[derive(Debug, Clone, Copy)]
pub enum FieldDefault {
    KindDefault,
    Text(&'static str),
    Integer(i64),
    Number(f64),
    Flag(bool),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub default: FieldDefault,
}

impl FieldSpec {
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: FieldDefault::KindDefault,
        }
    }

    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: FieldDefault::KindDefault,
        }
    }

    pub const fn with_default(mut self, default: FieldDefault) -> Self {
        self.default = default;
        self
    }

    /// 字段默认值（已按类型规整）
    pub fn default_value(&self) -> Value {
        let declared = match self.default {
            FieldDefault::KindDefault => None,
            FieldDefault::Text(s) => Some(Value::String(s.to_string())),
            FieldDefault::Integer(n) => Some(Value::from(n)),
            FieldDefault::Number(x) => Number::from_f64(x).map(Value::Number),
            FieldDefault::Flag(b) => Some(Value::Bool(b)),
        };
        declared
            .and_then(|v| coerce(&v, self.kind))
            .unwrap_or_else(|| kind_default(self.kind))
    }
}

/// 结构化记录的声明
#[derive(Debug)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
    /// 兜底时写入错误说明的字段（必须是 Text 字段）
    pub error_field: Option<&'static str>,
}

impl Schema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// 所有字段取默认值的记录
    pub fn default_record(&self) -> Record {
        let map = self
            .fields
            .iter()
            .map(|f| (f.name.to_string(), f.default_value()))
            .collect();
        Record::from_map(map)
    }

    /// 兜底记录：全部默认值，错误说明写入 error_field（若有）
    pub fn fallback_record(&self, note: &str) -> Record {
        let mut map = self.default_record().as_map().clone();
        if let Some(field) = self.error_field.and_then(|name| self.field(name)) {
            if matches!(field.kind, FieldKind::Text) {
                map.insert(field.name.to_string(), Value::String(note.to_string()));
            }
        }
        Record::from_map(map)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConformError {
    #[error("{schema}: expected an object")]
    NotAnObject { schema: &'static str },
    #[error("{schema}: required field '{field}' missing or invalid")]
    MissingField {
        schema: &'static str,
        field: &'static str,
    },
}

fn kind_default(kind: FieldKind) -> Value {
    match kind {
        FieldKind::Text => Value::String(String::new()),
        FieldKind::Integer => Value::from(0i64),
        FieldKind::Number => Value::from(0.0f64),
        FieldKind::Flag => Value::Bool(false),
        FieldKind::TextList | FieldKind::List(_) => Value::Array(Vec::new()),
        FieldKind::Object(nested) => nested.default_record().to_value(),
    }
}

fn integer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+").expect("valid integer regex"))
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("valid number regex"))
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "是" | "需要" | "對" | "对" => Some(true),
        "false" | "no" | "n" | "0" | "否" | "不需要" | "不" | "none" | "" => Some(false),
        _ => None,
    }
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// 按类型转换单个值；无法转换返回 None
fn coerce(value: &Value, kind: FieldKind) -> Option<Value> {
    match kind {
        FieldKind::Text => match value {
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().filter_map(scalar_text).collect();
                (!parts.is_empty()).then(|| Value::String(parts.join("、")))
            }
            other => scalar_text(other).map(Value::String),
        },
        FieldKind::Integer => match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|x| x.is_finite()).map(|x| x.round() as i64))
                .map(Value::from),
            Value::String(s) => integer_re()
                .find(s)
                .and_then(|m| m.as_str().parse::<i64>().ok())
                .map(Value::from),
            _ => None,
        },
        FieldKind::Number => {
            let x = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => number_re()
                    .find(s)
                    .and_then(|m| m.as_str().parse::<f64>().ok()),
                _ => None,
            }?;
            Number::from_f64(x).map(Value::Number)
        }
        FieldKind::Flag => match value {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::Number(n) => n.as_f64().map(|x| Value::Bool(x != 0.0)),
            Value::String(s) => parse_flag(s).map(Value::Bool),
            _ => None,
        },
        FieldKind::TextList => match value {
            Value::Array(items) => Some(Value::Array(
                items
                    .iter()
                    .filter_map(scalar_text)
                    .map(Value::String)
                    .collect(),
            )),
            Value::String(s) if s.trim().is_empty() => Some(Value::Array(Vec::new())),
            Value::String(s) => Some(Value::Array(vec![Value::String(s.clone())])),
            _ => None,
        },
        FieldKind::Object(nested) => conform(value, nested).ok().map(|r| r.to_value()),
        FieldKind::List(nested) => match value {
            Value::Array(items) => Some(Value::Array(
                items
                    .iter()
                    .filter_map(|item| conform(item, nested).ok())
                    .map(|r| r.to_value())
                    .collect(),
            )),
            Value::Object(_) => conform(value, nested)
                .ok()
                .map(|r| Value::Array(vec![r.to_value()])),
            _ => None,
        },
    }
}

/// 将任意值规整为 Schema 记录：丢弃未知字段，缺省字段取默认值，必填字段缺失或非法时报错
pub fn conform(value: &Value, schema: &'static Schema) -> Result<Record, ConformError> {
    let obj = value.as_object().ok_or(ConformError::NotAnObject {
        schema: schema.name,
    })?;
    let mut out = Map::new();
    for field in schema.fields {
        let coerced = obj
            .get(field.name)
            .filter(|v| !v.is_null())
            .and_then(|v| coerce(v, field.kind));
        let value = match coerced {
            Some(v) => v,
            None if field.required => {
                return Err(ConformError::MissingField {
                    schema: schema.name,
                    field: field.name,
                })
            }
            None => field.default_value(),
        };
        out.insert(field.name.to_string(), value);
    }
    Ok(Record::from_map(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    static ITEM: Schema = Schema {
        name: "item",
        fields: &[
            FieldSpec::required("label", FieldKind::Text),
            FieldSpec::optional("count", FieldKind::Integer),
        ],
        error_field: None,
    };

    static SAMPLE: Schema = Schema {
        name: "sample",
        fields: &[
            FieldSpec::required("title", FieldKind::Text),
            FieldSpec::optional("days", FieldKind::Integer),
            FieldSpec::optional("score", FieldKind::Number),
            FieldSpec::optional("urgent", FieldKind::Flag),
            FieldSpec::optional("tags", FieldKind::TextList),
            FieldSpec::optional("items", FieldKind::List(&ITEM)),
            FieldSpec::optional("level", FieldKind::Text).with_default(FieldDefault::Text("中等")),
            FieldSpec::optional("error", FieldKind::Text),
        ],
        error_field: Some("error"),
    };

    #[test]
    fn test_conform_coerces_and_drops_unknown() {
        let value = json!({
            "title": "台中之旅",
            "days": "3天",
            "score": "8.5/10",
            "urgent": "是",
            "tags": "美食",
            "items": [{"label": "a", "count": 2}, {"count": 3}, "junk"],
            "extra": 1
        });
        let r = conform(&value, &SAMPLE).unwrap();
        assert_eq!(r.get_str("title"), "台中之旅");
        assert_eq!(r.get_i64("days"), 3);
        assert_eq!(r.get_f64("score"), 8.5);
        assert!(r.get_bool("urgent"));
        assert_eq!(r.get_list("tags"), &[json!("美食")]);
        assert_eq!(r.get_list("items").len(), 1);
        assert_eq!(r.get_str("level"), "中等");
        assert!(r.get("extra").is_none());
        assert_eq!(r.len(), SAMPLE.fields.len());
    }

    #[test]
    fn test_missing_required_field_fails() {
        let err = conform(&json!({"days": 2}), &SAMPLE).unwrap_err();
        assert_eq!(
            err,
            ConformError::MissingField {
                schema: "sample",
                field: "title"
            }
        );
        assert!(conform(&json!([1, 2]), &SAMPLE).is_err());
    }

    #[test]
    fn test_fallback_record_has_note() {
        let r = SAMPLE.fallback_record("unparseable");
        assert_eq!(r.get_str("error"), "unparseable");
        assert_eq!(r.get_str("title"), "");
        assert_eq!(r.get_i64("days"), 0);
        assert!(r.get_list("items").is_empty());
    }
}
