//! 天气预报能力（weather_forecast）
//!
//! 调用 OpenWeatherMap 5 日预报接口（3 小时粒度），按城市时区把预报点归到日期，
//! 每天汇总为一条 `weather_item`，整体输出符合 `weather_report` 结构。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use reqwest::Client;
use serde_json::{json, Value};

use crate::schema::{conform, travel::WEATHER_REPORT, Record};
use crate::tools::location::LocationResolver;
use crate::tools::Tool;

pub const DEFAULT_WEATHER_API_BASE: &str = "https://api.openweathermap.org/data/2.5";

/// 免费预报最多覆盖的天数
const MAX_RANGE_DAYS: i64 = 5;

pub struct WeatherForecastTool {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    resolver: Arc<LocationResolver>,
}

impl WeatherForecastTool {
    pub fn new(api_base: &str, api_key: Option<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            resolver: Arc::new(LocationResolver::default()),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<LocationResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    async fn fetch(&self, city: &str) -> Result<Value, String> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| "weather API key not configured".to_string())?;
        let url = format!("{}/forecast", self.api_base);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", city),
                ("appid", key),
                ("units", "metric"),
                ("lang", "zh_tw"),
            ])
            .send()
            .await
            .map_err(|e| format!("weather request failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("weather API returned {status}"));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| format!("invalid weather payload: {e}"))
    }
}

fn parse_date(v: Option<&Value>) -> Result<Option<NaiveDate>, String> {
    match v.and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| format!("invalid date '{s}', expected YYYY-MM-DD")),
    }
}

#[derive(Default)]
struct DayBucket {
    min_temp: Option<f64>,
    max_temp: Option<f64>,
    max_pop: f64,
    descriptions: BTreeMap<String, usize>,
}

impl DayBucket {
    fn add(&mut self, item: &Value) {
        if let Some(t) = item.pointer("/main/temp").and_then(Value::as_f64) {
            self.min_temp = Some(self.min_temp.map_or(t, |m| m.min(t)));
            self.max_temp = Some(self.max_temp.map_or(t, |m| m.max(t)));
        }
        let pop = item.get("pop").and_then(Value::as_f64).unwrap_or(0.0);
        self.max_pop = self.max_pop.max(pop);
        if let Some(d) = item.pointer("/weather/0/description").and_then(Value::as_str) {
            *self.descriptions.entry(d.to_string()).or_default() += 1;
        }
    }

    fn dominant(&self) -> String {
        self.descriptions
            .iter()
            .max_by_key(|(_, n)| **n)
            .map(|(d, _)| d.clone())
            .unwrap_or_default()
    }

    fn temperature(&self) -> String {
        match (self.min_temp, self.max_temp) {
            (Some(lo), Some(hi)) => format!("{:.0}~{:.0}°C", lo, hi),
            _ => String::new(),
        }
    }
}

/// 把 API 返回的预报列表汇总成 weather_report 记录
pub fn build_report(location: &str, start: NaiveDate, end: NaiveDate, payload: &Value) -> Record {
    let offset_secs = payload
        .pointer("/city/timezone")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let offset = FixedOffset::east_opt(offset_secs as i32).unwrap_or(Utc.fix());

    let mut days: BTreeMap<NaiveDate, DayBucket> = BTreeMap::new();
    for item in payload.get("list").and_then(Value::as_array).into_iter().flatten() {
        let Some(ts) = item.get("dt").and_then(Value::as_i64) else {
            continue;
        };
        let Some(at) = DateTime::<Utc>::from_timestamp(ts, 0) else {
            continue;
        };
        let date = at.with_timezone(&offset).date_naive();
        if date < start || date > end {
            continue;
        }
        days.entry(date).or_default().add(item);
    }

    let forecast: Vec<Value> = days
        .iter()
        .map(|(date, bucket)| {
            json!({
                "日期": date.format("%Y-%m-%d").to_string(),
                "天氣": bucket.dominant(),
                "溫度": bucket.temperature(),
                "降雨機率": format!("{:.0}%", bucket.max_pop * 100.0),
            })
        })
        .collect();

    let analysis = if forecast.is_empty() {
        "查無該日期範圍的預報資料（預報僅涵蓋未來 5 天）".to_string()
    } else {
        let rainy: Vec<String> = days
            .iter()
            .filter(|(_, b)| b.max_pop >= 0.5)
            .map(|(d, _)| d.format("%m/%d").to_string())
            .collect();
        if rainy.is_empty() {
            format!("共 {} 天有預報資料，降雨機率偏低，適合安排戶外行程。", forecast.len())
        } else {
            format!(
                "共 {} 天有預報資料，{} 降雨機率較高，建議準備雨具或安排室內備案。",
                forecast.len(),
                rainy.join("、")
            )
        }
    };

    let value = json!({
        "查詢地點": location,
        "查詢日期範圍": format!("{} 至 {}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d")),
        "天氣預報": forecast,
        "整體分析": analysis,
    });
    conform(&value, &WEATHER_REPORT).unwrap_or_else(|_| WEATHER_REPORT.default_record())
}

#[async_trait]
impl Tool for WeatherForecastTool {
    fn name(&self) -> &str {
        "weather_forecast"
    }

    fn description(&self) -> &str {
        "Weather forecast for a city over a date range (up to 5 days ahead). Args: {\"location\": \"台中\", \"start_date\": \"YYYY-MM-DD\", \"end_date\": \"YYYY-MM-DD\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": {"type": "string"},
                "start_date": {"type": "string", "format": "date"},
                "end_date": {"type": "string", "format": "date"}
            },
            "required": ["location"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let location = args
            .get("location")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "location is required".to_string())?;
        let city = self
            .resolver
            .resolve(location)
            .await
            .ok_or_else(|| format!("unknown location '{location}'"))?;

        let start = parse_date(args.get("start_date"))?.unwrap_or_else(|| Utc::now().date_naive());
        let end = parse_date(args.get("end_date"))?.unwrap_or(start);
        if end < start {
            return Err("end_date is before start_date".to_string());
        }
        let end = clamp_range_end(start, end);

        let payload = self.fetch(&city).await?;
        Ok(build_report(location, start, end, &payload).to_pretty_text())
    }
}

/// 结束日期最多比开始日期晚 `MAX_RANGE_DAYS - 1` 天；日期越界时退回开始日期
fn clamp_range_end(start: NaiveDate, end: NaiveDate) -> NaiveDate {
    let limit = start
        .checked_add_signed(chrono::Duration::days(MAX_RANGE_DAYS - 1))
        .unwrap_or(start);
    end.min(limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn payload() -> Value {
        // 2024-05-01 00:00 UTC = 1714521600；城市时区 +8
        json!({
            "city": {"timezone": 28800},
            "list": [
                {"dt": 1714521600, "main": {"temp": 24.2}, "pop": 0.1, "weather": [{"description": "晴"}]},
                {"dt": 1714532400, "main": {"temp": 30.6}, "pop": 0.0, "weather": [{"description": "晴"}]},
                {"dt": 1714608000, "main": {"temp": 22.0}, "pop": 0.8, "weather": [{"description": "小雨"}]},
                {"dt": 1714780800, "main": {"temp": 20.0}, "pop": 0.2, "weather": [{"description": "多雲"}]}
            ]
        })
    }

    #[test]
    fn test_build_report_groups_by_local_date() {
        let r = build_report("台中", date("2024-05-01"), date("2024-05-02"), &payload());
        assert_eq!(r.get_str("查詢地點"), "台中");
        let items = r.get_list("天氣預報");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["日期"], "2024-05-01");
        assert_eq!(items[0]["天氣"], "晴");
        assert_eq!(items[0]["溫度"], "24~31°C");
        assert_eq!(items[1]["降雨機率"], "80%");
        assert!(r.get_str("整體分析").contains("05/02"));
    }

    #[test]
    fn test_clamp_range_end() {
        assert_eq!(clamp_range_end(date("2024-05-01"), date("2024-05-20")), date("2024-05-05"));
        assert_eq!(clamp_range_end(date("2024-05-01"), date("2024-05-02")), date("2024-05-02"));
        assert_eq!(clamp_range_end(NaiveDate::MAX, NaiveDate::MAX), NaiveDate::MAX);
    }

    #[test]
    fn test_build_report_without_data() {
        let r = build_report("台中", date("2030-01-01"), date("2030-01-01"), &payload());
        assert!(r.get_list("天氣預報").is_empty());
        assert!(!r.get_str("整體分析").is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_is_an_error() {
        let tool = WeatherForecastTool::new(DEFAULT_WEATHER_API_BASE, None, 5);
        let err = tool
            .execute(json!({"location": "台中", "start_date": "2024-05-01"}))
            .await
            .unwrap_err();
        assert!(err.contains("key"));
    }

    #[tokio::test]
    async fn test_bad_arguments() {
        let tool = WeatherForecastTool::new(DEFAULT_WEATHER_API_BASE, Some("k".into()), 5);
        assert!(tool.execute(json!({})).await.is_err());
        assert!(tool.execute(json!({"location": "火星"})).await.is_err());
        assert!(tool
            .execute(json!({"location": "台中", "start_date": "05/01"}))
            .await
            .is_err());
    }
}
