//! Google Maps 系能力：景点搜索（search_attractions）与路线规划（calculate_route）
//!
//! 两者共用一个带超时的 reqwest 客户端。景点搜索在 API 不可用时改查本地景点资料
//! （JSON 数组，按 name / type 关键字匹配）；路线规划没有本地替代，失败直接回报错误。

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};

use crate::tools::Tool;

pub const DEFAULT_MAPS_API_BASE: &str = "https://maps.googleapis.com/maps/api";

const TOP_K: usize = 5;
const ROUTE_MODES: &[&str] = &["transit", "driving", "walking", "bicycling"];

#[derive(Clone)]
pub struct MapsClient {
    client: Client,
    api_base: String,
}

impl MapsClient {
    pub fn new(api_base: &str, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, String> {
        let url = format!("{}/{}", self.api_base, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| format!("maps request failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("maps API returned {status}"));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| format!("invalid maps payload: {e}"))
    }
}

fn api_status(payload: &Value) -> &str {
    payload.get("status").and_then(Value::as_str).unwrap_or("UNKNOWN")
}

fn arg_text<'a>(args: &'a Value, key: &str) -> &'a str {
    args.get(key).and_then(Value::as_str).map(str::trim).unwrap_or("")
}

/// Places Text Search 结果 → 精简的景点清单
pub fn summarize_places(payload: &Value, top_k: usize) -> Result<Vec<Value>, String> {
    let status = api_status(payload);
    if status != "OK" && status != "ZERO_RESULTS" {
        return Err(format!("places API status {status}"));
    }
    let places = payload.get("results").and_then(Value::as_array);
    Ok(places
        .into_iter()
        .flatten()
        .take(top_k)
        .map(|place| {
            let types: Vec<&str> = place
                .get("types")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .collect();
            json!({
                "name": place.get("name").and_then(Value::as_str).unwrap_or("未知景點"),
                "type": types.join(", "),
                "location": place.get("formatted_address").and_then(Value::as_str).unwrap_or(""),
                "rating": place.get("rating").cloned().unwrap_or(Value::Null),
                "user_ratings_total": place.get("user_ratings_total").and_then(Value::as_u64).unwrap_or(0),
            })
        })
        .collect())
}

/// 本地景点资料按 name / type 关键字匹配
pub fn match_local_attractions(items: &[Value], query: &str, top_k: usize) -> Vec<Value> {
    let needle = query.trim().to_lowercase();
    items
        .iter()
        .filter(|item| {
            ["name", "type"].iter().any(|key| {
                item.get(*key)
                    .and_then(Value::as_str)
                    .is_some_and(|v| v.to_lowercase().contains(&needle))
            })
        })
        .take(top_k)
        .cloned()
        .collect()
}

pub struct AttractionSearchTool {
    maps: MapsClient,
    api_key: Option<String>,
    local_file: Option<PathBuf>,
}

impl AttractionSearchTool {
    pub fn new(maps: MapsClient, api_key: Option<String>, local_file: Option<PathBuf>) -> Self {
        Self {
            maps,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            local_file,
        }
    }

    async fn search_api(&self, query: &str) -> Result<Vec<Value>, String> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| "places API key not configured".to_string())?;
        let payload = self
            .maps
            .get(
                "place/textsearch/json",
                &[("query", query), ("key", key), ("language", "zh-TW")],
            )
            .await?;
        summarize_places(&payload, TOP_K)
    }

    async fn search_local(&self, query: &str) -> Vec<Value> {
        let Some(path) = &self.local_file else {
            return Vec::new();
        };
        match tokio::fs::read_to_string(path).await {
            Ok(data) => match serde_json::from_str::<Vec<Value>>(&data) {
                Ok(items) => match_local_attractions(&items, query, TOP_K),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "invalid attractions data");
                    Vec::new()
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "attractions data unreadable");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Tool for AttractionSearchTool {
    fn name(&self) -> &str {
        "search_attractions"
    }

    fn description(&self) -> &str {
        "Search attractions, activities or food spots by free-text query. Args: {\"query\": \"台中 夜市\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let query = arg_text(&args, "query");
        if query.is_empty() {
            return Err("query is required".to_string());
        }
        let (source, results) = match self.search_api(query).await {
            Ok(results) => ("google_places_api", results),
            Err(api_err) => {
                let local = self.search_local(query).await;
                if local.is_empty() {
                    return Err(api_err);
                }
                tracing::info!(query, error = %api_err, "places API unavailable, using local attractions");
                ("local_data", local)
            }
        };
        let out = json!({
            "query": query,
            "source": source,
            "summary": format!("共找到 {} 筆景點/活動推薦", results.len()),
            "results": results,
        });
        serde_json::to_string_pretty(&out).map_err(|e| e.to_string())
    }
}

fn strip_html(text: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid html tag regex"));
    re.replace_all(text, "").trim().to_string()
}

/// Directions 结果 → 第一条路线第一段的距离、时间与首个步骤
pub fn summarize_route(origin: &str, destination: &str, mode: &str, payload: &Value) -> Result<Value, String> {
    let status = api_status(payload);
    if status != "OK" {
        return Err(format!("路線查詢失敗：{status}"));
    }
    let leg = payload
        .pointer("/routes/0/legs/0")
        .ok_or_else(|| "路線查詢失敗：no route".to_string())?;
    let text_at = |ptr: &str| leg.pointer(ptr).and_then(Value::as_str).unwrap_or("").to_string();
    let first_step = leg
        .pointer("/steps/0/html_instructions")
        .and_then(Value::as_str)
        .map(strip_html)
        .unwrap_or_else(|| "無".to_string());
    Ok(json!({
        "起點": origin,
        "終點": destination,
        "交通方式": mode,
        "距離": text_at("/distance/text"),
        "預估時間": text_at("/duration/text"),
        "詳細路線": first_step,
    }))
}

pub struct RouteTool {
    maps: MapsClient,
    api_key: Option<String>,
}

impl RouteTool {
    pub fn new(maps: MapsClient, api_key: Option<String>) -> Self {
        Self {
            maps,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }
}

#[async_trait]
impl Tool for RouteTool {
    fn name(&self) -> &str {
        "calculate_route"
    }

    fn description(&self) -> &str {
        "Travel distance and duration between two places. Args: {\"origin\": \"台中車站\", \"destination\": \"高美濕地\", \"mode\": \"transit|driving|walking|bicycling\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "origin": {"type": "string"},
                "destination": {"type": "string"},
                "mode": {"type": "string", "enum": ROUTE_MODES}
            },
            "required": ["origin", "destination"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let origin = arg_text(&args, "origin");
        let destination = arg_text(&args, "destination");
        if origin.is_empty() || destination.is_empty() {
            return Err("origin and destination are required".to_string());
        }
        let mode = match arg_text(&args, "mode") {
            "" => "transit",
            m if ROUTE_MODES.contains(&m) => m,
            other => return Err(format!("unsupported mode '{other}'")),
        };
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| "directions API key not configured".to_string())?;
        let payload = self
            .maps
            .get(
                "directions/json",
                &[
                    ("origin", origin),
                    ("destination", destination),
                    ("mode", mode),
                    ("language", "zh-TW"),
                    ("key", key),
                ],
            )
            .await?;
        let out = summarize_route(origin, destination, mode, &payload)?;
        serde_json::to_string_pretty(&out).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn maps() -> MapsClient {
        MapsClient::new("http://127.0.0.1:9", 1)
    }

    #[test]
    fn test_summarize_places() {
        let payload = json!({
            "status": "OK",
            "results": [
                {"name": "高美濕地", "types": ["park", "tourist_attraction"], "formatted_address": "台中市清水區", "rating": 4.6, "user_ratings_total": 30000},
                {"name": "彩虹眷村"}
            ]
        });
        let places = summarize_places(&payload, 5).unwrap();
        assert_eq!(places.len(), 2);
        assert_eq!(places[0]["type"], "park, tourist_attraction");
        assert_eq!(places[1]["rating"], Value::Null);
        assert!(summarize_places(&json!({"status": "REQUEST_DENIED"}), 5).is_err());
        assert!(summarize_places(&json!({"status": "ZERO_RESULTS"}), 5).unwrap().is_empty());
    }

    #[test]
    fn test_match_local_attractions() {
        let items = vec![
            json!({"name": "逢甲夜市", "type": "夜市"}),
            json!({"name": "高美濕地", "type": "自然景觀"}),
        ];
        assert_eq!(match_local_attractions(&items, "夜市", 5).len(), 1);
        assert_eq!(match_local_attractions(&items, "濕地", 5)[0]["name"], "高美濕地");
    }

    #[test]
    fn test_summarize_route() {
        let payload = json!({
            "status": "OK",
            "routes": [{"legs": [{
                "distance": {"text": "25.3 公里"},
                "duration": {"text": "45 分鐘"},
                "steps": [{"html_instructions": "往<b>西</b>走"}]
            }]}]
        });
        let out = summarize_route("台中車站", "高美濕地", "driving", &payload).unwrap();
        assert_eq!(out["距離"], "25.3 公里");
        assert_eq!(out["詳細路線"], "往西走");
        assert!(summarize_route("a", "b", "transit", &json!({"status": "NOT_FOUND"})).is_err());
    }

    #[tokio::test]
    async fn test_attractions_fall_back_to_local_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attractions.json");
        std::fs::write(&path, r#"[{"name": "逢甲夜市", "type": "夜市"}]"#).unwrap();

        let tool = AttractionSearchTool::new(maps(), None, Some(path));
        let v: Value =
            serde_json::from_str(&tool.execute(json!({"query": "夜市"})).await.unwrap()).unwrap();
        assert_eq!(v["source"], "local_data");
        assert_eq!(v["results"][0]["name"], "逢甲夜市");

        let err = tool.execute(json!({"query": "滑雪"})).await.unwrap_err();
        assert!(err.contains("not configured"));
    }

    #[tokio::test]
    async fn test_route_argument_checks() {
        let tool = RouteTool::new(maps(), None);
        assert!(tool.execute(json!({"origin": "a"})).await.is_err());
        let err = tool
            .execute(json!({"origin": "a", "destination": "b", "mode": "flying"}))
            .await
            .unwrap_err();
        assert!(err.contains("unsupported mode"));
        let err = tool
            .execute(json!({"origin": "a", "destination": "b"}))
            .await
            .unwrap_err();
        assert!(err.contains("not configured"));
    }
}
