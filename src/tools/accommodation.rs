//! 住宿查询能力（search_accommodation）
//!
//! 从本地住宿资料（JSON 数组，每项含 name / location / rating / price / features）按地点关键字筛选，
//! 最多回传 5 家；未配置资料文件或文件读不了时使用内建的推荐清单。

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tools::Tool;

const MAX_RESULTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lodging {
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub features: Vec<String>,
}

fn builtin_lodgings() -> Vec<Lodging> {
    vec![
        Lodging {
            name: "台中溫泉會館".into(),
            location: "台中".into(),
            rating: Some(4.5),
            price: "NT$ 3,500/晚".into(),
            features: vec!["溫泉".into(), "早餐".into(), "免費停車".into()],
        },
        Lodging {
            name: "市區商務飯店".into(),
            location: String::new(),
            rating: Some(4.2),
            price: "NT$ 2,200/晚".into(),
            features: vec!["近捷運".into(), "健身房".into(), "商務中心".into()],
        },
    ]
}

/// 地点关键字（不分大小写）出现在住宿的 location 中才保留
pub fn filter_lodgings(all: Vec<Lodging>, location: &str) -> Vec<Lodging> {
    let needle = location.trim().to_lowercase();
    all.into_iter()
        .filter(|h| h.location.to_lowercase().contains(&needle))
        .take(MAX_RESULTS)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct AccommodationSearchTool {
    data_file: Option<PathBuf>,
}

impl AccommodationSearchTool {
    pub fn new(data_file: Option<PathBuf>) -> Self {
        Self { data_file }
    }

    async fn candidates(&self, location: &str) -> Vec<Lodging> {
        let Some(path) = &self.data_file else {
            return builtin_lodgings();
        };
        let parsed = match tokio::fs::read_to_string(path).await {
            Ok(data) => serde_json::from_str::<Vec<Lodging>>(&data).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match parsed {
            Ok(all) => filter_lodgings(all, location),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "accommodation data unreadable, using builtin list");
                builtin_lodgings()
            }
        }
    }
}

fn arg_text<'a>(args: &'a Value, key: &str) -> &'a str {
    args.get(key).and_then(Value::as_str).map(str::trim).unwrap_or("")
}

#[async_trait]
impl Tool for AccommodationSearchTool {
    fn name(&self) -> &str {
        "search_accommodation"
    }

    fn description(&self) -> &str {
        "Recommend lodging for a location and stay dates. Args: {\"location\": \"台中\", \"checkin\": \"YYYY-MM-DD\", \"checkout\": \"YYYY-MM-DD\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": {"type": "string"},
                "checkin": {"type": "string", "format": "date"},
                "checkout": {"type": "string", "format": "date"}
            },
            "required": ["location"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let location = arg_text(&args, "location");
        if location.is_empty() {
            return Err("location is required".to_string());
        }
        let hotels = self.candidates(location).await;
        let out = json!({
            "地點": location,
            "入住日期": arg_text(&args, "checkin"),
            "退房日期": arg_text(&args, "checkout"),
            "推薦住宿": hotels,
            "來源": "本地資料",
        });
        serde_json::to_string_pretty(&out).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lodging(name: &str, location: &str) -> Lodging {
        Lodging {
            name: name.into(),
            location: location.into(),
            rating: None,
            price: String::new(),
            features: Vec::new(),
        }
    }

    #[test]
    fn test_filter_by_location_keyword() {
        let all = vec![
            lodging("A", "Taichung West"),
            lodging("B", "台北信義"),
            lodging("C", "taichung station"),
        ];
        let names: Vec<String> = filter_lodgings(all, "TAICHUNG")
            .into_iter()
            .map(|h| h.name)
            .collect();
        assert_eq!(names, vec!["A", "C"]);
    }

    #[tokio::test]
    async fn test_without_data_file_uses_builtin_list() {
        let out = AccommodationSearchTool::default()
            .execute(json!({"location": "台中", "checkin": "2024-05-01", "checkout": "2024-05-02"}))
            .await
            .unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["推薦住宿"].as_array().unwrap().len(), 2);
        assert_eq!(v["入住日期"], "2024-05-01");
        assert_eq!(v["來源"], "本地資料");
    }

    #[tokio::test]
    async fn test_data_file_is_filtered_and_capped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accommodations.json");
        let mut hotels: Vec<Lodging> = (0..7).map(|i| lodging(&format!("台中{i}"), "台中")).collect();
        hotels.push(lodging("高雄港景", "高雄"));
        std::fs::write(&path, serde_json::to_string(&hotels).unwrap()).unwrap();

        let tool = AccommodationSearchTool::new(Some(path));
        let v: Value =
            serde_json::from_str(&tool.execute(json!({"location": "台中"})).await.unwrap()).unwrap();
        assert_eq!(v["推薦住宿"].as_array().unwrap().len(), MAX_RESULTS);

        let v: Value =
            serde_json::from_str(&tool.execute(json!({"location": "花蓮"})).await.unwrap()).unwrap();
        assert!(v["推薦住宿"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_location_is_an_error() {
        assert!(AccommodationSearchTool::default().execute(json!({})).await.is_err());
    }
}
