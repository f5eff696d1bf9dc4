//! 地名标准化：中文地名 → 天气 API 可识别的英文城市名
//!
//! 输入已是 ASCII 时原样返回；否则先统一「臺 → 台」，再按表找输入中包含的城市名，
//! 因此「台中市區」「台北車站附近」「台中溫泉會館」都能落到对应城市。
//! 映射表可由外部 JSON（`{"中文": "English"}`）扩充；表里查不到时可选地让模型先归纳出城市名再查一次。

use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::llm::LlmClient;
use crate::memory::Message;

const BUILTIN_LOCATIONS: &[(&str, &str)] = &[
    ("台中", "Taichung"),
    ("台北", "Taipei"),
    ("高雄", "Kaohsiung"),
    ("台南", "Tainan"),
    ("新竹", "Hsinchu"),
    ("嘉義", "Chiayi"),
    ("彰化", "Changhua"),
    ("屏東", "Pingtung"),
    ("花蓮", "Hualien"),
    ("台東", "Taitung"),
    ("宜蘭", "Yilan"),
    ("桃園", "Taoyuan"),
    ("苗栗", "Miaoli"),
    ("南投", "Nantou"),
    ("雲林", "Yunlin"),
    ("基隆", "Keelung"),
    ("新北", "New Taipei City"),
    ("新潟", "Niigata"),
    ("湯澤", "Niigata"),
    ("東京", "Tokyo"),
    ("大阪", "Osaka"),
    ("京都", "Kyoto"),
    ("北海道", "Sapporo"),
    ("札幌", "Sapporo"),
];

pub const LOCATION_PROMPT: &str = "請將以下地名標準化為「城市名稱」（繁體中文）。\n\
規則：\n\
- 若輸入包含「市區」、「車站」、「附近」等修飾詞，請提取主要城市名稱\n\
- 若輸入為景點名稱（如「台中溫泉會館」、「湯澤滑雪場」），請提取所在城市\n\
- 只回傳城市名稱，不要加任何說明或標點符號\n\
範例：「台中市區」→ 台中；「台北車站附近」→ 台北；「湯澤滑雪場」→ 新潟";

#[derive(Debug, Clone)]
pub struct LocationTable {
    entries: Vec<(String, String)>,
}

impl Default for LocationTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LocationTable {
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN_LOCATIONS
                .iter()
                .map(|(zh, en)| (zh.to_string(), en.to_string()))
                .collect(),
        }
    }

    /// 内建表 + 外部 JSON 映射；同名时外部覆盖内建
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| format!("location map {}: {e}", path.display()))?;
        let extra: std::collections::BTreeMap<String, String> = serde_json::from_str(&data)
            .map_err(|e| format!("location map {}: {e}", path.display()))?;
        let mut table = Self::builtin();
        for (zh, en) in extra {
            let zh = zh.trim().replace('臺', "台");
            let en = en.trim().to_string();
            if zh.is_empty() || en.is_empty() {
                continue;
            }
            table.entries.retain(|(k, _)| *k != zh);
            table.entries.push((zh, en));
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 查表；ASCII 输入原样返回，查不到返回 None
    pub fn lookup(&self, location: &str) -> Option<String> {
        let location = location.trim();
        if location.is_empty() {
            return None;
        }
        if location.is_ascii() {
            return Some(location.to_string());
        }
        let normalized = location.replace('臺', "台");
        // 多个命中时取在输入中最早出现的城市，同位置取较长的键
        self.entries
            .iter()
            .filter_map(|(zh, en)| normalized.find(zh.as_str()).map(|pos| (pos, zh.len(), en)))
            .min_by_key(|(pos, len, _)| (*pos, std::cmp::Reverse(*len)))
            .map(|(_, _, en)| en.clone())
    }
}

/// 只用内建表标准化
pub fn standardize(location: &str) -> Option<String> {
    static TABLE: OnceLock<LocationTable> = OnceLock::new();
    TABLE.get_or_init(LocationTable::builtin).lookup(location)
}

/// 查表 + 可选的模型归纳
pub struct LocationResolver {
    table: LocationTable,
    llm: Option<Arc<dyn LlmClient>>,
    timeout: Duration,
}

impl Default for LocationResolver {
    fn default() -> Self {
        Self::new(LocationTable::builtin())
    }
}

impl LocationResolver {
    pub fn new(table: LocationTable) -> Self {
        Self {
            table,
            llm: None,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        self.llm = Some(llm);
        self.timeout = timeout;
        self
    }

    pub async fn resolve(&self, location: &str) -> Option<String> {
        if let Some(city) = self.table.lookup(location) {
            return Some(city);
        }
        let llm = self.llm.as_ref()?;
        let messages = [
            Message::system(LOCATION_PROMPT),
            Message::user(format!("輸入：{}\n輸出：", location.trim())),
        ];
        let reply = match tokio::time::timeout(self.timeout, llm.complete(&messages)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                tracing::warn!(location, error = %e, "location normalization failed");
                return None;
            }
            Err(_) => {
                tracing::warn!(location, "location normalization timed out");
                return None;
            }
        };
        let city: String = reply
            .chars()
            .filter(|c| !matches!(c, '「' | '」' | '。' | '\n' | '\r'))
            .collect();
        let city = city.trim();
        tracing::debug!(location, city, "location normalized by model");
        self.table.lookup(city)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    #[test]
    fn test_standardize() {
        assert_eq!(standardize("台中").as_deref(), Some("Taichung"));
        assert_eq!(standardize("臺中市區").as_deref(), Some("Taichung"));
        assert_eq!(standardize("台北車站附近").as_deref(), Some("Taipei"));
        assert_eq!(standardize("新北市板橋").as_deref(), Some("New Taipei City"));
        assert_eq!(standardize("湯澤滑雪場").as_deref(), Some("Niigata"));
        assert_eq!(standardize("Osaka").as_deref(), Some("Osaka"));
        assert_eq!(standardize("火星"), None);
        assert_eq!(standardize("  "), None);
    }

    #[test]
    fn test_external_map_extends_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locations.json");
        std::fs::write(&path, r#"{"首爾": "Seoul", "台中": "Taichung City", "": "x"}"#).unwrap();
        let table = LocationTable::from_file(&path).unwrap();
        assert_eq!(table.lookup("首爾明洞").as_deref(), Some("Seoul"));
        assert_eq!(table.lookup("台中").as_deref(), Some("Taichung City"));
        assert_eq!(table.lookup("高雄").as_deref(), Some("Kaohsiung"));
        assert_eq!(table.len(), BUILTIN_LOCATIONS.len() + 1);

        std::fs::write(&path, "not json").unwrap();
        assert!(LocationTable::from_file(&path).is_err());
    }

    #[tokio::test]
    async fn test_resolver_asks_model_for_unknown_place() {
        let llm = Arc::new(ScriptedLlmClient::new("unused").on(LOCATION_PROMPT, "「新潟」"));
        let resolver =
            LocationResolver::default().with_llm(llm.clone(), Duration::from_secs(5));
        assert_eq!(resolver.resolve("苗場滑雪場").await.as_deref(), Some("Niigata"));
        assert_eq!(resolver.resolve("台中").await.as_deref(), Some("Taichung"));
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_resolver_without_model_or_on_error() {
        assert_eq!(LocationResolver::default().resolve("火星").await, None);

        let llm = Arc::new(ScriptedLlmClient::new("unused").on_error(LOCATION_PROMPT, "down"));
        let resolver = LocationResolver::default().with_llm(llm, Duration::from_secs(5));
        assert_eq!(resolver.resolve("火星").await, None);
    }
}
