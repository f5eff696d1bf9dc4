//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TRIPMATE__*` 覆盖（双下划线表示嵌套，如 `TRIPMATE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub budget: BudgetSection,
    pub agent: AgentSection,
    pub dedup: DedupSection,
    pub tools: ToolsSection,
    pub stages: StagesSection,
    pub memory: MemorySection,
}

/// [app] 段：整轮重试次数、检查点目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 传输类错误时整轮最多尝试次数
    pub max_turn_attempts: usize,
    /// 未设置时检查点只保存在内存
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_turn_attempts: 3,
            checkpoint_dir: None,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock；有 API Key 时才会真正连线
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            base_url: None,
            temperature: Some(0.2),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次模型调用超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [budget] 段：计费模型名与可选的上限覆盖
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BudgetSection {
    /// 查上限表用的模型名，未设置时用 llm.model
    pub model: Option<String>,
    pub ceiling: Option<usize>,
}

/// [agent] 段：能力循环上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_invocations: usize,
    pub iteration_ceiling: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_invocations: crate::react::loop_::DEFAULT_MAX_INVOCATIONS,
            iteration_ceiling: crate::react::loop_::DEFAULT_ITERATION_CEILING,
        }
    }
}

/// [dedup] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupSection {
    pub enabled: bool,
    pub threshold: f32,
    pub embedding_model: String,
    pub timeout_secs: u64,
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: crate::memory::DEFAULT_DUPLICATE_THRESHOLD,
            embedding_model: "text-embedding-3-small".to_string(),
            timeout_secs: 15,
        }
    }
}

/// [tools] 段：工具超时、地名映射与各外部 API
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 外部地名映射 JSON（`{"中文": "English"}`），与内建表合并
    pub location_map_file: Option<PathBuf>,
    /// 地名查表失败时让模型归纳城市名
    pub resolve_locations_with_llm: bool,
    pub weather: WeatherSection,
    pub maps: MapsSection,
    pub accommodation: AccommodationSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            location_map_file: None,
            resolve_locations_with_llm: true,
            weather: WeatherSection::default(),
            maps: MapsSection::default(),
            accommodation: AccommodationSection::default(),
        }
    }
}

fn key_from_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|k| !k.trim().is_empty())
}

/// [tools.weather] 段：API Key 从 `api_key_env` 指定的环境变量读取
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeatherSection {
    pub api_base: String,
    pub api_key_env: String,
}

impl Default for WeatherSection {
    fn default() -> Self {
        Self {
            api_base: crate::tools::DEFAULT_WEATHER_API_BASE.to_string(),
            api_key_env: "OPENWEATHER_API_KEY".to_string(),
        }
    }
}

impl WeatherSection {
    pub fn api_key(&self) -> Option<String> {
        key_from_env(&self.api_key_env)
    }
}

/// [tools.maps] 段：景点搜索与路线规划
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MapsSection {
    pub api_base: String,
    pub places_key_env: String,
    pub directions_key_env: String,
    /// API 不可用时改查的本地景点资料
    pub attractions_file: Option<PathBuf>,
}

impl Default for MapsSection {
    fn default() -> Self {
        Self {
            api_base: crate::tools::DEFAULT_MAPS_API_BASE.to_string(),
            places_key_env: "GOOGLE_PLACES_API_KEY".to_string(),
            directions_key_env: "GOOGLE_DIRECTIONS_API_KEY".to_string(),
            attractions_file: None,
        }
    }
}

impl MapsSection {
    pub fn places_key(&self) -> Option<String> {
        key_from_env(&self.places_key_env)
    }

    pub fn directions_key(&self) -> Option<String> {
        key_from_env(&self.directions_key_env)
    }
}

/// [tools.accommodation] 段：未设置资料文件时使用内建清单
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccommodationSection {
    pub data_file: Option<PathBuf>,
}

/// [stages] 段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StagesSection {
    /// 规划后总是评估行程（与意图中的 need_evaluation 取或）
    pub evaluate_plans: bool,
}

/// [memory] 段：对话摘要与知识检索
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub summarize_turns: bool,
    pub retrieval_k: usize,
    pub score_threshold: f32,
    /// 启动时载入的知识文件目录（`.txt` / `.md`）
    pub knowledge_dir: Option<PathBuf>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        let chunks = crate::memory::ChunkOptions::default();
        Self {
            summarize_turns: true,
            retrieval_k: 3,
            score_threshold: 0.05,
            knowledge_dir: None,
            chunk_size: chunks.chunk_size,
            chunk_overlap: chunks.chunk_overlap,
        }
    }
}

impl MemorySection {
    pub fn chunk_options(&self) -> crate::memory::ChunkOptions {
        crate::memory::ChunkOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }
}

/// 从 config 目录加载配置，环境变量 TRIPMATE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TRIPMATE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TRIPMATE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
