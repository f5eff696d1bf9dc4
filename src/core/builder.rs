//! 运行时构建器：统一的初始化逻辑
//!
//! 根据配置与环境变量选择模型后端、嵌入提供方、检查点存储并注册能力；
//! 每个组件都可以显式替换（测试注入 mock）。

use std::sync::Arc;
use std::time::Duration;

use crate::agent::RuntimeContext;
use crate::config::AppConfig;
use crate::llm::{
    create_deepseek_client, create_embedder_from_config, EmbeddingProvider, HashingEmbedder,
    LlmClient, OpenAiClient, ScriptedLlmClient,
};
use crate::memory::{
    CheckpointStore, DuplicateDetector, HeuristicTokenizer, InMemoryCheckpointStore,
    InMemoryKnowledge, JsonFileCheckpointStore, KnowledgeBase, Tokenizer,
};
use crate::react::LoopLimits;
use crate::tools::{
    AccommodationSearchTool, AttractionSearchTool, BudgetEstimateTool, KnowledgeLookupTool,
    LocationResolver, LocationTable, MapsClient, RouteTool, ToolExecutor, ToolRegistry,
    WeatherForecastTool,
};

/// 离线运行时的固定回复
const OFFLINE_REPLY: &str = "目前未設定模型 API Key，無法產生回覆。請設定 OPENAI_API_KEY 或 DEEPSEEK_API_KEY。";

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / 离线脚本）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let has_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let has_openai = std::env::var("OPENAI_API_KEY").is_ok();

    if provider == "deepseek" && has_deepseek {
        tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
        Arc::new(create_deepseek_client(Some(&cfg.llm.model)))
    } else if provider != "mock" && has_openai {
        tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
        let mut client = OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        );
        if let Some(t) = cfg.llm.temperature {
            client = client.with_temperature(t);
        }
        Arc::new(client)
    } else {
        tracing::warn!("No API key set or provider is mock, using offline LLM");
        Arc::new(ScriptedLlmClient::new(OFFLINE_REPLY))
    }
}

/// 地名解析器：内建表（可由外部映射扩充），按配置接上模型归纳
fn location_resolver(cfg: &AppConfig, llm: &Arc<dyn LlmClient>) -> LocationResolver {
    let table = match &cfg.tools.location_map_file {
        Some(path) => LocationTable::from_file(path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load location map, using builtin table");
            LocationTable::builtin()
        }),
        None => LocationTable::builtin(),
    };
    tracing::debug!(entries = table.len(), "location table ready");
    let resolver = LocationResolver::new(table);
    if cfg.tools.resolve_locations_with_llm {
        resolver.with_llm(llm.clone(), Duration::from_secs(cfg.llm.timeouts.request))
    } else {
        resolver
    }
}

/// 默认知识库：配置了 knowledge_dir 时启动即载入，载入失败保持为空
pub fn default_knowledge(cfg: &AppConfig) -> Arc<dyn KnowledgeBase> {
    let kb = InMemoryKnowledge::new(cfg.memory.score_threshold);
    if let Some(dir) = &cfg.memory.knowledge_dir {
        if let Err(e) = kb.load_dir(dir, cfg.memory.chunk_options()) {
            tracing::warn!(error = %e, "knowledge directory not loaded, retrieval starts empty");
        }
    }
    Arc::new(kb)
}

/// 默认能力集：预算、天气、住宿、景点、路线、知识检索
pub fn default_tool_registry(
    cfg: &AppConfig,
    llm: &Arc<dyn LlmClient>,
    knowledge: &Arc<dyn KnowledgeBase>,
) -> ToolRegistry {
    let tools_cfg = &cfg.tools;
    let maps = MapsClient::new(&tools_cfg.maps.api_base, tools_cfg.tool_timeout_secs);

    let mut tools = ToolRegistry::new();
    tools.register(BudgetEstimateTool);
    tools.register(
        WeatherForecastTool::new(
            &tools_cfg.weather.api_base,
            tools_cfg.weather.api_key(),
            tools_cfg.tool_timeout_secs,
        )
        .with_resolver(Arc::new(location_resolver(cfg, llm))),
    );
    tools.register(AccommodationSearchTool::new(
        tools_cfg.accommodation.data_file.clone(),
    ));
    tools.register(AttractionSearchTool::new(
        maps.clone(),
        tools_cfg.maps.places_key(),
        tools_cfg.maps.attractions_file.clone(),
    ));
    tools.register(RouteTool::new(maps, tools_cfg.maps.directions_key()));
    tools.register(KnowledgeLookupTool::new(
        knowledge.clone(),
        cfg.memory.retrieval_k,
    ));
    tools
}

pub struct RuntimeBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    knowledge: Option<Arc<dyn KnowledgeBase>>,
    store: Option<Arc<dyn CheckpointStore>>,
    tools: Option<ToolRegistry>,
}

impl RuntimeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            embedder: None,
            tokenizer: None,
            knowledge: None,
            store: None,
            tools: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeBase>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn build(self) -> RuntimeContext {
        let cfg = self.config;

        let llm = self.llm.unwrap_or_else(|| create_llm_from_config(&cfg));
        let embedder: Arc<dyn EmbeddingProvider> = self.embedder.unwrap_or_else(|| {
            create_embedder_from_config(cfg.llm.base_url.as_deref(), &cfg.dedup.embedding_model)
                .unwrap_or_else(|| {
                    tracing::info!("No embedding API key, using local hashing embedder");
                    Arc::new(HashingEmbedder::default())
                })
        });
        let detector = DuplicateDetector::new(embedder)
            .with_threshold(cfg.dedup.threshold)
            .with_timeout(Duration::from_secs(cfg.dedup.timeout_secs));

        let store: Arc<dyn CheckpointStore> = match (self.store, &cfg.app.checkpoint_dir) {
            (Some(store), _) => store,
            (None, Some(dir)) => Arc::new(JsonFileCheckpointStore::new(dir)),
            (None, None) => Arc::new(InMemoryCheckpointStore::new()),
        };
        let knowledge = self.knowledge.unwrap_or_else(|| default_knowledge(&cfg));
        let tokenizer: Arc<dyn Tokenizer> = self
            .tokenizer
            .unwrap_or_else(|| Arc::new(HeuristicTokenizer));
        let tools = self
            .tools
            .unwrap_or_else(|| default_tool_registry(&cfg, &llm, &knowledge));

        RuntimeContext {
            llm,
            detector,
            tokenizer,
            knowledge,
            executor: ToolExecutor::new(tools, cfg.tools.tool_timeout_secs),
            store,
            limits: LoopLimits {
                max_invocations: cfg.agent.max_invocations,
                iteration_ceiling: cfg.agent.iteration_ceiling,
            },
            config: cfg,
        }
    }
}
