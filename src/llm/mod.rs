//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / 脚本化 Mock）以及嵌入提供方

pub mod deepseek;
pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT};
pub use embedding::{
    create_embedder_from_config, EmbeddingProvider, HashingEmbedder, OpenAiEmbedder,
};
pub use mock::{ScriptedLlmClient, StaticEmbedder};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{complete_within, LlmClient};
