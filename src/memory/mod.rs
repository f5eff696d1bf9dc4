//! 上下文层：模型消息、Token 计数与预算、prompt 组装、知识检索、重复回复检测、会话检查点

pub mod conversation;
pub mod duplicate;
pub mod knowledge;
pub mod persistence;
pub mod prompt;
pub mod token_budget;
pub mod tokenizer;

pub use conversation::{format_transcript, Message, Role};
pub use duplicate::{
    cosine_similarity, DuplicateDetector, DuplicateVerdict, DEFAULT_DUPLICATE_THRESHOLD,
};
pub use knowledge::{
    chunk_text, format_documents, ChunkOptions, InMemoryKnowledge, KnowledgeBase, NoopKnowledge,
    RetrievedDoc,
};
pub use persistence::{CheckpointStore, InMemoryCheckpointStore, JsonFileCheckpointStore};
pub use prompt::{build_prefix, ContextDetail, SYSTEM_PROMPT};
pub use token_budget::{BudgetedPrompt, TokenBudgeter, ELISION_MARKER};
pub use tokenizer::{model_token_limit, HeuristicTokenizer, Tokenizer};
