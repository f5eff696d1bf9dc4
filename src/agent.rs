//! 运行时上下文
//!
//! 一次构建（见 `core::builder::RuntimeBuilder`），以引用传给各阶段与编排器：
//! 模型客户端、重复检测器、Tokenizer、知识库、能力执行器、检查点存储与配置。
//! 没有全局客户端，测试可以整套替换为 mock。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::{complete_within, LlmClient};
use crate::memory::{
    CheckpointStore, DuplicateDetector, KnowledgeBase, Message, TokenBudgeter, Tokenizer,
};
use crate::react::LoopLimits;
use crate::tools::ToolExecutor;

pub struct RuntimeContext {
    pub llm: Arc<dyn LlmClient>,
    pub detector: DuplicateDetector,
    pub tokenizer: Arc<dyn Tokenizer>,
    pub knowledge: Arc<dyn KnowledgeBase>,
    pub executor: ToolExecutor,
    pub store: Arc<dyn CheckpointStore>,
    pub limits: LoopLimits,
    pub config: AppConfig,
}

impl RuntimeContext {
    /// 单次模型调用超时
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.llm.timeouts.request)
    }

    /// 计费模型名：[budget].model，未设置时用 [llm].model
    pub fn budget_model(&self) -> &str {
        self.config
            .budget
            .model
            .as_deref()
            .unwrap_or(&self.config.llm.model)
    }

    pub fn budgeter(&self) -> TokenBudgeter<'_> {
        let budgeter = TokenBudgeter::new(self.tokenizer.as_ref(), self.budget_model());
        match self.config.budget.ceiling {
            Some(ceiling) => budgeter.with_ceiling(ceiling),
            None => budgeter,
        }
    }

    /// 带超时的模型调用
    pub async fn invoke(&self, messages: &[Message]) -> Result<String, AgentError> {
        complete_within(self.llm.as_ref(), messages, self.request_timeout()).await
    }
}
