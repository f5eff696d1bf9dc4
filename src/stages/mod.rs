//! 对话阶段：推荐、行程规划、行程评估，以及回复渲染与去重
//!
//! 每个阶段只写自己的结果槽与 `current_stage`，返回本阶段的候选回复文本；
//! Turn 日志由编排器追加。

pub mod evaluator;
pub mod itinerary;
pub mod recommendation;
pub mod reply;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::agent::RuntimeContext;
use crate::core::AgentError;
use crate::memory::Message;
use crate::react::ReactEvent;

pub use evaluator::{run_evaluator, EVALUATOR_PROMPT};
pub use itinerary::{planner_system_prompt, run_planner, PLANNER_DIRECTIVE};
pub use recommendation::{apply_intent, run_recommendation, INTENT_PROMPT};
pub use reply::{render_evaluation, render_itinerary, summarize, vet_reply};

/// 单轮执行范围：运行时上下文 + 本轮取消令牌 + 可选事件通道
#[derive(Clone, Copy)]
pub struct TurnScope<'a> {
    pub ctx: &'a RuntimeContext,
    pub cancel: &'a CancellationToken,
    pub events: Option<&'a UnboundedSender<ReactEvent>>,
}

impl<'a> TurnScope<'a> {
    pub fn new(ctx: &'a RuntimeContext, cancel: &'a CancellationToken) -> Self {
        Self {
            ctx,
            cancel,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<&'a UnboundedSender<ReactEvent>>) -> Self {
        self.events = events;
        self
    }

    /// 可取消的模型调用
    pub async fn invoke(&self, messages: &[Message]) -> Result<String, AgentError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            out = self.ctx.invoke(messages) => out,
        }
    }

    pub fn emit(&self, event: ReactEvent) {
        if let Some(tx) = self.events {
            let _ = tx.send(event);
        }
    }
}
