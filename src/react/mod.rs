//! 能力循环：Planner（模型调用与能力请求解析）、有界循环、过程事件

pub mod events;
pub mod loop_;
pub mod planner;

pub use events::ReactEvent;
pub use loop_::{
    CapabilityInvocation, CapabilityLoop, InvocationOutcome, LoopLimits, LoopOutcome, StopReason,
};
pub use planner::{parse_llm_output, Planner, PlannerOutput, ToolCall};
