//! 有界能力循环
//!
//! 模型 → 解析 → 执行能力 → 观察 → 下一次模型调用。两个上限显式传入：
//! `max_invocations`（能力调用次数）与 `iteration_ceiling`（模型调用次数，包含纯推理步）。
//! 能力失败不重试：错误作为观察写回，并要求模型用已有资料直接给出最终回答。
//! 到达上限后模型仍请求能力时，在本地用已收集的观察拼出回答。
//! 能力错误不会向外传播；模型传输错误与取消会。

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::memory::{Message, TokenBudgeter};
use crate::react::events::{preview, send_event};
use crate::react::{parse_llm_output, PlannerOutput, Planner, ReactEvent};
use crate::tools::ToolExecutor;

pub const DEFAULT_MAX_INVOCATIONS: usize = 5;
pub const DEFAULT_ITERATION_CEILING: usize = 10;

const OBSERVATION_PREVIEW_CHARS: usize = 200;
const SYNTHESIS_RESULT_CHARS: usize = 600;

const FINAL_ANSWER_AFTER_ERROR: &str =
    "上述能力查詢失敗，請勿再呼叫任何能力，直接根據目前已取得的資料給出最終回答。";
const FINAL_ANSWER_AT_LIMIT: &str =
    "已達能力呼叫上限，請勿再呼叫任何能力，直接根據目前已取得的資料給出最終回答。";
const CORRECTION_PROMPT: &str = "上一則回覆的能力呼叫 JSON 格式錯誤。若要呼叫能力，請只輸出 \
     {\"tool\": \"名稱\", \"args\": {...}} 格式的合法 JSON；若已可回答，請直接給出最終回答。";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLimits {
    pub max_invocations: usize,
    pub iteration_ceiling: usize,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_invocations: DEFAULT_MAX_INVOCATIONS,
            iteration_ceiling: DEFAULT_ITERATION_CEILING,
        }
    }
}

/// 单次能力调用的结果：结果与错误二选一
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationOutcome {
    Result(String),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityInvocation {
    pub name: String,
    pub args: serde_json::Value,
    pub outcome: InvocationOutcome,
}

impl CapabilityInvocation {
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, InvocationOutcome::Error(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 模型主动给出最终回答
    FinalAnswer,
    /// 能力调用次数用尽后模型仍请求能力，回答在本地拼出
    InvocationLimit,
    /// 能力失败后模型仍请求能力，回答在本地拼出
    SourceFailed,
    IterationCeiling,
}

#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub answer: String,
    pub invocations: Vec<CapabilityInvocation>,
    /// 失败过的能力名（去重，按首次失败顺序）
    pub failed_sources: Vec<String>,
    pub stop_reason: StopReason,
    /// 模型调用次数
    pub iterations: usize,
}

pub struct CapabilityLoop<'a> {
    planner: &'a Planner,
    executor: &'a ToolExecutor,
    budgeter: Option<&'a TokenBudgeter<'a>>,
    limits: LoopLimits,
    cancel_token: CancellationToken,
    event_tx: Option<&'a tokio::sync::mpsc::UnboundedSender<ReactEvent>>,
}

impl<'a> CapabilityLoop<'a> {
    pub fn new(
        planner: &'a Planner,
        executor: &'a ToolExecutor,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            planner,
            executor,
            budgeter: None,
            limits: LoopLimits::default(),
            cancel_token,
            event_tx: None,
        }
    }

    pub fn with_limits(mut self, limits: LoopLimits) -> Self {
        self.limits = limits;
        self
    }

    /// 每次模型调用前按 token 上限组装消息（前缀 = system + 开场消息）
    pub fn with_budgeter(mut self, budgeter: &'a TokenBudgeter<'a>) -> Self {
        self.budgeter = Some(budgeter);
        self
    }

    pub fn with_event_tx(
        mut self,
        tx: &'a tokio::sync::mpsc::UnboundedSender<ReactEvent>,
    ) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn assemble(&self, opening: &Message, scratch: &[Message]) -> Result<Vec<Message>, AgentError> {
        let prefix = [Message::system(self.planner.system_prompt()), opening.clone()];
        match self.budgeter {
            Some(b) => Ok(b.assemble(prefix, scratch)?.messages),
            None => {
                let mut all = prefix.to_vec();
                all.extend_from_slice(scratch);
                Ok(all)
            }
        }
    }

    async fn call_model(&self, messages: &[Message]) -> Result<String, AgentError> {
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => Err(AgentError::Cancelled),
            out = self.planner.plan(messages) => out,
        }
    }

    async fn call_tool(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<Result<String, AgentError>, AgentError> {
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => Err(AgentError::Cancelled),
            out = self.executor.execute(name, args) => Ok(out),
        }
    }

    pub async fn run(&self, opening: Message) -> Result<LoopOutcome, AgentError> {
        let limits = self.limits;
        let mut scratch: Vec<Message> = Vec::new();
        let mut invocations: Vec<CapabilityInvocation> = Vec::new();
        let mut failed_sources: Vec<String> = Vec::new();
        let mut force_final = false;
        let mut iterations = 0usize;

        let (mut answer, stop_reason) = loop {
            if self.cancel_token.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            if iterations >= limits.iteration_ceiling {
                tracing::warn!(iterations, "capability loop hit iteration ceiling");
                break (synthesize(&invocations), StopReason::IterationCeiling);
            }
            iterations += 1;
            send_event(
                self.event_tx,
                ReactEvent::StepUpdate {
                    step: iterations,
                    max_steps: limits.iteration_ceiling,
                },
            );

            let messages = self.assemble(&opening, &scratch)?;
            send_event(self.event_tx, ReactEvent::Thinking);
            let output = self.call_model(&messages).await?;

            let call = match parse_llm_output(&output) {
                Ok(PlannerOutput::Response(text)) => break (text, StopReason::FinalAnswer),
                Ok(PlannerOutput::ToolCall(call)) => call,
                Err(AgentError::JsonParseError(detail)) => {
                    tracing::debug!(%detail, "malformed capability request");
                    send_event(
                        self.event_tx,
                        ReactEvent::Recovery {
                            action: "correction_prompt".into(),
                            detail: preview(&detail, OBSERVATION_PREVIEW_CHARS),
                        },
                    );
                    scratch.push(Message::assistant(output));
                    scratch.push(Message::user(CORRECTION_PROMPT));
                    continue;
                }
                Err(e) => return Err(e),
            };

            if force_final || invocations.len() >= limits.max_invocations {
                let reason = if failed_sources.is_empty() {
                    StopReason::InvocationLimit
                } else {
                    StopReason::SourceFailed
                };
                tracing::info!(tool = %call.tool, ?reason, "capability requested after final-answer instruction");
                break (synthesize(&invocations), reason);
            }

            send_event(
                self.event_tx,
                ReactEvent::ToolCall {
                    tool: call.tool.clone(),
                    args: call.args.clone(),
                },
            );
            scratch.push(Message::assistant(output));

            match self.call_tool(&call.tool, call.args.clone()).await? {
                Ok(result) => {
                    send_event(
                        self.event_tx,
                        ReactEvent::Observation {
                            tool: call.tool.clone(),
                            preview: preview(&result, OBSERVATION_PREVIEW_CHARS),
                        },
                    );
                    scratch.push(Message::user(format!(
                        "Observation from {}:\n{}",
                        call.tool, result
                    )));
                    invocations.push(CapabilityInvocation {
                        name: call.tool,
                        args: call.args,
                        outcome: InvocationOutcome::Result(result),
                    });
                }
                Err(e) => {
                    tracing::warn!(tool = %call.tool, error = %e, "capability failed, forcing final answer");
                    send_event(
                        self.event_tx,
                        ReactEvent::ToolFailure {
                            tool: call.tool.clone(),
                            reason: e.to_string(),
                        },
                    );
                    scratch.push(Message::user(format!(
                        "Observation from {}: Error: {}\n{}",
                        call.tool, e, FINAL_ANSWER_AFTER_ERROR
                    )));
                    if !failed_sources.contains(&call.tool) {
                        failed_sources.push(call.tool.clone());
                    }
                    invocations.push(CapabilityInvocation {
                        name: call.tool,
                        args: call.args,
                        outcome: InvocationOutcome::Error(e.to_string()),
                    });
                    force_final = true;
                }
            }

            if !force_final && invocations.len() >= limits.max_invocations {
                scratch.push(Message::user(FINAL_ANSWER_AT_LIMIT));
                force_final = true;
            }
        };

        if !failed_sources.is_empty() {
            answer = format!(
                "{}\n\n（註：部分資料來源查詢失敗：{}）",
                answer.trim_end(),
                failed_sources.join("、")
            );
        }
        send_event(
            self.event_tx,
            ReactEvent::FinalAnswer {
                preview: preview(&answer, OBSERVATION_PREVIEW_CHARS),
            },
        );

        Ok(LoopOutcome {
            answer,
            invocations,
            failed_sources,
            stop_reason,
            iterations,
        })
    }
}

/// 用已成功的观察拼出回答
fn synthesize(invocations: &[CapabilityInvocation]) -> String {
    let gathered: Vec<String> = invocations
        .iter()
        .filter_map(|inv| match &inv.outcome {
            InvocationOutcome::Result(r) => Some(format!(
                "- {}：{}",
                inv.name,
                preview(r.trim(), SYNTHESIS_RESULT_CHARS)
            )),
            InvocationOutcome::Error(_) => None,
        })
        .collect();
    if gathered.is_empty() {
        "目前無法取得足夠資料完成規劃，請稍後再試或補充更多資訊。".to_string()
    } else {
        format!("根據目前取得的資料整理如下：\n{}", gathered.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    use crate::llm::ScriptedLlmClient;
    use crate::memory::HeuristicTokenizer;
    use crate::tools::{Tool, ToolRegistry};

    const SYSTEM: &str = "planner-under-test";

    struct Counting {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Tool for Counting {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "test capability"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                Err("rate limited".into())
            } else {
                Ok(format!("{} result #{n}", self.name))
            }
        }
    }

    fn executor(counters: &[(&'static str, bool, Arc<AtomicUsize>)]) -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        for (name, fail, calls) in counters {
            registry.register(Counting {
                name,
                calls: calls.clone(),
                fail: *fail,
            });
        }
        ToolExecutor::new(registry, 5)
    }

    fn tool_json(name: &str) -> String {
        json!({"tool": name, "args": {}}).to_string()
    }

    #[tokio::test]
    async fn test_error_on_third_invocation_forces_final_answer() {
        let ok_calls = Arc::new(AtomicUsize::new(0));
        let bad_calls = Arc::new(AtomicUsize::new(0));
        let exec = executor(&[
            ("weather_forecast", false, ok_calls.clone()),
            ("hotel_search", true, bad_calls.clone()),
        ]);
        let llm = Arc::new(
            ScriptedLlmClient::new("unused")
                .on(SYSTEM, tool_json("weather_forecast"))
                .on(SYSTEM, tool_json("weather_forecast"))
                .on(SYSTEM, tool_json("hotel_search"))
                .on(SYSTEM, "行程建議：依天氣安排室內外活動。"),
        );
        let planner = Planner::new(llm.clone(), SYSTEM);
        let outcome = CapabilityLoop::new(&planner, &exec, CancellationToken::new())
            .run(Message::user("規劃台中兩天"))
            .await
            .unwrap();

        assert_eq!(ok_calls.load(Ordering::SeqCst), 2);
        assert_eq!(bad_calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.invocations.len(), 3);
        assert!(outcome.invocations[2].is_error());
        assert_eq!(outcome.failed_sources, vec!["hotel_search".to_string()]);
        assert_eq!(outcome.stop_reason, StopReason::FinalAnswer);
        assert!(outcome.answer.starts_with("行程建議"));
        assert!(outcome.answer.contains("部分資料來源查詢失敗：hotel_search"));
        assert_eq!(llm.call_count(), 4);
        // 第四次调用看到了错误观察与收尾指令
        let last = llm.calls().pop().unwrap();
        assert!(last.iter().any(|m| m.content.contains(FINAL_ANSWER_AFTER_ERROR)));
    }

    #[tokio::test]
    async fn test_model_insisting_after_error_gets_synthesized_answer() {
        let ok_calls = Arc::new(AtomicUsize::new(0));
        let bad_calls = Arc::new(AtomicUsize::new(0));
        let exec = executor(&[
            ("weather_forecast", false, ok_calls.clone()),
            ("hotel_search", true, bad_calls.clone()),
        ]);
        let llm = Arc::new(
            ScriptedLlmClient::new("unused")
                .on(SYSTEM, tool_json("weather_forecast"))
                .on(SYSTEM, tool_json("hotel_search")),
        );
        let planner = Planner::new(llm.clone(), SYSTEM);
        let outcome = CapabilityLoop::new(&planner, &exec, CancellationToken::new())
            .run(Message::user("go"))
            .await
            .unwrap();

        assert_eq!(bad_calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.stop_reason, StopReason::SourceFailed);
        assert!(outcome.answer.contains("weather_forecast result #1"));
        assert!(outcome.answer.contains("hotel_search"));
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_invocation_limit_terminates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let exec = executor(&[("weather_forecast", false, calls.clone())]);
        let llm = Arc::new(ScriptedLlmClient::new("unused").on(SYSTEM, tool_json("weather_forecast")));
        let planner = Planner::new(llm.clone(), SYSTEM);
        let outcome = CapabilityLoop::new(&planner, &exec, CancellationToken::new())
            .run(Message::user("go"))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), DEFAULT_MAX_INVOCATIONS);
        assert_eq!(outcome.stop_reason, StopReason::InvocationLimit);
        assert_eq!(outcome.iterations, DEFAULT_MAX_INVOCATIONS + 1);
        assert!(outcome.failed_sources.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_consumes_iterations_until_ceiling() {
        let exec = executor(&[]);
        let llm = Arc::new(ScriptedLlmClient::new("unused").on(SYSTEM, r#"{"tool": "x", "args": {"days": 3,}"#));
        let planner = Planner::new(llm.clone(), SYSTEM);
        let limits = LoopLimits {
            max_invocations: 2,
            iteration_ceiling: 4,
        };
        let outcome = CapabilityLoop::new(&planner, &exec, CancellationToken::new())
            .with_limits(limits)
            .run(Message::user("go"))
            .await
            .unwrap();
        assert_eq!(llm.call_count(), 4);
        assert_eq!(outcome.stop_reason, StopReason::IterationCeiling);
        assert!(outcome.invocations.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_capability_is_an_observation_not_an_error() {
        let exec = executor(&[]);
        let llm = Arc::new(
            ScriptedLlmClient::new("unused")
                .on(SYSTEM, tool_json("teleport"))
                .on(SYSTEM, "done"),
        );
        let planner = Planner::new(llm, SYSTEM);
        let outcome = CapabilityLoop::new(&planner, &exec, CancellationToken::new())
            .run(Message::user("go"))
            .await
            .unwrap();
        assert_eq!(outcome.failed_sources, vec!["teleport".to_string()]);
        assert!(outcome.answer.starts_with("done"));
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let exec = executor(&[]);
        let llm = Arc::new(ScriptedLlmClient::new("unused").on_error(SYSTEM, "connection reset"));
        let planner = Planner::new(llm, SYSTEM);
        let err = CapabilityLoop::new(&planner, &exec, CancellationToken::new())
            .run(Message::user("go"))
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::LlmError("connection reset".into()));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let exec = executor(&[]);
        let planner = Planner::new(Arc::new(ScriptedLlmClient::new("x")), SYSTEM);
        let token = CancellationToken::new();
        token.cancel();
        let err = CapabilityLoop::new(&planner, &exec, token)
            .run(Message::user("go"))
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::Cancelled);
    }

    #[tokio::test]
    async fn test_budgeter_keeps_prefix() {
        let calls = Arc::new(AtomicUsize::new(0));
        let exec = executor(&[("weather_forecast", false, calls)]);
        let llm = Arc::new(
            ScriptedLlmClient::new("unused")
                .on(SYSTEM, tool_json("weather_forecast"))
                .on(SYSTEM, "final"),
        );
        let planner = Planner::new(llm.clone(), SYSTEM);
        let tokenizer = HeuristicTokenizer;
        let budgeter = TokenBudgeter::new(&tokenizer, "gpt-4");
        let outcome = CapabilityLoop::new(&planner, &exec, CancellationToken::new())
            .with_budgeter(&budgeter)
            .run(Message::user("opening"))
            .await
            .unwrap();
        assert_eq!(outcome.answer, "final");
        for call in llm.calls() {
            assert_eq!(call[0].content, SYSTEM);
            assert_eq!(call[1].content, "opening");
        }
    }

    #[derive(Debug, Clone)]
    enum Step {
        Call(&'static str),
        Malformed,
        Final,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            3 => prop::sample::select(vec!["ok_cap", "bad_cap", "ghost_cap"]).prop_map(Step::Call),
            1 => Just(Step::Malformed),
            1 => Just(Step::Final),
        ]
    }

    proptest! {
        #[test]
        fn loop_always_terminates_within_limits(
            script in prop::collection::vec(step(), 1..16),
            max_invocations in 0usize..6,
            iteration_ceiling in 0usize..12,
        ) {
            let ok_calls = Arc::new(AtomicUsize::new(0));
            let bad_calls = Arc::new(AtomicUsize::new(0));
            let exec = executor(&[
                ("ok_cap", false, ok_calls.clone()),
                ("bad_cap", true, bad_calls.clone()),
            ]);
            let llm = Arc::new(script.iter().fold(ScriptedLlmClient::new("unused"), |llm, s| match s {
                Step::Call(name) => llm.on(SYSTEM, tool_json(name)),
                Step::Malformed => llm.on(SYSTEM, r#"{"tool": "ok_cap", "args": {"#),
                Step::Final => llm.on(SYSTEM, "最終回答"),
            }));
            let planner = Planner::new(llm.clone(), SYSTEM);
            let limits = LoopLimits { max_invocations, iteration_ceiling };

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let result = rt.block_on(
                CapabilityLoop::new(&planner, &exec, CancellationToken::new())
                    .with_limits(limits)
                    .run(Message::user("go")),
            );

            prop_assert!(result.is_ok());
            let outcome = result.unwrap();
            prop_assert!(llm.call_count() <= iteration_ceiling);
            prop_assert_eq!(outcome.iterations, llm.call_count());
            prop_assert!(outcome.invocations.len() <= max_invocations);
            prop_assert!(
                ok_calls.load(Ordering::SeqCst) + bad_calls.load(Ordering::SeqCst) <= max_invocations
            );
            prop_assert!(!outcome.answer.trim().is_empty());
        }
    }
}
