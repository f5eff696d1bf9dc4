//! 编排器：单轮对话的主控流程
//!
//! 加载（或新建）会话 → 在副本上追加使用者 Turn → 从 Recommendation 开始按路由表执行阶段直到 Terminal
//! → 渲染并去重回复 → 追加一条助手 Turn → 更新摘要 → 保存检查点。
//! 传输类错误整轮重试（每次都从已提交的会话重新开始），取消或失败都不会留下半截修改。

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::agent::RuntimeContext;
use crate::core::routing::route;
use crate::core::state::{Session, SessionView, Stage, TurnRole};
use crate::core::{AgentError, RecoveryAction, RecoveryEngine, SessionSupervisor};
use crate::react::ReactEvent;
use crate::stages::{
    run_evaluator, run_planner, run_recommendation, summarize, vet_reply, TurnScope,
};

pub struct Orchestrator {
    ctx: Arc<RuntimeContext>,
    supervisor: SessionSupervisor,
    recovery: RecoveryEngine,
}

impl Orchestrator {
    pub fn new(ctx: Arc<RuntimeContext>) -> Self {
        Self {
            ctx,
            supervisor: SessionSupervisor::new(),
            recovery: RecoveryEngine::new(),
        }
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.ctx
    }

    /// 取消该线程进行中的轮次
    pub fn cancel(&self, thread_id: &str) -> bool {
        self.supervisor.cancel(thread_id)
    }

    pub async fn run_turn(&self, thread_id: &str, user_message: &str) -> Result<SessionView, AgentError> {
        self.run_turn_with_cancel(thread_id, user_message, &CancellationToken::new(), None)
            .await
    }

    pub async fn run_turn_with_cancel(
        &self,
        thread_id: &str,
        user_message: &str,
        cancel: &CancellationToken,
        events: Option<&UnboundedSender<ReactEvent>>,
    ) -> Result<SessionView, AgentError> {
        let guard = self.supervisor.begin_turn(thread_id, Some(cancel)).await;
        let token = guard.cancel_token();

        let committed = self
            .ctx
            .store
            .load(thread_id)
            .await?
            .unwrap_or_else(|| Session::new(thread_id));

        let max_attempts = self.ctx.config.app.max_turn_attempts.max(1);
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let mut working = committed.clone();
            let scope = TurnScope::new(&self.ctx, &token).with_events(events);

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(AgentError::Cancelled),
                r = self.attempt(&scope, &mut working, user_message) => r,
            };

            match result {
                Ok(view) => {
                    self.ctx.store.save(&working).await?;
                    tracing::info!(
                        thread_id,
                        stage = %view.current_stage,
                        attempt,
                        turns = working.turns().len(),
                        "turn committed"
                    );
                    return Ok(view);
                }
                Err(e) => match self.recovery.handle(&e) {
                    RecoveryAction::RetryTurn if attempt < max_attempts => {
                        tracing::warn!(thread_id, attempt, error = %e, "turn failed, retrying");
                        scope.emit(ReactEvent::Recovery {
                            action: "retry_turn".into(),
                            detail: e.to_string(),
                        });
                    }
                    RecoveryAction::RetryTurn => {
                        tracing::error!(thread_id, attempts = attempt, error = %e, "turn failed");
                        return Err(AgentError::TurnFailed {
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }
                    _ => {
                        tracing::warn!(thread_id, error = %e, "turn aborted");
                        scope.emit(ReactEvent::Error { text: e.to_string() });
                        return Err(e);
                    }
                },
            }
        }
    }

    async fn attempt(
        &self,
        scope: &TurnScope<'_>,
        session: &mut Session,
        user_message: &str,
    ) -> Result<SessionView, AgentError> {
        session.push_turn(TurnRole::User, user_message);

        let mut stage = Stage::Recommendation;
        let mut last_stage = stage;
        let mut candidate = String::new();
        while stage != Stage::Terminal {
            tracing::info!(thread_id = %session.thread_id, %stage, "entering stage");
            scope.emit(ReactEvent::StageEntered {
                stage: stage.as_str().to_string(),
            });
            candidate = match stage {
                Stage::Recommendation => run_recommendation(scope, session).await?,
                Stage::Planner => run_planner(scope, session).await?,
                Stage::Evaluator => run_evaluator(scope, session).await?,
                Stage::Terminal => break,
            };
            last_stage = stage;
            stage = route(
                &session.current_stage,
                session.need_planning,
                session.need_evaluation,
            );
        }

        let reply = vet_reply(scope, session, candidate).await?;
        session.push_turn(TurnRole::Assistant, reply.clone());
        summarize(scope, session).await?;

        Ok(SessionView::project(session, last_stage, reply))
    }
}
