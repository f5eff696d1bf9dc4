//! 能力执行器
//!
//! 持有 ToolRegistry 与统一超时。未注册的名称返回 HallucinatedTool，超时返回 ToolTimeout，
//! 能力自身报错返回 ToolExecutionFailed；每次调用输出一行 JSON 审计日志（`tool_audit`）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{Tool, ToolRegistry};

pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub async fn execute(
        &self,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<String, AgentError> {
        let Some(tool) = self.registry.get(tool_name) else {
            audit(tool_name, "unknown", 0, &args);
            return Err(AgentError::HallucinatedTool(tool_name.to_string()));
        };

        let start = Instant::now();
        let preview = args_preview(&args);
        let result = timeout(self.timeout, tool.execute(args)).await;

        let outcome = match &result {
            Ok(Ok(_)) => "ok",
            Ok(Err(_)) => "error",
            Err(_) => "timeout",
        };
        audit_preview(tool_name, outcome, start.elapsed().as_millis() as u64, preview);

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(format!("{tool_name}: {e}"))),
            Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
        }
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

fn audit(tool_name: &str, outcome: &str, duration_ms: u64, args: &serde_json::Value) {
    audit_preview(tool_name, outcome, duration_ms, args_preview(args));
}

fn audit_preview(tool_name: &str, outcome: &str, duration_ms: u64, args_preview: String) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool_name,
        "ok": outcome == "ok",
        "outcome": outcome,
        "duration_ms": duration_ms,
        "args_preview": args_preview,
    });
    tracing::info!(audit = %audit, "tool");
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("rate limited".into())
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Slow);
        registry.register(Failing);
        ToolExecutor::with_timeout(registry, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_unknown_tool_is_hallucinated() {
        let err = executor().execute("teleport", json!({})).await.unwrap_err();
        assert_eq!(err, AgentError::HallucinatedTool("teleport".into()));
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = executor().execute("slow", json!({})).await.unwrap_err();
        assert_eq!(err, AgentError::ToolTimeout("slow".into()));
    }

    #[tokio::test]
    async fn test_failure_is_mapped() {
        let err = executor().execute("failing", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolExecutionFailed(m) if m.contains("rate limited")));
    }
}
