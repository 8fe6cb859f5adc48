//! 工具执行器
//!
//! 持有共享的 ToolRegistry 与工具超时，execute(tool_name, args) 在超时内调用工具，
//! 超时或失败时转为 AgentError（Timeout / ToolExecutionFailed / ToolNotFound）；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{Tool, ToolRegistry};

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 执行指定工具，返回结果文本（字符串原样，其他 JSON 序列化）
    pub async fn execute(&self, tool_name: &str, args: Value) -> Result<String, AgentError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| AgentError::ToolNotFound(tool_name.to_string()))?;

        let start = Instant::now();
        let preview = args_preview(&args);
        let result = timeout(self.timeout, tool.execute(args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(value)) => Ok(result_text(value)),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(e)),
            Err(_) => Err(AgentError::Timeout {
                message: format!("工具 {tool_name} 执行超时"),
                after_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

fn result_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn args_preview(args: &Value) -> String {
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
    use serde_json::json;

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn execute(&self, _args: Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!("late"))
        }
    }

    struct Category;

    #[async_trait]
    impl Tool for Category {
        fn name(&self) -> &str {
            "category"
        }
        fn description(&self) -> &str {
            "categories"
        }
        async fn execute(&self, args: Value) -> Result<Value, String> {
            match args["action"].as_str() {
                Some("list") => Ok(json!({"categories": ["餐饮", "交通"]})),
                Some("echo") => Ok(json!("plain text")),
                _ => Err("unknown action".to_string()),
            }
        }
    }

    fn executor(timeout_ms: u64) -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Slow);
        registry.register(Category);
        ToolExecutor::new(Arc::new(registry), Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn test_json_and_string_results() {
        let exec = executor(1000);
        let listed = exec.execute("category", json!({"action": "list"})).await.unwrap();
        assert_eq!(listed, r#"{"categories":["餐饮","交通"]}"#);
        let echoed = exec.execute("category", json!({"action": "echo"})).await.unwrap();
        assert_eq!(echoed, "plain text");
    }

    #[tokio::test]
    async fn test_failure_and_missing_tool() {
        let exec = executor(1000);
        assert_eq!(
            exec.execute("category", json!({})).await,
            Err(AgentError::ToolExecutionFailed("unknown action".into()))
        );
        assert_eq!(
            exec.execute("list", json!({})).await,
            Err(AgentError::ToolNotFound("list".into()))
        );
    }

    #[tokio::test]
    async fn test_timeout() {
        let exec = executor(10);
        match exec.execute("slow", json!({})).await {
            Err(AgentError::Timeout { after_ms, .. }) => assert_eq!(after_ms, 10),
            other => panic!("Expected Timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = json!({"note": "x".repeat(500)});
        assert!(args_preview(&long).ends_with("..."));
        assert_eq!(args_preview(&json!({"a": 1})), r#"{"a":1}"#);
    }
}
