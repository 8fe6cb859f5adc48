//! 工具注册表
//!
//! 业务工具（账本、分类、交易、渲染）由宿主实现 Tool trait 并注册；核心只依赖这个边界。
//! ToolExecutor 在调用时加超时并统一转 AgentError。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::PermissionTier;

/// 工具 trait：名称、描述（供模型理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema，默认不限
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 工具自声明的权限等级；None 时按名称推断
    fn tier(&self) -> Option<PermissionTier> {
        None
    }

    /// 渲染工具只产出面向用户的结构化输出，不做业务变更
    fn is_render(&self) -> bool {
        self.name().starts_with("render_")
    }

    /// 执行工具；返回字符串或任意 JSON，Err 视为工具失败而非编排错误
    async fn execute(&self, args: Value) -> Result<Value, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool re-registered, previous definition replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// (name, description) 列表，用于生成系统提示中的工具段落
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.tools
            .iter()
            .map(|(name, tool)| (name.clone(), tool.description().to_string()))
            .collect()
    }

    pub fn is_render_tool(&self, name: &str) -> bool {
        self.tools.get(name).is_some_and(|t| t.is_render())
    }

    pub fn has_render_tool(&self) -> bool {
        self.tools.values().any(|t| t.is_render())
    }

    pub fn render_tool_names(&self) -> Vec<String> {
        self.tools
            .iter()
            .filter(|(_, t)| t.is_render())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// 工具 schema JSON（name / description / parameters）
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|(name, tool)| {
                serde_json::json!({
                    "name": name,
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
