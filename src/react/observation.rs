//! 步骤观察：每次完成的工具调用一条，只追加
//!
//! 观察记录是反思器与重复调用检测在一轮内唯一使用的记忆，新一轮开始时清空。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepObservation {
    pub step_id: usize,
    pub tool_name: String,
    pub args: Value,
    pub result: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub is_render: bool,
}

impl StepObservation {
    /// 一行摘要（反思提示用）
    pub fn brief(&self) -> String {
        let status = if self.success { "ok" } else { "failed" };
        let detail = self.error.as_deref().unwrap_or(&self.result);
        let detail: String = detail.chars().take(160).collect();
        format!(
            "#{} {}({}) -> {status}: {detail}",
            self.step_id, self.tool_name, self.args
        )
    }
}

/// 本轮观察列表
#[derive(Debug, Clone, Default)]
pub struct ObservationLog {
    items: Vec<StepObservation>,
}

impl ObservationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条观察并返回其引用；step_id 自动编号
    pub fn record(
        &mut self,
        tool_name: &str,
        args: Value,
        outcome: Result<String, String>,
        duration: Duration,
        is_render: bool,
    ) -> &StepObservation {
        let (result, success, error) = match outcome {
            Ok(text) => (text, true, None),
            Err(e) => (String::new(), false, Some(e)),
        };
        self.items.push(StepObservation {
            step_id: self.items.len() + 1,
            tool_name: tool_name.to_string(),
            args,
            result,
            success,
            error,
            duration_ms: duration.as_millis() as u64,
            is_render,
        });
        &self.items[self.items.len() - 1]
    }

    /// 查找名称与参数完全相同的先前调用
    pub fn find_repeat(&self, tool_name: &str, args: &Value) -> Option<&StepObservation> {
        self.items
            .iter()
            .rev()
            .find(|o| o.tool_name == tool_name && &o.args == args)
    }

    pub fn has_render(&self) -> bool {
        self.items.iter().any(|o| o.is_render && o.success)
    }

    /// 是否有尚未渲染的成功业务结果
    pub fn has_unrendered_result(&self) -> bool {
        let last_render = self.items.iter().rposition(|o| o.is_render && o.success);
        self.items
            .iter()
            .enumerate()
            .any(|(i, o)| o.success && !o.is_render && last_render.map_or(true, |r| i > r))
    }

    pub fn items(&self) -> &[StepObservation] {
        &self.items
    }

    pub fn last(&self) -> Option<&StepObservation> {
        self.items.last()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
