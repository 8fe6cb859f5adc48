//! 完成判定：模型不再调用工具时，本轮是否可以结束

/// 判定所需的事实
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionFacts {
    /// 本轮已成功调用过渲染工具
    pub rendered: bool,
    /// 存在尚未渲染的成功业务结果
    pub has_unrendered_result: bool,
    /// 意图是业务任务（未改写意图时视为任务）
    pub task_turn: bool,
    /// 注册表中至少有一个渲染工具
    pub render_available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionDecision {
    Complete,
    /// 注入纠正提示，要求模型调用渲染工具
    NeedsRender,
}

pub fn decide(facts: &CompletionFacts) -> CompletionDecision {
    if facts.rendered
        || !facts.render_available
        || !facts.task_turn
        || !facts.has_unrendered_result
    {
        CompletionDecision::Complete
    } else {
        CompletionDecision::NeedsRender
    }
}

/// 要求渲染的纠正提示（以 human 角色注入）
pub fn render_demand(render_tools: &[String]) -> String {
    format!(
        "[系统提示] 你已经拿到了业务结果，但还没有展示给用户。请调用渲染工具（{}）输出结果，不要只用文字描述。",
        render_tools.join(", ")
    )
}
