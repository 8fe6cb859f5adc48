//! 工具名纠正：常见的错误/臆造工具名 -> 规范工具 + 参数变换
//!
//! 别名表是封闭的类型化映射（ToolAlias），未收录的名称直接失败，不做模糊匹配。

use serde_json::{Map, Value};

use crate::tools::ToolRegistry;

/// 参数变换
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgTransform {
    Identity,
    /// 对象参数缺少 action 时注入；非对象参数包装为 {action, value}
    InjectAction(&'static str),
}

impl ArgTransform {
    pub fn apply(&self, args: Value) -> Value {
        match self {
            ArgTransform::Identity => args,
            ArgTransform::InjectAction(action) => match args {
                Value::Object(mut map) => {
                    map.entry("action")
                        .or_insert_with(|| Value::String((*action).to_string()));
                    Value::Object(map)
                }
                Value::Null => {
                    let mut map = Map::new();
                    map.insert("action".into(), Value::String((*action).to_string()));
                    Value::Object(map)
                }
                other => {
                    let mut map = Map::new();
                    map.insert("action".into(), Value::String((*action).to_string()));
                    map.insert("value".into(), other);
                    Value::Object(map)
                }
            },
        }
    }
}

/// 已知别名（按目标分组）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolAlias {
    ListCategories,
    CreateTransaction,
    QueryTransactions,
    UpdateTransaction,
    DeleteTransaction,
    TransactionStatistics,
    ListLedgers,
}

impl ToolAlias {
    /// name 需已规范化
    pub fn parse(name: &str) -> Option<Self> {
        let alias = match name {
            "list" | "categories" | "list_categories" => ToolAlias::ListCategories,
            "create" | "add" | "record" => ToolAlias::CreateTransaction,
            "search" | "query" | "find" => ToolAlias::QueryTransactions,
            "update" | "edit" => ToolAlias::UpdateTransaction,
            "delete" | "remove" => ToolAlias::DeleteTransaction,
            "stats" | "statistics" | "summary" => ToolAlias::TransactionStatistics,
            "ledgers" | "list_ledgers" => ToolAlias::ListLedgers,
            _ => return None,
        };
        Some(alias)
    }

    pub fn target(&self) -> (&'static str, ArgTransform) {
        match self {
            ToolAlias::ListCategories => ("category", ArgTransform::InjectAction("list")),
            ToolAlias::CreateTransaction => ("transaction", ArgTransform::InjectAction("create")),
            ToolAlias::QueryTransactions => ("transaction", ArgTransform::InjectAction("query")),
            ToolAlias::UpdateTransaction => ("transaction", ArgTransform::InjectAction("update")),
            ToolAlias::DeleteTransaction => ("transaction", ArgTransform::InjectAction("delete")),
            ToolAlias::TransactionStatistics => {
                ("transaction", ArgTransform::InjectAction("statistics"))
            }
            ToolAlias::ListLedgers => ("ledger", ArgTransform::InjectAction("list")),
        }
    }
}

/// 一次纠正的结果
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub original: String,
    pub tool: String,
    pub args: Value,
    pub transform: ArgTransform,
}

impl Correction {
    /// 给宿主的步骤事件文案
    pub fn describe(&self) -> String {
        format!(
            "工具名 {} 不存在，已自动纠正为 {}（参数 {}）",
            self.original, self.tool, self.args
        )
    }
}

pub struct ToolNameCorrector;

impl ToolNameCorrector {
    /// 去空白、小写、`-` 转 `_`、去掉 `functions.` 前缀
    pub fn normalize(name: &str) -> String {
        let lowered = name.trim().to_lowercase().replace('-', "_");
        lowered
            .strip_prefix("functions.")
            .map(str::to_string)
            .unwrap_or(lowered)
    }

    /// 目标未注册时返回 None
    pub fn correct(name: &str, args: Value, registry: &ToolRegistry) -> Option<Correction> {
        let normalized = Self::normalize(name);
        if registry.contains(&normalized) {
            return Some(Correction {
                original: name.to_string(),
                tool: normalized,
                args,
                transform: ArgTransform::Identity,
            });
        }

        let alias = ToolAlias::parse(&normalized)?;
        let (target, transform) = alias.target();
        if !registry.contains(target) {
            tracing::debug!(tool = %name, target, "alias target not registered");
            return None;
        }
        Some(Correction {
            original: name.to_string(),
            tool: target.to_string(),
            args: transform.apply(args),
            transform,
        })
    }
}
