//! 可观测性：全局 tracing 订阅者
//!
//! 日志的实例隔离靠每个 Orchestrator 自己的 span，这里只负责安装输出层与级别过滤。

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局订阅者；`RUST_LOG` 优先于 level
pub fn init(level: &str) -> anyhow::Result<()> {
    let directive = level
        .parse::<LevelFilter>()
        .map_err(|e| anyhow::anyhow!("invalid log level {level:?}: {e}"))?;
    let filter = EnvFilter::builder()
        .with_default_directive(directive.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()?;
    Ok(())
}
