//! 可观测性：tracing 订阅器初始化
//!
//! 默认级别 info，`RUST_LOG` 可覆盖；能力执行器的 `tool_audit` JSON 行走同一个 fmt 层。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // 测试或嵌入场景下可能已有全局订阅器，重复初始化时忽略
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}
