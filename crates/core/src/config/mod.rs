//! 配置管理
//!
//! 加载顺序：内置默认值 → TOML配置文件 → 环境变量覆盖（前缀 `ORCHESTRATOR_`，层级分隔符 `__`）。
//! 配置对象显式传递给各组件，不存在进程级的全局配置。

pub mod models;

pub use models::*;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "ORCHESTRATOR";
