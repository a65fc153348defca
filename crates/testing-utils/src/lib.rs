//! # Orchestrator Testing Utils
//!
//! 编排控制平面共享测试工具。
//!
//! ## 功能
//!
//! - **测试数据构建器**: 任意状态的流程运行，带默认值的工作池与队列
//! - **故障注入**: 让指定操作失败并统计批量读取的 `Store` 包装
//! - **辅助函数**: 存储创建、数据预置与已提交状态读取
//!
//! ## 用法
//!
//! ```toml
//! [dev-dependencies]
//! orchestrator-testing-utils = { path = "../testing-utils" }
//! ```
//!
//! ```rust,ignore
//! use orchestrator_testing_utils::{FlowRunBuilder, FaultInjectingStore, TestEnv};
//! ```

pub mod builders;
pub mod faults;
pub mod helpers;

pub use builders::*;
pub use faults::*;
pub use helpers::*;
