//! # 数据模型
//!
//! 编排控制平面的核心数据结构：流程运行及其状态记录，Worker池、队列与Worker。
//!
//! ## 流程运行状态流转
//! ```text
//! Scheduled → Pending → Running → Completed
//!     ↓          ↓        ↓  ↑
//!  Cancelling   Paused ←──┘  │        终态: Completed / Failed / Crashed / Cancelled
//!     ↓          └───────────┘
//!  Cancelled
//! ```
//!
//! 状态只通过状态机写入；每次写入追加一条状态记录，运行的 `state` 始终指向最新一条。
//!
//! ## Worker池层级
//! ```text
//! WorkerPool ──< WorkerPoolQueue (priority 升序)
//!      └─────< Worker (last_heartbeat_time)
//! ```
//! 删除池会在同一事务内级联删除其队列和Worker。

pub mod flow_run;
pub mod state;
pub mod work_pool;

pub use flow_run::*;
pub use state::*;
pub use work_pool::*;
