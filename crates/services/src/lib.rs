//! # 后台对账服务
//!
//! - [`loop_service`] - 通用的循环服务驱动：按固定间隔执行一次对账，支持有限次数运行与协作式停止
//! - [`pause_expirations`] - 将超过恢复截止时间的 Paused 运行强制标记为 Failed
//! - [`signals`] - 进程关闭信号

pub mod loop_service;
pub mod pause_expirations;
pub mod signals;

pub use loop_service::{
    LoopService, LoopServiceHandle, LoopServiceReport, LoopServiceRunner, StopReason,
};
pub use pause_expirations::{FailExpiredPauses, PassSummary, PAUSE_EXPIRED_MESSAGE};
pub use signals::shutdown_signal;
