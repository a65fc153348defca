pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use crate::config::*;
pub use errors::*;
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
pub use models::{
    FlowRun, FlowRunCursor, FlowRunFilter, FlowRunId, State, StateDetails, StateType, Worker, WorkerPool,
    WorkerPoolQueue, WorkerPoolStatus,
};
pub use traits::{Store, StoreTransaction};
