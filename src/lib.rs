//! 工作流编排控制平面进程：配置加载后装配存储与后台服务，并负责优雅关闭。

pub mod app;
pub mod shutdown;

pub use app::Application;
pub use shutdown::ShutdownManager;
