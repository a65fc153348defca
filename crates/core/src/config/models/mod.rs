pub mod app_config;
pub mod database;
pub mod observability;
pub mod services;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use database::{DatabaseConfig, IN_MEMORY_STORE_URL};
pub use observability::ObservabilityConfig;
pub use services::{PauseExpirationsConfig, ServicesConfig, WorkPoolsConfig};
