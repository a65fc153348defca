pub mod manager;
pub mod sqlite;

pub use manager::{build_store, StoreType};
pub use sqlite::{DatabaseManager, SqliteStore};
