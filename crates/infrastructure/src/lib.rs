pub mod database;
pub mod in_memory_store;

pub use database::*;
pub use in_memory_store::InMemoryStore;
