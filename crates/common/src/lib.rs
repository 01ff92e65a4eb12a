//! uiheal Common Library
//!
//! Scenario, step and execution types shared by the engine and the layers
//! around it, plus the persistence seams the engine reads from and writes to.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use db::Database;
pub use error::{Error, Result};
pub use store::{ExecutionStore, MemoryStore, ScenarioStore};
pub use types::*;

/// uiheal version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".uiheal")
}

/// Default database path
pub fn default_db_path() -> std::path::PathBuf {
    default_store_path().join("uiheal.db")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
