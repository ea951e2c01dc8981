pub mod auth;
pub mod config;
pub mod error;
pub mod forms;
pub mod models;
pub mod page_cache; // whole-page cache for the index
pub mod pages; // HTML rendering
pub mod pagination;
pub mod repo;
pub mod routes;
pub mod security;
pub mod storage;

// Re-export commonly used items for tests / external users
pub use config::AppConfig;
pub use page_cache::PageCache;
pub use routes::{config, AppState};
pub use security::SecurityHeaders;
