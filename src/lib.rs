// Core modules
pub mod api;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod execution;
pub mod models;
pub mod recovery;
pub mod risk;

// Re-export commonly used types
pub use config::BotConfig;
pub use models::*;
pub use recovery::BotError;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
