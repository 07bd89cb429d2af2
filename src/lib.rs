// Core modules
pub mod config;
pub mod service;

// Re-export commonly used types
pub use config::{BookmarkConfig, Config, ExpirySettings, LogConfig, StorageBackend, StorageConfig};
pub use service::{HistoryReport, HistoryService};

// Re-export crate modules
pub use history_expiry as expiry;
pub use history_storage as storage;
pub use history_types as types;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
