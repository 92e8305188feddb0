//! Durable key-value storage backends.
//!
//! The session store, pending redirect and API debug log all persist through
//! the [`KeyValueStorage`] trait so that tests can swap in [`MemoryStorage`]
//! and the CLI can choose between a JSON file and the OS keychain.

pub mod file;
pub mod keychain;
pub mod memory;

use thiserror::Error;

pub use file::FileStorage;
pub use keychain::KeyringStorage;
pub use memory::MemoryStorage;

/// Storage key holding the current bearer token.
pub const TOKEN_KEY: &str = "auth_token";

/// Storage key holding the path to restore after login.
pub const REDIRECT_KEY: &str = "post_login_redirect";

/// Storage key holding the serialized API debug log.
pub const API_LOG_KEY: &str = "quickqr_api_logs";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt storage data: {0}")]
    Corrupt(String),
}

/// Synchronous string key-value storage that survives restarts.
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}
