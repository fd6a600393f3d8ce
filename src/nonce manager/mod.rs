//! Nonce Manager Module
//!
//! Per-account nonce allocation for EVM senders

// Submodules
pub mod nonce_cache;
pub mod nonce_errors;

// Re-exports for convenience
pub use nonce_cache::{NonceCache, SyncOutcome};
pub use nonce_errors::{NonceError, NonceResult};
