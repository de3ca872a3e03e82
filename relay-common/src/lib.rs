//! Relay Common - Shared configuration, errors, logging and storage for the relay.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Error types and their pipeline categories
//! - Logging setup and structured logging helpers
//! - The ephemeral `KvStore` with in-memory and Redis backends

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod kv;
pub mod logging;

pub use config::{Config, PresetItem};
pub use error::{Error, ErrorCategory, Result, ResultExt};
pub use kv::{create_store, InMemoryKv, KvBackend, KvError, KvResult, KvStore};

#[cfg(feature = "redis-backend")]
pub use kv::RedisKv;

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::{Config, PresetItem};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::kv::{KvStore, KvError};
    pub use crate::logging::init_logging;
}
