//! Error Types
//!
//! Error taxonomy shared by the sharded client, the backends and the stores.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by cache operations.
///
/// The enum is `Clone` so that one coalesced fetch can hand the same outcome
/// to every waiting caller.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// A required accessor (key, score, location) was not configured.
    #[error("configuration error: {0}")]
    Configuration(&'static str),

    /// Network or I/O failure talking to the backing service.
    #[error("transport error: {0}")]
    Transport(Arc<io::Error>),

    /// Error reply returned by the backing service.
    #[error("server error: {0}")]
    Server(String),

    /// Malformed or unexpected reply.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Structured serialization rejected the value.
    #[error("unsupported type {type_name}: {reason}")]
    UnsupportedType {
        type_name: &'static str,
        reason: String,
    },

    /// Bytes could not be decoded into the requested type.
    #[error("{context}: {reason}")]
    Encoding { context: String, reason: String },

    /// Gzip compression or decompression failed.
    #[error("{context}: {reason}")]
    Compression {
        context: &'static str,
        reason: String,
    },

    /// The authoritative fetch function failed.
    #[error("fetch failed: {0}")]
    Fetch(Arc<dyn StdError + Send + Sync>),

    /// A fan-out worker panicked or was aborted.
    #[error("task failed: {0}")]
    Task(String),
}

impl CacheError {
    pub fn encoding(context: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Encoding {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    pub fn timeout(addr: &str) -> Self {
        Self::Transport(Arc::new(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("command to {} timed out", addr),
        )))
    }

    pub fn fetch(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Fetch(Arc::from(err.into()))
    }

    /// Whether the error only says the addressed key does not exist.
    pub fn is_missing_key(&self) -> bool {
        match self {
            Self::Server(msg) => msg.contains("key that doesn't exist") || msg.contains("no such key"),
            _ => false,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<io::Error> for CacheError {
    fn from(err: io::Error) -> Self {
        Self::Transport(Arc::new(err))
    }
}

/// Turns an absent-key error into an empty success.
pub fn ignore_missing_key<T: Default>(result: Result<T>) -> Result<T> {
    match result {
        Err(err) if err.is_missing_key() => Ok(T::default()),
        other => other,
    }
}

/// Failure to write read-through results back to the cache.
///
/// The values already returned stay valid; callers may log and move on.
#[derive(Error, Debug, Clone)]
#[error("fail to set cache: {source}")]
pub struct CacheWriteWarning {
    #[source]
    pub source: CacheError,
}

pub type Result<T> = std::result::Result<T, CacheError>;
