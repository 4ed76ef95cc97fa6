//! Key-value store client abstraction.
//!
//! Every broker node talks to the shared KVS through the [`Kvs`] trait:
//! strings, hashes, sets, ordered lists, cursor-based set scan, and the two
//! single-key atomic operations the session store depends on
//! ([`Kvs::check_del`] and [`Kvs::incr_limit`]).
//!
//! The contract is deliberately narrow:
//! - atomicity is per command (and per atomic op) only, never across keys;
//! - no blocking commands and no transactions; the connection is shared by
//!   every concurrent request on the node;
//! - values are transparent byte strings, each byte preserved 1:1.
//!
//! Backends register in a [`BackendRegistry`] keyed by URI scheme and are
//! resolved at startup; the in-process engine ([`memory::MemoryKvs`])
//! registers under `mem`.

pub mod memory;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Hash field map as stored in the KVS. Field names are UTF-8 (topic
/// strings, client ids, record field names); values are raw bytes.
pub type FieldMap = HashMap<String, Vec<u8>>;

pub type KvsResult<T> = Result<T, KvsError>;

#[derive(Debug, Clone, Error)]
pub enum KvsError {
    /// The store is unreachable or the command timed out. The caller
    /// decides whether to retry or drop the client; the core never retries.
    #[error("kvs transport failure: {0}")]
    Transport(String),
    /// A command was issued against a key holding a different value kind.
    #[error("value kind mismatch at key {key:?}")]
    WrongType { key: String },
    /// An increment targeted a non-numeric stored value.
    #[error("non-numeric value at key {key:?}")]
    NotAnInteger { key: String },
    #[error("no kvs backend registered for scheme {0:?}")]
    UnknownScheme(String),
    #[error("invalid kvs uri {0:?}")]
    InvalidUri(String),
}

/// One page of a cursor-based set scan. A `cursor` of zero means the scan
/// is complete; any other value is passed back verbatim to continue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub cursor: u64,
    pub members: Vec<String>,
}

/// Asynchronous client for the shared key-value store.
///
/// Implementations must be safe to share across every concurrent request on
/// a node; operations never block the calling task beyond their own round
/// trip and carry the backend's own timeout.
#[async_trait]
pub trait Kvs: Send + Sync {
    // strings
    async fn get(&self, key: &str) -> KvsResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> KvsResult<()>;
    /// Returns true when the key existed.
    async fn del(&self, key: &str) -> KvsResult<bool>;

    // hashes
    async fn hget(&self, key: &str, field: &str) -> KvsResult<Option<Vec<u8>>>;
    /// Returns true when the field was newly created.
    async fn hset(&self, key: &str, field: &str, value: &[u8]) -> KvsResult<bool>;
    /// Set all fields of `entries` at once.
    async fn hmset(&self, key: &str, entries: FieldMap) -> KvsResult<()>;
    /// Returns true when the field existed.
    async fn hdel(&self, key: &str, field: &str) -> KvsResult<bool>;
    async fn hgetall(&self, key: &str) -> KvsResult<FieldMap>;
    /// Per-field lookup; absent fields yield `None` at their position.
    async fn hmget(&self, key: &str, fields: &[&str]) -> KvsResult<Vec<Option<Vec<u8>>>>;
    /// Increment a numeric hash field by `delta`, creating it at zero first.
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> KvsResult<i64>;

    // sets
    /// Returns true when the member was newly added.
    async fn sadd(&self, key: &str, member: &str) -> KvsResult<bool>;
    /// Returns true when the member was present.
    async fn srem(&self, key: &str, member: &str) -> KvsResult<bool>;
    /// Cursor-based scan over a set, `count` members per page at most.
    async fn sscan(&self, key: &str, cursor: u64, count: u64) -> KvsResult<ScanPage>;

    // ordered lists
    /// Append to the tail; returns the new list length.
    async fn rpush(&self, key: &str, value: &str) -> KvsResult<u64>;
    /// Pop the head, if any.
    async fn lpop(&self, key: &str) -> KvsResult<Option<String>>;
    /// Remove every occurrence of `value`; returns how many were removed.
    async fn lrem_all(&self, key: &str, value: &str) -> KvsResult<u64>;
    /// Snapshot of the whole list, head first.
    async fn lrange_all(&self, key: &str) -> KvsResult<Vec<String>>;

    // single-key atomic operations
    /// Delete `key` iff its current string value equals `expected`.
    /// Returns true on delete. Atomic with respect to every other command
    /// touching `key`.
    async fn check_del(&self, key: &str, expected: &str) -> KvsResult<bool>;
    /// Increment the integer at `key`; a post-increment value exceeding
    /// `limit` resets the key to 1. Returns the resulting value, never 0.
    /// Atomic with respect to every other command touching `key`.
    async fn incr_limit(&self, key: &str, limit: u64) -> KvsResult<u64>;
}

/// Constructor for a KVS backend, invoked with the full URI.
pub type BackendBuilder = fn(&str) -> KvsResult<Arc<dyn Kvs>>;

/// Registry of KVS backends keyed by URI scheme.
///
/// Backends are registered at startup (the deployment's storage choice is
/// configuration, not code); [`BackendRegistry::open`] resolves a URI such
/// as `mem://local` to a live client handle.
pub struct BackendRegistry {
    builders: HashMap<String, BackendBuilder>,
}

impl BackendRegistry {
    /// Empty registry, no backends.
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Registry with the built-in backends registered.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("mem", memory::open);
        registry
    }

    pub fn register(&mut self, scheme: &str, builder: BackendBuilder) {
        self.builders.insert(scheme.to_owned(), builder);
    }

    /// Resolve `uri` to a backend instance via its scheme.
    pub fn open(&self, uri: &str) -> KvsResult<Arc<dyn Kvs>> {
        let scheme = uri
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .ok_or_else(|| KvsError::InvalidUri(uri.to_owned()))?;
        let builder = self
            .builders
            .get(scheme)
            .ok_or_else(|| KvsError::UnknownScheme(scheme.to_owned()))?;
        builder(uri)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
