#![deny(clippy::all, clippy::pedantic)]
// Module naming: common pattern in domain-driven code
#![allow(clippy::module_name_repetitions)]
// Function complexity: some functions are inherently complex
#![allow(clippy::too_many_lines)]
// Variable naming: domain terms often similar
#![allow(clippy::similar_names)]
// Documentation style: many terms don't need backticks
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// API ergonomics: prefer simplicity over must_use annotations
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
// Format strings: allow non-inlined for readability
#![allow(clippy::uninlined_format_args)]
// Numeric casts: intentional in protocol code
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
// Passing style
#![allow(clippy::needless_pass_by_value)]
// Option/Result patterns
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::map_unwrap_or)]
// Type defaults
#![allow(clippy::implicit_hasher)]
// Iterator patterns
#![allow(clippy::iter_without_into_iter)]

//! Trellis - shared session and routing core for an MQTT 3.1.1 broker
//! cluster.
//!
//! Broker nodes terminate MQTT on their own and cooperate through a shared
//! key-value store for everything a client can observe across nodes:
//! presence (which node hosts which client), durable session state, the
//! cluster-wide subscription index with its wildcard trie, and per-topic
//! retained messages.
//!
//! # Module Organization
//!
//! ## Core
//! - `config` - Store configuration handed over by the launcher
//! - `topic` - Topic name/filter utilities and the trie END sentinel
//!
//! ## KVS
//! - `kvs` - Async client trait, backend registry, atomic single-key ops
//! - `kvs::memory` - In-process reference engine
//!
//! ## Store
//! - `store::session` - Presence, session flag, packet ids, QoS 2 dedup,
//!   in-flight window
//! - `store::subscription` - Subscription mirrors and trie child counters
//! - `store::matcher` - Forward matching from topic to subscribers
//! - `store::retained` - Per-topic retained messages
//! - `store::message` - Stored record codec
//! - `store::keys` - Cluster-wide key schema

pub mod config;
pub mod kvs;
pub mod store;
pub mod topic;

// Re-exports for convenience
pub use config::StoreConfig;
pub use kvs::{BackendRegistry, Kvs, KvsError};
pub use store::{MatchResult, Message, PublishMessage, Qos, SessionFlag, Storage, StorageError};
