//! Common test harness utilities for integration tests.

// Not all test files use all helpers; silence dead_code warnings for unused exports.
#![allow(dead_code)]

use bytes::Bytes;
use std::sync::Arc;
use trellis::config::StoreConfig;
use trellis::kvs::memory::MemoryKvs;
use trellis::kvs::Kvs;
use trellis::store::{Message, PublishMessage, Qos, Storage};
use trellis::topic;

/// Build a store over a fresh in-process KVS, returning both so tests can
/// inspect raw state. The node runs as `n1`.
pub fn storage() -> (Storage, Arc<dyn Kvs>) {
    storage_with_config(&StoreConfig::new("mem://local", "n1"))
}

/// Same, with an explicit configuration.
pub fn storage_with_config(config: &StoreConfig) -> (Storage, Arc<dyn Kvs>) {
    let kvs: Arc<dyn Kvs> = Arc::new(MemoryKvs::new());
    (Storage::new(config, kvs.clone()), kvs)
}

/// Sanitized levels for a concrete topic name.
pub fn name(topic_str: &str) -> Vec<String> {
    topic::sanitize_name(topic_str).expect("valid topic name")
}

/// Sanitized levels for a topic filter.
pub fn filter(topic_str: &str) -> Vec<String> {
    topic::sanitize_filter(topic_str).expect("valid topic filter")
}

/// A PUBLISH record for tests.
pub fn publish(topic_str: &str, packet_id: u16, qos: Qos, payload: &[u8]) -> Message {
    Message::Publish(PublishMessage {
        topic: topic_str.to_owned(),
        packet_id,
        qos,
        retain: false,
        dup: false,
        payload: Bytes::copy_from_slice(payload),
    })
}

/// Read a trie child counter directly from the KVS.
pub async fn child_counter(kvs: &Arc<dyn Kvs>, prefix: &[&str], label: &str) -> Option<i64> {
    let prefix: Vec<String> = prefix.iter().map(|s| (*s).to_owned()).collect();
    let key = trellis::store::keys::topic_filter_child(&prefix);
    kvs.hget(&key, label)
        .await
        .expect("counter read")
        .map(|raw| String::from_utf8(raw).expect("utf8 counter"))
        .map(|text| text.parse().expect("numeric counter"))
}

/// The END sentinel label, for counter assertions.
pub fn end() -> &'static str {
    topic::END
}
