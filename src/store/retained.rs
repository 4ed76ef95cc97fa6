//! Per-topic retained messages.
//!
//! Storage mirrors the in-flight window: an ordered list of packet ids per
//! topic plus one record per id. The broker keeps every retained PUBLISH
//! for a topic; a retained PUBLISH with an empty payload is translated by
//! the front-end into [`RetainedStore::clear_all_retained`].

use super::{await_all, keys, op, OpOutcome, StoreResult};
use crate::kvs::Kvs;
use crate::store::message::Message;
use std::sync::Arc;
use tracing::{debug, warn};

/// Store facade for retained messages.
#[derive(Clone)]
pub struct RetainedStore {
    kvs: Arc<dyn Kvs>,
}

impl RetainedStore {
    pub fn new(kvs: Arc<dyn Kvs>) -> Self {
        Self { kvs }
    }

    /// Packet ids retained for this exact topic, oldest first. Unparsable
    /// entries are skipped with a warning.
    pub async fn get_all_retained_ids(&self, levels: &[String]) -> StoreResult<Vec<u16>> {
        let raw = self.kvs.lrange_all(&keys::topic_retain_list(levels)).await?;
        let mut ids = Vec::with_capacity(raw.len());
        for item in raw {
            match item.parse::<u16>() {
                Ok(id) => ids.push(id),
                Err(_) => warn!(entry = %item, "dropping non-numeric retained id"),
            }
        }
        Ok(ids)
    }

    /// Read one retained record. `None` when no record exists; a malformed
    /// record surfaces as `StorageError::Contract`.
    pub async fn get_retained(
        &self,
        levels: &[String],
        packet_id: u16,
    ) -> StoreResult<Option<Message>> {
        let fields = self
            .kvs
            .hgetall(&keys::topic_retain_msg(levels, packet_id))
            .await?;
        Message::from_fields(&fields)
    }

    /// Retain a message for the topic: list append plus record write,
    /// issued independently.
    pub async fn add_retained(
        &self,
        levels: &[String],
        packet_id: u16,
        message: &Message,
    ) -> Vec<OpOutcome> {
        let list_key = keys::topic_retain_list(levels);
        let record_key = keys::topic_retain_msg(levels, packet_id);
        let id = packet_id.to_string();
        await_all(vec![
            op(self.kvs.rpush(&list_key, &id)),
            op(self.kvs.hmset(&record_key, message.to_fields())),
        ])
        .await
    }

    /// Read and decode every retained message for the topic, oldest first.
    /// Ids without a record are unlinked; malformed records are dropped
    /// with a warning.
    pub async fn handle_all_retained(&self, levels: &[String]) -> StoreResult<Vec<Message>> {
        let ids = self.get_all_retained_ids(levels).await?;
        let mut messages = Vec::with_capacity(ids.len());
        for packet_id in ids {
            let fields = self
                .kvs
                .hgetall(&keys::topic_retain_msg(levels, packet_id))
                .await?;
            match Message::from_fields(&fields) {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => {
                    debug!(packet_id, "unlinking orphan retained id");
                    for outcome in self.unlink(levels, packet_id).await {
                        if let Err(err) = outcome {
                            warn!(packet_id, %err, "orphan retained unlink failed");
                        }
                    }
                }
                Err(err) => {
                    warn!(packet_id, %err, "dropping malformed retained record");
                }
            }
        }
        Ok(messages)
    }

    /// Drain the retained set head-first, bounded by the list length
    /// observed at entry. Returns how many records were dropped.
    pub async fn clear_all_retained(&self, levels: &[String]) -> StoreResult<u64> {
        let list_key = keys::topic_retain_list(levels);
        let bound = self.kvs.lrange_all(&list_key).await?.len();
        let mut removed = 0;
        for _ in 0..bound {
            let Some(head) = self.kvs.lpop(&list_key).await? else {
                break;
            };
            match head.parse::<u16>() {
                Ok(packet_id) => {
                    self.kvs
                        .del(&keys::topic_retain_msg(levels, packet_id))
                        .await?;
                    removed += 1;
                }
                Err(_) => warn!(entry = %head, "dropping non-numeric retained id"),
            }
        }
        Ok(removed)
    }

    async fn unlink(&self, levels: &[String], packet_id: u16) -> Vec<OpOutcome> {
        let list_key = keys::topic_retain_list(levels);
        let record_key = keys::topic_retain_msg(levels, packet_id);
        let id = packet_id.to_string();
        await_all(vec![
            op(self.kvs.lrem_all(&list_key, &id)),
            op(self.kvs.del(&record_key)),
        ])
        .await
    }
}
