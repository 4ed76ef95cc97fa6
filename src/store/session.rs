//! Per-client session state: presence, session flag, packet id allocator,
//! QoS 2 dedup set, and the in-flight window.
//!
//! Composite operations issue their writes as independent commands and
//! await them together; no ordering is assumed across keys. Invariant
//! repairs happen on the read side: a listed packet id with no record is
//! treated as already acknowledged and unlinked.

use super::{await_all, keys, op, OpOutcome, StorageError, StoreResult};
use crate::kvs::{Kvs, ScanPage};
use crate::store::message::Message;
use std::sync::Arc;
use tracing::{debug, warn};

/// Highest assignable MQTT packet id; 0 is reserved by the protocol.
pub const MAX_PACKET_ID: u64 = 65_535;

/// Session flag stored for a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFlag {
    /// State is discarded at disconnect.
    Clean,
    /// Subscriptions and the in-flight window survive disconnects.
    Persistent,
}

impl SessionFlag {
    fn from_value(value: &str) -> StoreResult<Self> {
        match value {
            "1" => Ok(Self::Clean),
            "0" => Ok(Self::Persistent),
            other => Err(StorageError::Contract(format!(
                "unknown session flag {other:?}"
            ))),
        }
    }

    fn as_value(self) -> &'static str {
        match self {
            Self::Clean => "1",
            Self::Persistent => "0",
        }
    }
}

/// Store facade for session-scoped state.
#[derive(Clone)]
pub struct SessionStore {
    kvs: Arc<dyn Kvs>,
}

impl SessionStore {
    pub fn new(kvs: Arc<dyn Kvs>) -> Self {
        Self { kvs }
    }

    // --- presence -----------------------------------------------------

    /// Record that `client_id` is now hosted by `node`: membership in the
    /// node's client set plus the client's location pointer. Two
    /// independent writes; the presence pairing is re-established by the
    /// release protocol on the previous owner.
    pub async fn update_connected_node(&self, client_id: &str, node: &str) -> Vec<OpOutcome> {
        let clients_key = keys::connected_clients(node);
        let pointer_key = keys::connected_node(client_id);
        await_all(vec![
            op(self.kvs.sadd(&clients_key, client_id)),
            op(self.kvs.set(&pointer_key, node)),
        ])
        .await
    }

    /// Drop `client_id` from `node`'s presence. The location pointer is
    /// released with a compare-and-delete so a disconnect raced by a newer
    /// connection on another node never clobbers the new owner.
    pub async fn remove_connected_node(&self, client_id: &str, node: &str) -> Vec<OpOutcome> {
        let clients_key = keys::connected_clients(node);
        let pointer_key = keys::connected_node(client_id);
        await_all(vec![
            op(self.kvs.srem(&clients_key, client_id)),
            op(self.kvs.check_del(&pointer_key, node)),
        ])
        .await
    }

    /// Node currently hosting the client, if any.
    pub async fn get_connected_node(&self, client_id: &str) -> StoreResult<Option<String>> {
        Ok(self.kvs.get(&keys::connected_node(client_id)).await?)
    }

    /// Cursor-based page of the clients hosted by `node`.
    pub async fn scan_connected_clients(
        &self,
        node: &str,
        cursor: u64,
        count: u64,
    ) -> StoreResult<ScanPage> {
        Ok(self
            .kvs
            .sscan(&keys::connected_clients(node), cursor, count)
            .await?)
    }

    // --- session flag -------------------------------------------------

    pub async fn get_session(&self, client_id: &str) -> StoreResult<Option<SessionFlag>> {
        match self.kvs.get(&keys::session(client_id)).await? {
            None => Ok(None),
            Some(value) => SessionFlag::from_value(&value).map(Some),
        }
    }

    pub async fn update_session(&self, client_id: &str, flag: SessionFlag) -> StoreResult<()> {
        Ok(self
            .kvs
            .set(&keys::session(client_id), flag.as_value())
            .await?)
    }

    /// Returns true when a session flag existed.
    pub async fn remove_session(&self, client_id: &str) -> StoreResult<bool> {
        Ok(self.kvs.del(&keys::session(client_id)).await?)
    }

    // --- packet id allocator -------------------------------------------

    /// Next packet id for the client, in `1..=65535`, wrapping to 1.
    pub async fn next_packet_id(&self, client_id: &str) -> StoreResult<u16> {
        let id = self
            .kvs
            .incr_limit(&keys::next_packet_id(client_id), MAX_PACKET_ID)
            .await?;
        Ok(id as u16)
    }

    // --- QoS 2 inbound dedup -------------------------------------------

    /// Returns true when the id was newly recorded, false when it was
    /// already pending (a redelivered PUBLISH).
    pub async fn add_qos2_message_id(&self, client_id: &str, packet_id: u16) -> StoreResult<bool> {
        Ok(self
            .kvs
            .sadd(&keys::qos2_set(client_id), &packet_id.to_string())
            .await?)
    }

    /// Returns true when the id was pending, false for a stray PUBREL.
    pub async fn remove_qos2_message_id(
        &self,
        client_id: &str,
        packet_id: u16,
    ) -> StoreResult<bool> {
        Ok(self
            .kvs
            .srem(&keys::qos2_set(client_id), &packet_id.to_string())
            .await?)
    }

    /// Drop the whole dedup set. Returns true when it existed.
    pub async fn clear_qos2(&self, client_id: &str) -> StoreResult<bool> {
        Ok(self.kvs.del(&keys::qos2_set(client_id)).await?)
    }

    // --- in-flight window ----------------------------------------------

    /// Snapshot of the in-flight packet ids in FIFO order. Unparsable list
    /// entries are skipped with a warning.
    pub async fn get_all_in_flight_ids(&self, client_id: &str) -> StoreResult<Vec<u16>> {
        let raw = self
            .kvs
            .lrange_all(&keys::in_flight_list(client_id))
            .await?;
        let mut ids = Vec::with_capacity(raw.len());
        for item in raw {
            match item.parse::<u16>() {
                Ok(id) => ids.push(id),
                Err(_) => warn!(client_id, entry = %item, "dropping non-numeric in-flight id"),
            }
        }
        Ok(ids)
    }

    /// Read one in-flight record. `None` when no record exists; a
    /// malformed record surfaces as `StorageError::Contract`.
    pub async fn get_in_flight(
        &self,
        client_id: &str,
        packet_id: u16,
    ) -> StoreResult<Option<Message>> {
        let fields = self
            .kvs
            .hgetall(&keys::in_flight_msg(client_id, packet_id))
            .await?;
        Message::from_fields(&fields)
    }

    /// Link a message into the in-flight window: list append plus record
    /// write, issued independently.
    pub async fn add_in_flight(
        &self,
        client_id: &str,
        packet_id: u16,
        message: &Message,
    ) -> Vec<OpOutcome> {
        let list_key = keys::in_flight_list(client_id);
        let record_key = keys::in_flight_msg(client_id, packet_id);
        let id = packet_id.to_string();
        await_all(vec![
            op(self.kvs.rpush(&list_key, &id)),
            op(self.kvs.hmset(&record_key, message.to_fields())),
        ])
        .await
    }

    /// Unlink a message: every occurrence of the id leaves the list and the
    /// record is deleted.
    pub async fn remove_in_flight(&self, client_id: &str, packet_id: u16) -> Vec<OpOutcome> {
        let list_key = keys::in_flight_list(client_id);
        let record_key = keys::in_flight_msg(client_id, packet_id);
        let id = packet_id.to_string();
        await_all(vec![
            op(self.kvs.lrem_all(&list_key, &id)),
            op(self.kvs.del(&record_key)),
        ])
        .await
    }

    /// Drain the in-flight window head-first. The drain is bounded by the
    /// list length observed at entry, so it terminates even while new
    /// messages are being appended concurrently. Returns how many records
    /// were dropped.
    pub async fn clear_all_in_flight(&self, client_id: &str) -> StoreResult<u64> {
        let list_key = keys::in_flight_list(client_id);
        let bound = self.kvs.lrange_all(&list_key).await?.len();
        let mut removed = 0;
        for _ in 0..bound {
            let Some(head) = self.kvs.lpop(&list_key).await? else {
                break;
            };
            match head.parse::<u16>() {
                Ok(packet_id) => {
                    self.kvs
                        .del(&keys::in_flight_msg(client_id, packet_id))
                        .await?;
                    removed += 1;
                }
                Err(_) => warn!(client_id, entry = %head, "dropping non-numeric in-flight id"),
            }
        }
        Ok(removed)
    }

    /// Read and decode the whole in-flight window in FIFO order.
    ///
    /// Ids without a record are treated as already acknowledged and
    /// unlinked; malformed records are dropped with a warning.
    pub async fn handle_all_in_flight(&self, client_id: &str) -> StoreResult<Vec<Message>> {
        let ids = self.get_all_in_flight_ids(client_id).await?;
        let mut messages = Vec::with_capacity(ids.len());
        for packet_id in ids {
            let fields = self
                .kvs
                .hgetall(&keys::in_flight_msg(client_id, packet_id))
                .await?;
            match Message::from_fields(&fields) {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => {
                    debug!(client_id, packet_id, "unlinking orphan in-flight id");
                    for outcome in self.remove_in_flight(client_id, packet_id).await {
                        if let Err(err) = outcome {
                            warn!(client_id, packet_id, %err, "orphan in-flight unlink failed");
                        }
                    }
                }
                Err(err) => {
                    warn!(client_id, packet_id, %err, "dropping malformed in-flight record");
                }
            }
        }
        Ok(messages)
    }
}
