//! Cluster-wide subscription index.
//!
//! Each subscription is mirrored three ways: the client's own map (topic
//! string -> granted QoS), the per-topic subscriber map, and for wildcard
//! filters the refcounted child edges along the filter's path in the trie.
//! The trailing END level of a sanitized filter materializes the terminator
//! edge with the same walk as every other edge.
//!
//! Counter updates are gated on the client map: a re-subscribe only
//! rewrites QoS values, and a remove only decrements when the entry was
//! actually present, so each surviving filter contributes exactly one
//! count per edge it traverses.

use super::{await_all, keys, op, OpOutcome, StorageError, StoreResult};
use crate::kvs::Kvs;
use crate::store::message::Qos;
use crate::topic;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Store facade for the subscription index.
#[derive(Clone)]
pub struct SubscriptionStore {
    kvs: Arc<dyn Kvs>,
}

impl SubscriptionStore {
    pub fn new(kvs: Arc<dyn Kvs>) -> Self {
        Self { kvs }
    }

    pub(crate) fn kvs(&self) -> &Arc<dyn Kvs> {
        &self.kvs
    }

    /// Subscribers registered at exactly these levels: the filter map for a
    /// wildcard filter, the name map otherwise.
    pub async fn get_topic_subscribers(
        &self,
        levels: &[String],
    ) -> StoreResult<HashMap<String, Qos>> {
        let key = if topic::is_filter(levels) {
            keys::topic_filter(levels)
        } else {
            keys::topic_name(levels)
        };
        let fields = self.kvs.hgetall(&key).await?;
        let mut subscribers = HashMap::with_capacity(fields.len());
        for (client_id, raw) in fields {
            match Qos::parse_bytes(&raw) {
                Some(qos) => {
                    subscribers.insert(client_id, qos);
                }
                None => {
                    warn!(key = %key, client_id = %client_id, "dropping subscriber with invalid qos");
                }
            }
        }
        Ok(subscribers)
    }

    /// The client's own subscription map: user-facing topic string ->
    /// granted QoS.
    pub async fn get_client_subscriptions(
        &self,
        client_id: &str,
    ) -> StoreResult<HashMap<String, Qos>> {
        let fields = self.kvs.hgetall(&keys::subscription(client_id)).await?;
        let mut subscriptions = HashMap::with_capacity(fields.len());
        for (topic_string, raw) in fields {
            match Qos::parse_bytes(&raw) {
                Some(qos) => {
                    subscriptions.insert(topic_string, qos);
                }
                None => {
                    warn!(client_id, topic = %topic_string, "dropping subscription with invalid qos");
                }
            }
        }
        Ok(subscriptions)
    }

    /// Register (or re-grant) a subscription. `levels` must be sanitized.
    ///
    /// The trie counters are only incremented when the client had no
    /// previous entry for this topic; re-subscribing merely rewrites the
    /// granted QoS in both mirrors.
    pub async fn update_subscription(
        &self,
        client_id: &str,
        levels: &[String],
        qos: Qos,
    ) -> Vec<OpOutcome> {
        let subs_key = keys::subscription(client_id);
        let topic_string = topic::join(levels);
        let qos_value = qos.as_u8().to_string().into_bytes();

        let existed = match self.kvs.hget(&subs_key, &topic_string).await {
            Ok(previous) => previous.is_some(),
            Err(err) => return vec![Err(StorageError::from(err))],
        };

        if topic::is_filter(levels) {
            let filter_key = keys::topic_filter(levels);
            let mut outcomes = await_all(vec![
                op(self.kvs.hset(&subs_key, &topic_string, &qos_value)),
                op(self.kvs.hset(&filter_key, client_id, &qos_value)),
            ])
            .await;
            if !existed {
                outcomes.extend(self.bump_filter_counters(levels, 1).await);
            }
            outcomes
        } else {
            let name_key = keys::topic_name(levels);
            await_all(vec![
                op(self.kvs.hset(&subs_key, &topic_string, &qos_value)),
                op(self.kvs.hset(&name_key, client_id, &qos_value)),
            ])
            .await
        }
    }

    /// Remove one subscription. `levels` must be sanitized. The counter
    /// walk only runs when the client actually held the entry.
    pub async fn remove_subscription(&self, client_id: &str, levels: &[String]) -> Vec<OpOutcome> {
        let subs_key = keys::subscription(client_id);
        let topic_string = topic::join(levels);

        let existed = match self.kvs.hdel(&subs_key, &topic_string).await {
            Ok(existed) => existed,
            Err(err) => return vec![Err(StorageError::from(err))],
        };

        let mut outcomes = self.remove_mirrors(client_id, levels, existed).await;
        outcomes.insert(0, Ok(()));
        outcomes
    }

    /// Remove every subscription of the client: snapshot the map, run the
    /// per-entry removal for each entry without re-reading, then drop the
    /// map itself.
    pub async fn remove_all_subscriptions(&self, client_id: &str) -> Vec<OpOutcome> {
        let subs_key = keys::subscription(client_id);
        let snapshot = match self.kvs.hgetall(&subs_key).await {
            Ok(snapshot) => snapshot,
            Err(err) => return vec![Err(StorageError::from(err))],
        };

        let mut outcomes = Vec::new();
        for topic_string in snapshot.keys() {
            let sanitized = if topic::is_filter_str(topic_string) {
                topic::sanitize_filter(topic_string)
            } else {
                topic::sanitize_name(topic_string)
            };
            match sanitized {
                Ok(levels) => {
                    outcomes.extend(self.remove_mirrors(client_id, &levels, true).await);
                }
                Err(err) => {
                    warn!(client_id, topic = %topic_string, %err, "skipping unparsable subscription entry");
                }
            }
        }
        outcomes.extend(await_all(vec![op(self.kvs.del(&subs_key))]).await);
        outcomes
    }

    /// Mirror-side removal for one entry: subscriber map plus, when the
    /// entry was known to exist, the counter walk for filters.
    async fn remove_mirrors(
        &self,
        client_id: &str,
        levels: &[String],
        decrement: bool,
    ) -> Vec<OpOutcome> {
        if topic::is_filter(levels) {
            let filter_key = keys::topic_filter(levels);
            let mut outcomes =
                await_all(vec![op(self.kvs.hdel(&filter_key, client_id))]).await;
            if decrement {
                outcomes.extend(self.bump_filter_counters(levels, -1).await);
            }
            outcomes
        } else {
            let name_key = keys::topic_name(levels);
            await_all(vec![op(self.kvs.hdel(&name_key, client_id))]).await
        }
    }

    /// Adjust every child edge refcount along the filter's path, terminator
    /// included (the last level of a sanitized filter is END). Edges are
    /// independent keys, so the whole walk is issued concurrently. A
    /// decrement that lands below zero is invariant drift: the field is
    /// clamped back to absent and the walk keeps going.
    async fn bump_filter_counters(&self, levels: &[String], delta: i64) -> Vec<OpOutcome> {
        join_all((0..levels.len()).map(|i| {
            let child_key = keys::topic_filter_child(&levels[..i]);
            let label = levels[i].as_str();
            async move {
                match self.kvs.hincrby(&child_key, label, delta).await {
                    Ok(count) if count < 0 => {
                        warn!(
                            key = %child_key,
                            label = %label_for_log(label),
                            count,
                            "trie counter went negative; clamping"
                        );
                        self.kvs
                            .hdel(&child_key, label)
                            .await
                            .map(|_| ())
                            .map_err(StorageError::from)
                    }
                    Ok(_) => Ok(()),
                    Err(err) => Err(StorageError::from(err)),
                }
            }
        }))
        .await
    }
}

fn label_for_log(label: &str) -> &str {
    if label == topic::END { "<end>" } else { label }
}
