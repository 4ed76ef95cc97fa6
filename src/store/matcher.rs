//! Forward matching from a published topic to its subscribers.
//!
//! The subscription trie is virtual: each node is the child-counter map
//! stored under its prefix, and an edge exists iff its refcount is
//! positive. Matching a concrete topic walks that trie with at most one
//! counter read per visited node, following the literal edge, the `+`
//! edge, and emitting `#` subscribers wherever the multi-level edge is
//! present. The walk is an explicit work stack rather than recursion, so
//! its depth cost is bounded by the topic length no matter how wide the
//! fan-out gets.

use super::{keys, StoreResult};
use crate::store::message::Qos;
use crate::store::subscription::SubscriptionStore;
use crate::topic;
use std::collections::HashMap;

/// Subscribers of a published topic, de-duplicated per client with the
/// maximum granted QoS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    subscribers: HashMap<String, Qos>,
}

impl MatchResult {
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn get(&self, client_id: &str) -> Option<Qos> {
        self.subscribers.get(client_id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, Qos)> {
        self.subscribers.iter().map(|(client, qos)| (client, *qos))
    }

    pub fn into_inner(self) -> HashMap<String, Qos> {
        self.subscribers
    }

    fn merge(&mut self, subscribers: HashMap<String, Qos>) {
        for (client_id, qos) in subscribers {
            self.subscribers
                .entry(client_id)
                .and_modify(|granted| *granted = (*granted).max(qos))
                .or_insert(qos);
        }
    }
}

impl SubscriptionStore {
    /// Find every subscriber whose subscription matches the published
    /// topic `levels` (a sanitized, END-terminated topic name).
    ///
    /// Exact `topic_name` subscribers are emitted unconditionally; the
    /// trie walk then enumerates every matching filter. Topics whose first
    /// level starts with `$` are shielded from wildcard edges at the root,
    /// so `#` and `+` never observe system topics while `$SYS/...`-rooted
    /// filters still match.
    pub async fn match_topic(&self, levels: &[String]) -> StoreResult<MatchResult> {
        let mut result = MatchResult::default();
        result.merge(self.get_topic_subscribers(levels).await?);

        let shield_root = levels
            .first()
            .is_some_and(|level| level.starts_with('$'));

        // Work stack of (level vector variant, next index). Variants differ
        // from the published topic only in levels already rewritten to `+`.
        let mut stack: Vec<(Vec<String>, usize)> = vec![(levels.to_vec(), 0)];
        while let Some((variant, index)) = stack.pop() {
            let prefix = &variant[..index];
            let child_key = keys::topic_filter_child(prefix);
            if index == variant.len() - 1 {
                // Terminal node: the only meaningful children are the END
                // terminator of a complete filter and a trailing `#`.
                let counters = self.kvs().hmget(&child_key, &[topic::END, "#"]).await?;
                if positive(counters[0].as_deref()) {
                    result.merge(self.get_topic_subscribers(&variant).await?);
                }
                if positive(counters[1].as_deref()) {
                    result
                        .merge(self.get_topic_subscribers(&hash_filter(prefix)).await?);
                }
            } else {
                let literal = variant[index].as_str();
                let counters = self.kvs().hmget(&child_key, &[literal, "#", "+"]).await?;
                if positive(counters[0].as_deref()) {
                    stack.push((variant.clone(), index + 1));
                }
                if index == 0 && shield_root {
                    continue;
                }
                if positive(counters[1].as_deref()) {
                    result
                        .merge(self.get_topic_subscribers(&hash_filter(prefix)).await?);
                }
                if positive(counters[2].as_deref()) {
                    let mut rewritten = variant.clone();
                    rewritten[index] = "+".to_owned();
                    stack.push((rewritten, index + 1));
                }
            }
        }
        Ok(result)
    }
}

/// The multi-level filter `prefix/#`, END-terminated.
fn hash_filter(prefix: &[String]) -> Vec<String> {
    let mut levels = Vec::with_capacity(prefix.len() + 2);
    levels.extend_from_slice(prefix);
    levels.push("#".to_owned());
    levels.push(topic::END.to_owned());
    levels
}

/// A counter field is live iff present and strictly positive.
fn positive(raw: Option<&[u8]>) -> bool {
    raw.and_then(|bytes| std::str::from_utf8(bytes).ok())
        .and_then(|text| text.parse::<i64>().ok())
        .is_some_and(|count| count > 0)
}
