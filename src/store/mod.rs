//! The shared session and routing store.
//!
//! This module groups everything the MQTT front-end calls into during a
//! connection's life:
//! - `session` - presence, session flag, packet id allocation, QoS 2
//!   dedup, in-flight window
//! - `subscription` - the cluster-wide subscription index and trie
//! - `matcher` - forward matching from a published topic to subscribers
//! - `retained` - per-topic retained messages
//! - `message` - the stored record codec
//! - `keys` - the key schema every node shares
//!
//! [`Storage`] bundles the stores over one shared KVS handle and carries
//! the composite operations that span them.

pub mod keys;
pub mod matcher;
pub mod message;
pub mod retained;
pub mod session;
pub mod subscription;

pub use matcher::MatchResult;
pub use message::{Message, PublishMessage, Qos};
pub use retained::RetainedStore;
pub use session::{SessionFlag, SessionStore, MAX_PACKET_ID};
pub use subscription::SubscriptionStore;

use crate::config::StoreConfig;
use crate::kvs::{BackendRegistry, Kvs, KvsError, KvsResult, ScanPage};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::sync::Arc;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StorageError>;

/// Outcome of one sub-operation inside a composite store operation.
pub type OpOutcome = StoreResult<()>;

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The KVS failed or timed out; the caller retries or drops the client.
    #[error(transparent)]
    Kvs(#[from] KvsError),
    /// A stored record violates the shared data model and was dropped.
    #[error("stored record violates the data model: {0}")]
    Contract(String),
}

/// Await a batch of independent sub-operation futures together, capturing
/// every outcome. Nothing is masked: the caller sees partial success
/// exactly as it happened.
pub async fn await_all<'a, T>(futures: Vec<BoxFuture<'a, StoreResult<T>>>) -> Vec<StoreResult<T>> {
    join_all(futures).await
}

/// Reduce a batch of outcomes to the first failure, if any.
pub fn first_error(outcomes: Vec<OpOutcome>) -> OpOutcome {
    outcomes.into_iter().find(Result::is_err).unwrap_or(Ok(()))
}

/// Box a raw KVS future as a unit sub-operation.
pub(crate) fn op<'a, T, F>(future: F) -> BoxFuture<'a, OpOutcome>
where
    T: Send + 'a,
    F: std::future::Future<Output = KvsResult<T>> + Send + 'a,
{
    future
        .map(|result| result.map(|_| ()).map_err(StorageError::from))
        .boxed()
}

/// All cluster state a broker node reads and writes, over one shared KVS
/// connection. Carries the node's configured identity so presence
/// bookkeeping for this node never spells the node id by hand.
#[derive(Clone)]
pub struct Storage {
    node_id: String,
    scan_count: u64,
    session: SessionStore,
    subscription: SubscriptionStore,
    retained: RetainedStore,
}

impl Storage {
    /// Build the store around an existing KVS handle.
    pub fn new(config: &StoreConfig, kvs: Arc<dyn Kvs>) -> Self {
        Self {
            node_id: config.node_id.clone(),
            scan_count: config.scan_count,
            session: SessionStore::new(kvs.clone()),
            subscription: SubscriptionStore::new(kvs.clone()),
            retained: RetainedStore::new(kvs),
        }
    }

    /// Resolve the configured KVS backend and build the store around it.
    pub fn open(config: &StoreConfig, registry: &BackendRegistry) -> KvsResult<Self> {
        let kvs = registry.open(&config.kvs_uri)?;
        Ok(Self::new(config, kvs))
    }

    /// This broker node's cluster-unique id.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn subscription(&self) -> &SubscriptionStore {
        &self.subscription
    }

    pub fn retained(&self) -> &RetainedStore {
        &self.retained
    }

    /// Record that this node now hosts `client_id`.
    pub async fn update_local_presence(&self, client_id: &str) -> Vec<OpOutcome> {
        self.session
            .update_connected_node(client_id, &self.node_id)
            .await
    }

    /// Release this node's presence claim on `client_id`; a rebinding to
    /// another node is left intact.
    pub async fn remove_local_presence(&self, client_id: &str) -> Vec<OpOutcome> {
        self.session
            .remove_connected_node(client_id, &self.node_id)
            .await
    }

    /// One configured-size page of the clients hosted by this node.
    pub async fn scan_local_clients(&self, cursor: u64) -> StoreResult<ScanPage> {
        self.session
            .scan_connected_clients(&self.node_id, cursor, self.scan_count)
            .await
    }

    /// Forward-match a published topic against the subscription index.
    pub async fn match_topic(&self, levels: &[String]) -> StoreResult<MatchResult> {
        self.subscription.match_topic(levels).await
    }

    /// Tear down everything a clean-session disconnect leaves behind:
    /// session flag, subscriptions, QoS 2 dedup set, and the in-flight
    /// window. Partial failures are reported per sub-operation.
    pub async fn remove_all_session_state(&self, client_id: &str) -> Vec<OpOutcome> {
        let mut outcomes = Vec::new();
        outcomes.push(self.session.remove_session(client_id).await.map(|_| ()));
        outcomes.extend(self.subscription.remove_all_subscriptions(client_id).await);
        outcomes.push(self.session.clear_qos2(client_id).await.map(|_| ()));
        outcomes.push(self.session.clear_all_in_flight(client_id).await.map(|_| ()));
        outcomes
    }
}
