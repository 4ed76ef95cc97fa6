//! Key schema for every logical entity in the shared store.
//!
//! Keys are deterministic functions of their arguments and identical on
//! every node. Level lists are joined with `/` after sanitizing, so the
//! trailing END sentinel keeps `a/b` and `a//b` (and a filter vs. its own
//! prefix) unambiguous.

/// Set of client ids currently hosted by `node`.
pub fn connected_clients(node: &str) -> String {
    format!("node:{node}:clients")
}

/// Node currently hosting `client_id`.
pub fn connected_node(client_id: &str) -> String {
    format!("client:{client_id}:node")
}

/// Session flag: "1" clean, "0" persistent, absent when no session exists.
pub fn session(client_id: &str) -> String {
    format!("client:{client_id}:session")
}

/// Monotonic packet id allocator state.
pub fn next_packet_id(client_id: &str) -> String {
    format!("client:{client_id}:pid")
}

/// Packet ids of received QoS 2 PUBLISHes awaiting PUBREL.
pub fn qos2_set(client_id: &str) -> String {
    format!("client:{client_id}:qos2")
}

/// FIFO list of in-flight packet ids.
pub fn in_flight_list(client_id: &str) -> String {
    format!("client:{client_id}:inflight")
}

/// Record of one in-flight message.
pub fn in_flight_msg(client_id: &str, packet_id: u16) -> String {
    format!("client:{client_id}:inflight:{packet_id}")
}

/// Map of topic string to granted QoS for one client.
pub fn subscription(client_id: &str) -> String {
    format!("client:{client_id}:subs")
}

/// Subscribers of an exact topic name (client id -> granted QoS).
pub fn topic_name(levels: &[String]) -> String {
    format!("topic:name:{}", levels.join("/"))
}

/// Subscribers of a wildcard topic filter (client id -> granted QoS).
pub fn topic_filter(levels: &[String]) -> String {
    format!("topic:filter:{}", levels.join("/"))
}

/// Trie child counters under `prefix` (child label -> refcount).
pub fn topic_filter_child(prefix: &[String]) -> String {
    format!("topic:child:{}", prefix.join("/"))
}

/// FIFO list of retained packet ids for an exact topic.
pub fn topic_retain_list(levels: &[String]) -> String {
    format!("topic:retain:{}", levels.join("/"))
}

/// Record of one retained message.
pub fn topic_retain_msg(levels: &[String], packet_id: u16) -> String {
    format!("topic:retain:{}:{packet_id}", levels.join("/"))
}
