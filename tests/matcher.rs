//! Forward matching scenarios per MQTT 3.1.1 wildcard semantics.

mod common;

use trellis::store::Qos;

async fn subscribe(storage: &trellis::store::Storage, client: &str, filter: &str, qos: Qos) {
    let levels = if trellis::topic::is_filter_str(filter) {
        common::filter(filter)
    } else {
        common::name(filter)
    };
    for outcome in storage
        .subscription()
        .update_subscription(client, &levels, qos)
        .await
    {
        outcome.unwrap();
    }
}

#[tokio::test]
async fn exact_topic_matches_its_subscriber() {
    let (storage, _kvs) = common::storage();
    subscribe(&storage, "c1", "a/b", Qos::AtLeastOnce).await;

    let result = storage.match_topic(&common::name("a/b")).await.unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.get("c1"), Some(Qos::AtLeastOnce));

    assert!(storage.match_topic(&common::name("a/c")).await.unwrap().is_empty());
    assert!(storage.match_topic(&common::name("a")).await.unwrap().is_empty());
}

#[tokio::test]
async fn plus_wildcard_matches_one_level() {
    let (storage, _kvs) = common::storage();
    subscribe(&storage, "c1", "a/+/c", Qos::ExactlyOnce).await;

    let result = storage.match_topic(&common::name("a/b/c")).await.unwrap();
    assert_eq!(result.get("c1"), Some(Qos::ExactlyOnce));

    assert!(storage.match_topic(&common::name("a/b")).await.unwrap().is_empty());
    assert!(storage
        .match_topic(&common::name("a/b/c/d"))
        .await
        .unwrap()
        .is_empty());
    assert!(storage
        .match_topic(&common::name("x/b/c"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn hash_wildcard_matches_any_depth_including_parent() {
    let (storage, _kvs) = common::storage();
    subscribe(&storage, "c1", "a/#", Qos::AtLeastOnce).await;

    for topic in ["a/b/c/d", "a/b", "a"] {
        let result = storage.match_topic(&common::name(topic)).await.unwrap();
        assert_eq!(result.get("c1"), Some(Qos::AtLeastOnce), "topic {topic}");
    }
    assert!(storage.match_topic(&common::name("b")).await.unwrap().is_empty());
}

#[tokio::test]
async fn overlapping_grants_collapse_to_max_qos() {
    let (storage, _kvs) = common::storage();
    subscribe(&storage, "c1", "a/+", Qos::AtMostOnce).await;
    subscribe(&storage, "c1", "a/b", Qos::ExactlyOnce).await;

    let result = storage.match_topic(&common::name("a/b")).await.unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.get("c1"), Some(Qos::ExactlyOnce));

    // The order of grants must not matter.
    let (storage, _kvs) = common::storage();
    subscribe(&storage, "c1", "a/b", Qos::AtMostOnce).await;
    subscribe(&storage, "c1", "a/+", Qos::ExactlyOnce).await;
    let result = storage.match_topic(&common::name("a/b")).await.unwrap();
    assert_eq!(result.get("c1"), Some(Qos::ExactlyOnce));
}

#[tokio::test]
async fn root_wildcards_match_ordinary_topics() {
    let (storage, _kvs) = common::storage();
    subscribe(&storage, "c1", "#", Qos::AtMostOnce).await;
    subscribe(&storage, "c2", "+", Qos::AtLeastOnce).await;
    subscribe(&storage, "c3", "+/b", Qos::ExactlyOnce).await;

    let result = storage.match_topic(&common::name("a")).await.unwrap();
    assert_eq!(result.get("c1"), Some(Qos::AtMostOnce));
    assert_eq!(result.get("c2"), Some(Qos::AtLeastOnce));
    assert_eq!(result.get("c3"), None);

    let result = storage.match_topic(&common::name("a/b")).await.unwrap();
    assert_eq!(result.get("c1"), Some(Qos::AtMostOnce));
    assert_eq!(result.get("c2"), None);
    assert_eq!(result.get("c3"), Some(Qos::ExactlyOnce));
}

#[tokio::test]
async fn system_topics_are_shielded_from_root_wildcards() {
    let (storage, _kvs) = common::storage();
    subscribe(&storage, "c1", "#", Qos::ExactlyOnce).await;
    subscribe(&storage, "c2", "+/status", Qos::ExactlyOnce).await;
    subscribe(&storage, "c3", "$SYS/#", Qos::AtLeastOnce).await;
    subscribe(&storage, "c4", "$SYS/+", Qos::AtLeastOnce).await;

    let result = storage.match_topic(&common::name("$SYS/status")).await.unwrap();
    assert_eq!(result.get("c1"), None);
    assert_eq!(result.get("c2"), None);
    assert_eq!(result.get("c3"), Some(Qos::AtLeastOnce));
    assert_eq!(result.get("c4"), Some(Qos::AtLeastOnce));

    // Ordinary topics still see the root wildcards.
    let result = storage.match_topic(&common::name("app/status")).await.unwrap();
    assert_eq!(result.get("c1"), Some(Qos::ExactlyOnce));
    assert_eq!(result.get("c2"), Some(Qos::ExactlyOnce));
}

#[tokio::test]
async fn empty_levels_participate_in_matching() {
    let (storage, _kvs) = common::storage();
    subscribe(&storage, "c1", "sport/+", Qos::AtLeastOnce).await;

    // "sport/" has an empty final level, which "+" matches.
    let result = storage.match_topic(&common::name("sport/")).await.unwrap();
    assert_eq!(result.get("c1"), Some(Qos::AtLeastOnce));

    // A leading empty level only matches filters that carry it.
    let (storage, _kvs) = common::storage();
    subscribe(&storage, "c1", "/finance", Qos::AtMostOnce).await;
    subscribe(&storage, "c2", "+/finance", Qos::AtMostOnce).await;
    let result = storage.match_topic(&common::name("/finance")).await.unwrap();
    assert_eq!(result.get("c1"), Some(Qos::AtMostOnce));
    assert_eq!(result.get("c2"), Some(Qos::AtMostOnce));
    assert!(storage
        .match_topic(&common::name("finance"))
        .await
        .unwrap()
        .get("c1")
        .is_none());
}

#[tokio::test]
async fn distinct_clients_all_reported() {
    let (storage, _kvs) = common::storage();
    subscribe(&storage, "c1", "a/b", Qos::AtMostOnce).await;
    subscribe(&storage, "c2", "a/+", Qos::AtLeastOnce).await;
    subscribe(&storage, "c3", "a/#", Qos::ExactlyOnce).await;
    subscribe(&storage, "c4", "other", Qos::ExactlyOnce).await;

    let result = storage.match_topic(&common::name("a/b")).await.unwrap();
    assert_eq!(result.len(), 3);
    assert_eq!(result.get("c1"), Some(Qos::AtMostOnce));
    assert_eq!(result.get("c2"), Some(Qos::AtLeastOnce));
    assert_eq!(result.get("c3"), Some(Qos::ExactlyOnce));

    let all: std::collections::HashMap<String, Qos> = result.into_inner();
    assert!(!all.contains_key("c4"));
}

#[tokio::test]
async fn unsubscribed_filter_stops_matching() {
    let (storage, _kvs) = common::storage();
    subscribe(&storage, "c1", "a/+", Qos::AtLeastOnce).await;
    subscribe(&storage, "c2", "a/+", Qos::AtLeastOnce).await;

    for outcome in storage
        .subscription()
        .remove_subscription("c1", &common::filter("a/+"))
        .await
    {
        outcome.unwrap();
    }

    let result = storage.match_topic(&common::name("a/b")).await.unwrap();
    assert_eq!(result.get("c1"), None);
    assert_eq!(result.get("c2"), Some(Qos::AtLeastOnce));
}
