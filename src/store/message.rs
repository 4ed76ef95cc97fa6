//! Typed view of the in-flight and retained message records.
//!
//! Records live in the store as flat field maps so that every node, in any
//! language, can read them. This module is the single conversion point:
//! encoding is total, decoding surfaces [`StorageError::Contract`] for
//! malformed records so readers can drop them.

use super::StorageError;
use crate::kvs::FieldMap;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// Record field names, shared across the cluster.
const FIELD_TYPE: &str = "type";
const FIELD_RETAIN: &str = "retain";
const FIELD_QOS: &str = "qos";
const FIELD_DUP: &str = "dup";
const FIELD_TOPIC: &str = "topicName";
const FIELD_PACKET_ID: &str = "packetId";
const FIELD_PAYLOAD: &str = "payload";

// MQTT control packet type codes used as the record discriminator.
const TYPE_PUBLISH: &str = "3";
const TYPE_PUBREL: &str = "6";

/// Delivery guarantee level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Qos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            2 => Some(Self::ExactlyOnce),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }

    /// Parse a granted-QoS value as stored in subscriber maps ("0".."2").
    pub fn parse_bytes(raw: &[u8]) -> Option<Self> {
        match raw {
            b"0" => Some(Self::AtMostOnce),
            b"1" => Some(Self::AtLeastOnce),
            b"2" => Some(Self::ExactlyOnce),
            _ => None,
        }
    }
}

/// A PUBLISH waiting in a session's in-flight window or retained for a
/// topic. The payload is carried byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishMessage {
    pub topic: String,
    pub packet_id: u16,
    pub qos: Qos,
    pub retain: bool,
    pub dup: bool,
    pub payload: Bytes,
}

/// Message shapes that appear in in-flight records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Publish(PublishMessage),
    PubRel { packet_id: u16 },
}

impl Message {
    /// Encode into the stored field-map form.
    pub fn to_fields(&self) -> FieldMap {
        let mut map = HashMap::new();
        match self {
            Message::Publish(publish) => {
                map.insert(FIELD_TYPE.into(), TYPE_PUBLISH.into());
                map.insert(FIELD_RETAIN.into(), flag(publish.retain));
                map.insert(
                    FIELD_QOS.into(),
                    publish.qos.as_u8().to_string().into_bytes(),
                );
                map.insert(FIELD_DUP.into(), flag(publish.dup));
                map.insert(FIELD_TOPIC.into(), publish.topic.clone().into_bytes());
                map.insert(
                    FIELD_PACKET_ID.into(),
                    publish.packet_id.to_string().into_bytes(),
                );
                map.insert(FIELD_PAYLOAD.into(), publish.payload.to_vec());
            }
            Message::PubRel { packet_id } => {
                map.insert(FIELD_TYPE.into(), TYPE_PUBREL.into());
                // PUBREL always travels at QoS 1 on the wire.
                map.insert(FIELD_QOS.into(), b"1".to_vec());
                map.insert(FIELD_PACKET_ID.into(), packet_id.to_string().into_bytes());
            }
        }
        map
    }

    /// Decode a stored field map. `None` for an empty map (record already
    /// deleted); `StorageError::Contract` for a malformed one.
    pub fn from_fields(fields: &FieldMap) -> Result<Option<Self>, StorageError> {
        if fields.is_empty() {
            return Ok(None);
        }
        let kind = fields
            .get(FIELD_TYPE)
            .ok_or_else(|| StorageError::Contract("record is missing its type field".into()))?;
        match kind.as_slice() {
            raw if raw == TYPE_PUBLISH.as_bytes() => {
                let qos_raw = field_or(fields, FIELD_QOS, b"0");
                let qos = Qos::parse_bytes(&qos_raw).ok_or_else(|| {
                    StorageError::Contract(format!("bad qos in publish record: {qos_raw:?}"))
                })?;
                Ok(Some(Message::Publish(PublishMessage {
                    topic: text_field(fields, FIELD_TOPIC)?,
                    packet_id: packet_id_field(fields)?,
                    qos,
                    retain: field_or(fields, FIELD_RETAIN, b"0") == b"1",
                    dup: field_or(fields, FIELD_DUP, b"0") == b"1",
                    payload: fields
                        .get(FIELD_PAYLOAD)
                        .map(|raw| Bytes::copy_from_slice(raw))
                        .unwrap_or_default(),
                })))
            }
            raw if raw == TYPE_PUBREL.as_bytes() => Ok(Some(Message::PubRel {
                packet_id: packet_id_field(fields)?,
            })),
            other => Err(StorageError::Contract(format!(
                "unknown in-flight record type {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    /// Packet id carried by either record shape.
    pub fn packet_id(&self) -> u16 {
        match self {
            Message::Publish(publish) => publish.packet_id,
            Message::PubRel { packet_id } => *packet_id,
        }
    }
}

fn flag(value: bool) -> Vec<u8> {
    if value { b"1".to_vec() } else { b"0".to_vec() }
}

fn field_or(fields: &FieldMap, name: &str, default: &[u8]) -> Vec<u8> {
    fields.get(name).cloned().unwrap_or_else(|| default.to_vec())
}

fn text_field(fields: &FieldMap, name: &str) -> Result<String, StorageError> {
    let raw = fields
        .get(name)
        .ok_or_else(|| StorageError::Contract(format!("record is missing field {name:?}")))?;
    String::from_utf8(raw.clone())
        .map_err(|_| StorageError::Contract(format!("field {name:?} is not valid UTF-8")))
}

fn packet_id_field(fields: &FieldMap) -> Result<u16, StorageError> {
    let raw = field_or(fields, FIELD_PACKET_ID, b"0");
    std::str::from_utf8(&raw)
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| StorageError::Contract(format!("bad packet id: {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_publish() -> Message {
        Message::Publish(PublishMessage {
            topic: "sensors/kitchen/temp".into(),
            packet_id: 42,
            qos: Qos::ExactlyOnce,
            retain: true,
            dup: false,
            payload: Bytes::from_static(b"\x00\xffbinary\x01"),
        })
    }

    #[test]
    fn test_publish_round_trip_preserves_payload_bytes() {
        let message = sample_publish();
        let decoded = Message::from_fields(&message.to_fields()).unwrap().unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_pubrel_round_trip() {
        let message = Message::PubRel { packet_id: 9 };
        let fields = message.to_fields();
        assert_eq!(fields.get("qos").map(Vec::as_slice), Some(&b"1"[..]));
        let decoded = Message::from_fields(&fields).unwrap().unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_empty_map_decodes_to_none() {
        assert_eq!(Message::from_fields(&FieldMap::new()).unwrap(), None);
    }

    #[test]
    fn test_missing_type_is_a_contract_violation() {
        let mut fields = FieldMap::new();
        fields.insert("packetId".into(), b"1".to_vec());
        assert!(matches!(
            Message::from_fields(&fields),
            Err(StorageError::Contract(_))
        ));
    }

    #[test]
    fn test_unknown_type_is_a_contract_violation() {
        let mut fields = FieldMap::new();
        fields.insert("type".into(), b"12".to_vec());
        assert!(matches!(
            Message::from_fields(&fields),
            Err(StorageError::Contract(_))
        ));
    }
}
