//! The wire data model (§3.1 of the protocol this client implements).
//!
//! A [`Packet`] carries a small tagged [`PacketType`], a namespace path, an
//! optional JSON payload, an optional ack id, transport hints, and — only on
//! an outbound CONNECT — a query string. Binary payloads are carried
//! out-of-band as [`Packet::attachments`], with placeholder objects left in
//! `data` at the position each attachment occupied, mirroring how the
//! protocol's reference encoder threads `Buffer` values through JSON frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The small, stable set of packet type tags (§6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Connect,
    Disconnect,
    Event,
    Ack,
    Error,
    BinaryEvent,
    BinaryAck,
}

impl PacketType {
    pub fn as_u8(self) -> u8 {
        match self {
            PacketType::Connect => 0,
            PacketType::Disconnect => 1,
            PacketType::Event => 2,
            PacketType::Ack => 3,
            PacketType::Error => 4,
            PacketType::BinaryEvent => 5,
            PacketType::BinaryAck => 6,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => PacketType::Connect,
            1 => PacketType::Disconnect,
            2 => PacketType::Event,
            3 => PacketType::Ack,
            4 => PacketType::Error,
            5 => PacketType::BinaryEvent,
            6 => PacketType::BinaryAck,
            _ => return None,
        })
    }

    /// Whether this variant carries out-of-band binary attachments.
    pub fn is_binary(self) -> bool {
        matches!(self, PacketType::BinaryEvent | PacketType::BinaryAck)
    }

    /// The non-binary counterpart used once attachments have been stripped
    /// back out (EVENT for BINARY_EVENT, ACK for BINARY_ACK, identity otherwise).
    pub fn as_non_binary(self) -> Self {
        match self {
            PacketType::BinaryEvent => PacketType::Event,
            PacketType::BinaryAck => PacketType::Ack,
            other => other,
        }
    }

    /// The binary counterpart (EVENT -> BINARY_EVENT, ACK -> BINARY_ACK).
    pub fn as_binary(self) -> Self {
        match self {
            PacketType::Event => PacketType::BinaryEvent,
            PacketType::Ack => PacketType::BinaryAck,
            other => other,
        }
    }
}

/// A single argument in an EVENT/ACK payload, which may be plain JSON or a
/// raw byte buffer (carried as a placeholder + out-of-band attachment).
#[derive(Debug, Clone, PartialEq)]
pub enum EventArg {
    Json(Value),
    Bytes(Vec<u8>),
}

impl EventArg {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            EventArg::Json(v) => Some(v),
            EventArg::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            EventArg::Bytes(b) => Some(b),
            EventArg::Json(_) => None,
        }
    }
}

impl From<Value> for EventArg {
    fn from(v: Value) -> Self {
        EventArg::Json(v)
    }
}

impl From<Vec<u8>> for EventArg {
    fn from(b: Vec<u8>) -> Self {
        EventArg::Bytes(b)
    }
}

/// A binary placeholder object, `{"_placeholder":true,"num":N}`, matching
/// the marker the reference implementation splices into JSON in place of a
/// `Buffer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Placeholder {
    #[serde(rename = "_placeholder")]
    placeholder: bool,
    num: usize,
}

/// Transport hints attached to a packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacketOptions {
    pub compress: bool,
}

impl Default for PacketOptions {
    fn default() -> Self {
        Self { compress: true }
    }
}

/// A decoded or to-be-encoded protocol packet (§3.1).
#[derive(Debug, Clone)]
pub struct Packet {
    pub ptype: PacketType,
    pub nsp: String,
    pub data: Option<Value>,
    pub attachments: Vec<Vec<u8>>,
    pub id: Option<u64>,
    pub options: PacketOptions,
    /// Only meaningful on an outbound CONNECT; see §6.4 query carriage.
    pub query: Option<String>,
}

impl Packet {
    pub fn new(ptype: PacketType, nsp: impl Into<String>) -> Self {
        Self {
            ptype,
            nsp: nsp.into(),
            data: None,
            attachments: Vec::new(),
            id: None,
            options: PacketOptions::default(),
            query: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.options.compress = compress;
        self
    }

    /// Build an EVENT (or BINARY_EVENT, if any arg carries bytes) packet.
    ///
    /// `args[0]` is the event name; callers are responsible for enforcing
    /// the reserved-event restriction before constructing this (the packet
    /// layer itself carries no opinion on event names).
    pub fn event(nsp: impl Into<String>, event_name: &str, args: Vec<EventArg>) -> Self {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(EventArg::Json(Value::String(event_name.to_string())));
        full.extend(args);
        Self::from_args(PacketType::Event, nsp, full)
    }

    /// Build an ACK (or BINARY_ACK) packet carrying the ack id and reply args.
    pub fn ack(nsp: impl Into<String>, id: u64, args: Vec<EventArg>) -> Self {
        Self::from_args(PacketType::Ack, nsp, args).with_id(id)
    }

    fn from_args(base_type: PacketType, nsp: impl Into<String>, args: Vec<EventArg>) -> Self {
        let has_binary = args.iter().any(|a| matches!(a, EventArg::Bytes(_)));
        let mut attachments = Vec::new();
        let values: Vec<Value> = args
            .into_iter()
            .map(|a| match a {
                EventArg::Json(v) => v,
                EventArg::Bytes(b) => {
                    let num = attachments.len();
                    attachments.push(b);
                    serde_json::to_value(Placeholder {
                        placeholder: true,
                        num,
                    })
                    .expect("placeholder always serializes")
                }
            })
            .collect();

        let ptype = if has_binary {
            base_type.as_binary()
        } else {
            base_type
        };

        let mut pkt = Self::new(ptype, nsp).with_data(Value::Array(values));
        pkt.attachments = attachments;
        pkt
    }

    /// Reassemble top-level placeholder slots in `data` back into
    /// [`EventArg`]s using `attachments`. Only the top level of the data
    /// array is inspected, which is sufficient for EVENT/ACK payloads where
    /// binary buffers are passed as direct arguments rather than nested
    /// inside other structures.
    pub fn args(&self) -> Vec<EventArg> {
        let Some(Value::Array(items)) = &self.data else {
            return Vec::new();
        };
        items
            .iter()
            .map(|v| {
                if let Some(num) = placeholder_num(v) {
                    if let Some(bytes) = self.attachments.get(num) {
                        return EventArg::Bytes(bytes.clone());
                    }
                }
                EventArg::Json(v.clone())
            })
            .collect()
    }
}

fn placeholder_num(v: &Value) -> Option<usize> {
    let obj = v.as_object()?;
    if obj.get("_placeholder")?.as_bool()? {
        obj.get("num")?.as_u64().map(|n| n as usize)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_roundtrip() {
        for t in [
            PacketType::Connect,
            PacketType::Disconnect,
            PacketType::Event,
            PacketType::Ack,
            PacketType::Error,
            PacketType::BinaryEvent,
            PacketType::BinaryAck,
        ] {
            assert_eq!(PacketType::from_u8(t.as_u8()), Some(t));
        }
    }

    #[test]
    fn test_event_packet_is_plain_when_no_binary() {
        let pkt = Packet::event("/", "chat", vec![EventArg::Json(Value::from(1))]);
        assert_eq!(pkt.ptype, PacketType::Event);
        assert!(pkt.attachments.is_empty());
    }

    #[test]
    fn test_event_packet_promotes_to_binary() {
        let pkt = Packet::event(
            "/",
            "upload",
            vec![EventArg::Bytes(vec![1, 2, 3]), EventArg::Json(Value::from("note"))],
        );
        assert_eq!(pkt.ptype, PacketType::BinaryEvent);
        assert_eq!(pkt.attachments, vec![vec![1, 2, 3]]);

        let args = pkt.args();
        // args[0] is the event name, args[1] the bytes, args[2] the json note
        assert_eq!(args[0].as_json().unwrap(), "upload");
        assert_eq!(args[1].as_bytes().unwrap(), &[1, 2, 3]);
        assert_eq!(args[2].as_json().unwrap(), "note");
    }

    #[test]
    fn test_ack_packet_carries_id() {
        let pkt = Packet::ack("/chat", 7, vec![EventArg::Json(Value::from(true))]);
        assert_eq!(pkt.id, Some(7));
        assert_eq!(pkt.ptype, PacketType::Ack);
    }
}
