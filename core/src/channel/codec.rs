//! Engine.IO v4 and Socket.IO v5 packet encoding for the long-polling transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator between packets in a polling payload.
pub const RECORD_SEPARATOR: char = '\u{1e}';

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum CodecError {
    #[error("empty packet")]
    Empty,
    #[error("unknown engine packet type {0:?}")]
    UnknownEngineType(char),
    #[error("unknown socket packet type {0:?}")]
    UnknownSocketType(char),
    #[error("malformed packet: {0}")]
    Malformed(String),
}

/// Transport-level packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(String),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
    /// Base64 binary message, carried through undecoded.
    Binary(String),
}

impl EnginePacket {
    pub fn decode(raw: &str) -> Result<Self, CodecError> {
        let mut chars = raw.chars();
        let kind = chars.next().ok_or(CodecError::Empty)?;
        let data = chars.as_str().to_string();
        Ok(match kind {
            '0' => EnginePacket::Open(data),
            '1' => EnginePacket::Close,
            '2' => EnginePacket::Ping(data),
            '3' => EnginePacket::Pong(data),
            '4' => EnginePacket::Message(data),
            '5' => EnginePacket::Upgrade,
            '6' => EnginePacket::Noop,
            'b' => EnginePacket::Binary(data),
            other => return Err(CodecError::UnknownEngineType(other)),
        })
    }

    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(data) => format!("0{data}"),
            EnginePacket::Close => "1".into(),
            EnginePacket::Ping(data) => format!("2{data}"),
            EnginePacket::Pong(data) => format!("3{data}"),
            EnginePacket::Message(data) => format!("4{data}"),
            EnginePacket::Upgrade => "5".into(),
            EnginePacket::Noop => "6".into(),
            EnginePacket::Binary(data) => format!("b{data}"),
        }
    }
}

/// Splits a polling response body into packets.
pub fn decode_payload(body: &str) -> Result<Vec<EnginePacket>, CodecError> {
    body.split(RECORD_SEPARATOR)
        .filter(|raw| !raw.is_empty())
        .map(EnginePacket::decode)
        .collect()
}

pub fn encode_payload(packets: &[EnginePacket]) -> String {
    packets
        .iter()
        .map(EnginePacket::encode)
        .collect::<Vec<_>>()
        .join(&RECORD_SEPARATOR.to_string())
}

/// Body of the `open` packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeData {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default = "default_max_payload")]
    pub max_payload: u64,
}

fn default_max_payload() -> u64 {
    1_000_000
}

impl HandshakeData {
    pub fn parse(data: &str) -> Result<Self, CodecError> {
        serde_json::from_str(data).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketPacketKind {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
    BinaryEvent,
    BinaryAck,
}

impl SocketPacketKind {
    fn from_char(c: char) -> Result<Self, CodecError> {
        Ok(match c {
            '0' => Self::Connect,
            '1' => Self::Disconnect,
            '2' => Self::Event,
            '3' => Self::Ack,
            '4' => Self::ConnectError,
            '5' => Self::BinaryEvent,
            '6' => Self::BinaryAck,
            other => return Err(CodecError::UnknownSocketType(other)),
        })
    }

    fn as_char(self) -> char {
        match self {
            Self::Connect => '0',
            Self::Disconnect => '1',
            Self::Event => '2',
            Self::Ack => '3',
            Self::ConnectError => '4',
            Self::BinaryEvent => '5',
            Self::BinaryAck => '6',
        }
    }

    fn is_binary(self) -> bool {
        matches!(self, Self::BinaryEvent | Self::BinaryAck)
    }
}

/// Namespace-level packet carried inside an engine `message`.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketPacket {
    pub kind: SocketPacketKind,
    pub namespace: String,
    pub attachments: u32,
    pub ack_id: Option<u64>,
    pub data: Option<Value>,
}

impl SocketPacket {
    pub fn connect(namespace: &str) -> Self {
        Self::bare(SocketPacketKind::Connect, namespace)
    }

    pub fn disconnect(namespace: &str) -> Self {
        Self::bare(SocketPacketKind::Disconnect, namespace)
    }

    pub fn event(namespace: &str, name: &str, args: Vec<Value>) -> Self {
        let mut items = Vec::with_capacity(args.len() + 1);
        items.push(Value::String(name.to_string()));
        items.extend(args);
        Self {
            data: Some(Value::Array(items)),
            ..Self::bare(SocketPacketKind::Event, namespace)
        }
    }

    fn bare(kind: SocketPacketKind, namespace: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            attachments: 0,
            ack_id: None,
            data: None,
        }
    }

    pub fn decode(raw: &str) -> Result<Self, CodecError> {
        let mut rest = raw;
        let kind_char = rest.chars().next().ok_or(CodecError::Empty)?;
        let kind = SocketPacketKind::from_char(kind_char)?;
        rest = &rest[kind_char.len_utf8()..];

        let mut attachments = 0;
        if kind.is_binary() {
            let dash = rest
                .find('-')
                .ok_or_else(|| CodecError::Malformed("missing attachment count".into()))?;
            attachments = rest[..dash]
                .parse()
                .map_err(|_| CodecError::Malformed("bad attachment count".into()))?;
            rest = &rest[dash + 1..];
        }

        let mut namespace = "/".to_string();
        if rest.starts_with('/') {
            match rest.find(',') {
                Some(comma) => {
                    namespace = rest[..comma].to_string();
                    rest = &rest[comma + 1..];
                }
                None => {
                    namespace = rest.to_string();
                    rest = "";
                }
            }
        }

        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        let ack_id = if digits > 0 {
            let id = rest[..digits]
                .parse()
                .map_err(|_| CodecError::Malformed("bad ack id".into()))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest).map_err(|e| CodecError::Malformed(e.to_string()))?)
        };

        Ok(Self {
            kind,
            namespace,
            attachments,
            ack_id,
            data,
        })
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.kind.as_char());
        if self.kind.is_binary() {
            out.push_str(&format!("{}-", self.attachments));
        }
        if self.namespace != "/" {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = self.ack_id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    /// Event name and first argument of an EVENT packet.
    pub fn event_parts(&self) -> Option<(&str, &Value)> {
        if self.kind != SocketPacketKind::Event {
            return None;
        }
        let items = self.data.as_ref()?.as_array()?;
        let name = items.first()?.as_str()?;
        Some((name, items.get(1).unwrap_or(&Value::Null)))
    }
}
