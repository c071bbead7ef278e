//! Engine.IO v4 / Socket.IO v5 text packet codec
//!
//! Engine.IO frame: `<type digit><payload>`. A Socket.IO packet rides inside an
//! Engine.IO message (type 4) as
//! `<type digit>[<namespace>,][<ack id>][<JSON payload>]`.
//! Binary attachments are not supported.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::UpdateError;

pub const DEFAULT_NAMESPACE: &str = "/";

/// Engine.IO open packet payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(SocketPacket),
    Upgrade,
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
}

impl SocketPacket {
    /// Namespace connect request for the default namespace
    pub fn connect() -> Self {
        SocketPacket::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: None,
        }
    }

    pub fn disconnect() -> Self {
        SocketPacket::Disconnect {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::Ack { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
        }
    }
}

fn malformed(text: &str, reason: &str) -> UpdateError {
    UpdateError::MalformedResponse(format!("{} in packet {:?}", reason, text))
}

/// Decode an Engine.IO text frame
pub fn decode(text: &str) -> Result<EnginePacket, UpdateError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or_else(|| malformed(text, "empty frame"))?;
    let rest = chars.as_str();

    match kind {
        '0' => {
            let handshake = serde_json::from_str(rest)
                .map_err(|e| malformed(text, &format!("invalid handshake ({})", e)))?;
            Ok(EnginePacket::Open(handshake))
        }
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping(rest.to_string())),
        '3' => Ok(EnginePacket::Pong(rest.to_string())),
        '4' => Ok(EnginePacket::Message(decode_socket(rest)?)),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        _ => Err(malformed(text, "unknown engine packet type")),
    }
}

fn decode_socket(text: &str) -> Result<SocketPacket, UpdateError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or_else(|| malformed(text, "empty message"))?;
    let mut rest = chars.as_str();

    let mut namespace = DEFAULT_NAMESPACE.to_string();
    if rest.starts_with('/') {
        match rest.find(',') {
            Some(idx) => {
                namespace = rest[..idx].to_string();
                rest = &rest[idx + 1..];
            }
            None => {
                namespace = rest.to_string();
                rest = "";
            }
        }
    }

    let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    let id = if digits > 0 {
        Some(
            rest[..digits]
                .parse::<u64>()
                .map_err(|_| malformed(text, "invalid ack id"))?,
        )
    } else {
        None
    };
    rest = &rest[digits..];

    let payload = if rest.is_empty() {
        None
    } else {
        Some(
            serde_json::from_str::<Value>(rest)
                .map_err(|e| malformed(text, &format!("invalid payload ({})", e)))?,
        )
    };

    match kind {
        '0' => Ok(SocketPacket::Connect {
            namespace,
            data: payload,
        }),
        '1' => Ok(SocketPacket::Disconnect { namespace }),
        '2' => {
            let mut args = match payload {
                Some(Value::Array(items)) => items,
                _ => return Err(malformed(text, "event payload is not an array")),
            };
            if args.is_empty() {
                return Err(malformed(text, "event without name"));
            }
            let name = match args.remove(0) {
                Value::String(name) => name,
                _ => return Err(malformed(text, "event name is not a string")),
            };
            Ok(SocketPacket::Event {
                namespace,
                id,
                name,
                args,
            })
        }
        '3' => {
            let id = id.ok_or_else(|| malformed(text, "ack without id"))?;
            let args = match payload {
                Some(Value::Array(items)) => items,
                None => Vec::new(),
                _ => return Err(malformed(text, "ack payload is not an array")),
            };
            Ok(SocketPacket::Ack {
                namespace,
                id,
                args,
            })
        }
        '4' => Ok(SocketPacket::ConnectError {
            namespace,
            data: payload,
        }),
        '5' | '6' => Err(malformed(text, "binary packets are not supported")),
        _ => Err(malformed(text, "unknown socket packet type")),
    }
}

/// Encode an Engine.IO text frame
pub fn encode(packet: &EnginePacket) -> String {
    match packet {
        EnginePacket::Open(handshake) => {
            format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
        }
        EnginePacket::Close => "1".to_string(),
        EnginePacket::Ping(data) => format!("2{}", data),
        EnginePacket::Pong(data) => format!("3{}", data),
        EnginePacket::Message(socket) => format!("4{}", encode_socket(socket)),
        EnginePacket::Upgrade => "5".to_string(),
        EnginePacket::Noop => "6".to_string(),
    }
}

fn encode_socket(packet: &SocketPacket) -> String {
    let (kind, id, payload) = match packet {
        SocketPacket::Connect { data, .. } => ('0', None, data.clone()),
        SocketPacket::Disconnect { .. } => ('1', None, None),
        SocketPacket::Event { id, name, args, .. } => {
            let mut items = Vec::with_capacity(args.len() + 1);
            items.push(Value::String(name.clone()));
            items.extend(args.iter().cloned());
            ('2', *id, Some(Value::Array(items)))
        }
        SocketPacket::Ack { id, args, .. } => ('3', Some(*id), Some(Value::Array(args.clone()))),
        SocketPacket::ConnectError { data, .. } => ('4', None, data.clone()),
    };

    let mut out = String::new();
    out.push(kind);
    let namespace = packet.namespace();
    if namespace != DEFAULT_NAMESPACE {
        out.push_str(namespace);
        out.push(',');
    }
    if let Some(id) = id {
        out.push_str(&id.to_string());
    }
    if let Some(payload) = payload {
        out.push_str(&payload.to_string());
    }
    out
}
