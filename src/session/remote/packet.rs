//! Socket.IO (v2) packets over Engine.IO (v3) text frames.

use crate::error::Error;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Ping interval used when the server does not announce one.
const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(25_000);
/// Pong wait used when the server does not announce one.
const DEFAULT_PING_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Handshake data sent by the server in the engine.io open packet.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

impl Handshake {
    pub fn ping_interval(&self) -> Duration {
        if self.ping_interval == 0 {
            DEFAULT_PING_INTERVAL
        } else {
            Duration::from_millis(self.ping_interval)
        }
    }

    pub fn ping_timeout(&self) -> Duration {
        if self.ping_timeout == 0 {
            DEFAULT_PING_TIMEOUT
        } else {
            Duration::from_millis(self.ping_timeout)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine.io transport is open.
    Open(Handshake),
    /// Engine.io transport is closed by peer.
    Close,
    Ping,
    Pong,
    /// Socket.io namespace is connected.
    Connect,
    /// Socket.io namespace is disconnected by peer.
    Disconnect,
    Event { name: String, payload: Value },
    /// Acknowledgement of an emitted event, ignored by this client.
    Ack,
    Error(String),
    Noop,
}

impl Packet {
    /// Decode an engine.io text frame.
    pub fn decode(frame: &str) -> Result<Packet, Error> {
        let malformed = || Error::Packet(frame.to_string());
        let mut chars = frame.chars();
        let kind = chars.next().ok_or_else(malformed)?;
        let rest = chars.as_str();

        let packet = match kind {
            '0' => {
                let handshake: Handshake = serde_json::from_str(rest).map_err(|_| malformed())?;
                Packet::Open(handshake)
            }
            '1' => Packet::Close,
            '2' => Packet::Ping,
            '3' => Packet::Pong,
            '4' => Self::decode_message(rest).ok_or_else(malformed)?,
            '6' => Packet::Noop,
            _ => return Err(malformed()),
        };
        Ok(packet)
    }

    fn decode_message(data: &str) -> Option<Packet> {
        let mut chars = data.chars();
        let kind = chars.next()?;
        let body = skip_ack_id(skip_namespace(chars.as_str()));

        let packet = match kind {
            '0' => Packet::Connect,
            '1' => Packet::Disconnect,
            '2' => {
                let mut items = match serde_json::from_str::<Value>(body).ok()? {
                    Value::Array(items) => items.into_iter(),
                    _ => return None,
                };
                let name = match items.next()? {
                    Value::String(name) => name,
                    _ => return None,
                };
                Packet::Event {
                    name,
                    payload: items.next().unwrap_or(Value::Null),
                }
            }
            '3' => Packet::Ack,
            '4' => {
                let message = match serde_json::from_str::<Value>(body) {
                    Ok(Value::String(s)) => s,
                    Ok(other) => other.to_string(),
                    Err(_) => body.to_string(),
                };
                Packet::Error(message)
            }
            _ => return None,
        };
        Some(packet)
    }

    /// Encode a packet into an engine.io text frame.
    pub fn encode(&self) -> String {
        match self {
            Packet::Open(hs) => format!(
                "0{{\"sid\":\"{}\",\"pingInterval\":{},\"pingTimeout\":{}}}",
                hs.sid, hs.ping_interval, hs.ping_timeout
            ),
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::Pong => "3".to_string(),
            Packet::Connect => "40".to_string(),
            Packet::Disconnect => "41".to_string(),
            Packet::Event { name, payload } => {
                format!("42{}", Value::Array(vec![Value::from(name.as_str()), payload.clone()]))
            }
            Packet::Ack => "43".to_string(),
            Packet::Error(msg) => format!("44{}", Value::from(msg.as_str())),
            Packet::Noop => "6".to_string(),
        }
    }
}

/// Namespace is in form `/nsp,`, default namespace is omitted.
fn skip_namespace(data: &str) -> &str {
    if !data.starts_with('/') {
        return data;
    }
    match data.find(',') {
        Some(pos) => &data[pos + 1..],
        None => "",
    }
}

fn skip_ack_id(data: &str) -> &str {
    data.trim_start_matches(|c: char| c.is_ascii_digit())
}
