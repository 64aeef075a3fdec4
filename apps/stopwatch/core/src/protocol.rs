//! JSON frames exchanged between sync clients and the timekeeper.
//!
//! Every frame is an object tagged by a `type` field. Decoding separates
//! three outcomes: a known message, a well-formed frame of a kind this build
//! does not recognise (ignored for forward compatibility), and a malformed
//! frame.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Intent sent by a viewer to the timekeeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Start,
    Stop,
    Reset,
    Ping,
}

impl ClientCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientCommand::Start => "start",
            ClientCommand::Stop => "stop",
            ClientCommand::Reset => "reset",
            ClientCommand::Ping => "ping",
        }
    }

    pub fn decode(frame: &str) -> Result<Decoded<Self>, ProtocolError> {
        decode(frame)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        encode(self)
    }
}

/// Authoritative state transition (or heartbeat reply) issued by the timekeeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Run began or resumed. `start_time` is accumulated-adjusted, so
    /// `now - start_time` is the total elapsed time.
    #[serde(rename_all = "camelCase")]
    Start { start_time: i64, accumulated: i64 },
    /// Run paused; `stop_time` is the total elapsed time at the pause.
    #[serde(rename_all = "camelCase")]
    Stop { stop_time: i64 },
    Reset,
    Pong,
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Start { .. } => "start",
            ServerEvent::Stop { .. } => "stop",
            ServerEvent::Reset => "reset",
            ServerEvent::Pong => "pong",
        }
    }

    pub fn decode(frame: &str) -> Result<Decoded<Self>, ProtocolError> {
        decode(frame)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        encode(self)
    }
}

/// Result of decoding a frame that was at least structurally valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<T> {
    Message(T),
    /// Well-formed frame whose `type` is not one this build understands.
    Unknown(String),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid json: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("invalid `{kind}` payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

trait WireMessage: Serialize + DeserializeOwned {
    const KINDS: &'static [&'static str];
}

impl WireMessage for ClientCommand {
    const KINDS: &'static [&'static str] = &["start", "stop", "reset", "ping"];
}

impl WireMessage for ServerEvent {
    const KINDS: &'static [&'static str] = &["start", "stop", "reset", "pong"];
}

fn decode<T: WireMessage>(frame: &str) -> Result<Decoded<T>, ProtocolError> {
    let value: Value = serde_json::from_str(frame).map_err(ProtocolError::InvalidJson)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_owned();
    if !T::KINDS.contains(&kind.as_str()) {
        return Ok(Decoded::Unknown(kind));
    }
    serde_json::from_value(value)
        .map(Decoded::Message)
        .map_err(|source| ProtocolError::InvalidPayload { kind, source })
}

fn encode<T: WireMessage>(message: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(ProtocolError::Encode)
}
