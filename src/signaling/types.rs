use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Utf8Bytes};

/// Signaling errors, shared by the relay and the client side
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("invalid peer id: {0:?}")]
    InvalidPeerId(String),

    #[error("invalid room name: {0:?}")]
    InvalidRoom(String),

    #[error("already joined room {0}")]
    AlreadyJoined(RoomCode),

    #[error("not in a room")]
    NotJoined,

    #[error("sender {claimed} does not match assigned id {actual}")]
    SpoofedSender { claimed: PeerId, actual: PeerId },

    #[error("peer {0} is not in this room")]
    UnknownPeer(PeerId),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

const ROOM_CODE_LEN: usize = 32;
const PEER_ID_LEN: usize = 64;
const GENERATED_PEER_ID_LEN: usize = 13;
const HEX_CHARS: &[u8] = b"0123456789abcdef";

/// Room name: up to 32 bytes of `[A-Za-z0-9_-]`, stored inline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomCode {
    bytes: [u8; ROOM_CODE_LEN],
    len: u8,
}

impl RoomCode {
    pub fn parse(s: &str) -> Result<Self, SignalingError> {
        let src = s.as_bytes();
        let valid = !src.is_empty()
            && src.len() <= ROOM_CODE_LEN
            && src
                .iter()
                .all(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-');
        if !valid {
            return Err(SignalingError::InvalidRoom(s.to_string()));
        }

        let mut bytes = [0u8; ROOM_CODE_LEN];
        bytes[..src.len()].copy_from_slice(src);
        Ok(Self {
            bytes,
            len: src.len() as u8,
        })
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomCode {
    type Err = SignalingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RoomCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RoomCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        RoomCode::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Peer ID: opaque relay-assigned id, up to 64 bytes, stored inline so it stays `Copy`.
///
/// Ids minted by this relay look like `peer_` + 8 hex digits; ids from other
/// relays are accepted as long as they are non-empty printable text that fits.
#[derive(Debug, Clone, Copy)]
pub struct PeerId {
    bytes: [u8; PEER_ID_LEN],
    len: u8,
}

impl PeerId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; PEER_ID_LEN];
        bytes[..5].copy_from_slice(b"peer_");

        let mut rng = rand::rng();
        let value: u32 = rng.random();

        for i in 0..8 {
            let nibble = ((value >> (28 - i * 4)) & 0xF) as usize;
            bytes[5 + i] = HEX_CHARS[nibble];
        }
        Self {
            bytes,
            len: GENERATED_PEER_ID_LEN as u8,
        }
    }

    pub fn parse(s: &str) -> Result<Self, SignalingError> {
        let src = s.as_bytes();
        if src.is_empty() || src.len() > PEER_ID_LEN || s.chars().any(char::is_control) {
            return Err(SignalingError::InvalidPeerId(s.to_string()));
        }

        let mut bytes = [0u8; PEER_ID_LEN];
        bytes[..src.len()].copy_from_slice(src);
        Ok(Self {
            bytes,
            len: src.len() as u8,
        })
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl PartialEq for PeerId {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for PeerId {}

impl Hash for PeerId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl Ord for PeerId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl PartialOrd for PeerId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeerId {
    type Err = SignalingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PeerId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Wrapper for outbound WebSocket messages using tungstenite's Utf8Bytes.
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    /// Serialize a message once so it can be fanned out to many peers
    pub fn json<T: Serialize>(msg: &T) -> Result<Self, SignalingError> {
        Ok(Self::from(serde_json::to_string(msg)?))
    }

    /// Get the inner Utf8Bytes for tungstenite Message::Text
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}

#[derive(Debug)]
pub(crate) struct PeerState {
    /// Channel for outbound messages to this peer.
    /// Uses OutboundMessage (shared bytes) for O(1) broadcast cloning.
    pub tx: mpsc::UnboundedSender<OutboundMessage>,
}

#[derive(Debug, Default)]
pub(crate) struct Room {
    pub peers: HashMap<PeerId, PeerState>,
}

impl Room {
    /// Send one message to every member, optionally skipping one
    pub fn broadcast(&self, msg: &OutboundMessage, except: Option<&PeerId>) {
        for (id, peer) in &self.peers {
            if Some(id) != except {
                let _ = peer.tx.send(msg.clone());
            }
        }
    }
}
