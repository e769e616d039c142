use serde::{Deserialize, Serialize};

use super::types::{PeerId, RoomCode};

/// Which side of the exchange a session description belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Session description as carried in `offer`/`answer` events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Connectivity candidate, in the browser's `RTCIceCandidateInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Addressed description (`offer` / `answer`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpMessage {
    pub from: PeerId,
    pub to: PeerId,
    pub sdp: SessionDescription,
}

/// Addressed candidate (`ice_candidate`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateMessage {
    pub from: PeerId,
    pub to: PeerId,
    pub candidate: IceCandidate,
}

/// Room-scoped signaling events consumed and produced by the mesh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Signal {
    /// A member arrived (relay → all)
    #[serde(rename = "new_peer")]
    NewPeer {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },

    /// A member left (relay → all)
    #[serde(rename = "lost_peer")]
    LostPeer {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },

    #[serde(rename = "offer")]
    Offer(SdpMessage),

    #[serde(rename = "answer")]
    Answer(SdpMessage),

    #[serde(rename = "ice_candidate")]
    IceCandidate(CandidateMessage),
}

impl Signal {
    /// Sender and recipient of an addressed event; `None` for presence notices
    pub fn route(&self) -> Option<(PeerId, PeerId)> {
        match self {
            Signal::Offer(m) | Signal::Answer(m) => Some((m.from, m.to)),
            Signal::IceCandidate(m) => Some((m.from, m.to)),
            Signal::NewPeer { .. } | Signal::LostPeer { .. } => None,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Signal::NewPeer { .. } => "new_peer",
            Signal::LostPeer { .. } => "lost_peer",
            Signal::Offer(_) => "offer",
            Signal::Answer(_) => "answer",
            Signal::IceCandidate(_) => "ice_candidate",
        }
    }
}

/// Frames sent from client to relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ClientMessage {
    /// Join a room by name
    #[serde(rename = "join")]
    Join { room: RoomCode },

    /// Leave the current room
    #[serde(rename = "leave")]
    Leave,

    #[serde(rename = "offer")]
    Offer(SdpMessage),

    #[serde(rename = "answer")]
    Answer(SdpMessage),

    #[serde(rename = "ice_candidate")]
    IceCandidate(CandidateMessage),
}

impl ClientMessage {
    /// Wrap an outbound mesh event; presence notices are relay-only
    pub fn from_signal(signal: Signal) -> Option<Self> {
        match signal {
            Signal::Offer(m) => Some(ClientMessage::Offer(m)),
            Signal::Answer(m) => Some(ClientMessage::Answer(m)),
            Signal::IceCandidate(m) => Some(ClientMessage::IceCandidate(m)),
            Signal::NewPeer { .. } | Signal::LostPeer { .. } => None,
        }
    }

    /// Addressed payload of this frame, if it is one to be routed
    pub fn into_signal(self) -> Option<Signal> {
        match self {
            ClientMessage::Offer(m) => Some(Signal::Offer(m)),
            ClientMessage::Answer(m) => Some(Signal::Answer(m)),
            ClientMessage::IceCandidate(m) => Some(Signal::IceCandidate(m)),
            ClientMessage::Join { .. } | ClientMessage::Leave => None,
        }
    }
}

/// Frames sent from relay to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerMessage {
    /// Joined successfully; carries the id the relay assigned to this client
    #[serde(rename = "joined")]
    Joined {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
        room: RoomCode,
    },

    #[serde(rename = "new_peer")]
    NewPeer {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },

    #[serde(rename = "lost_peer")]
    LostPeer {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },

    #[serde(rename = "offer")]
    Offer(SdpMessage),

    #[serde(rename = "answer")]
    Answer(SdpMessage),

    #[serde(rename = "ice_candidate")]
    IceCandidate(CandidateMessage),

    /// Error response
    #[serde(rename = "error")]
    Error { message: String },
}

impl From<Signal> for ServerMessage {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::NewPeer { peer_id } => ServerMessage::NewPeer { peer_id },
            Signal::LostPeer { peer_id } => ServerMessage::LostPeer { peer_id },
            Signal::Offer(m) => ServerMessage::Offer(m),
            Signal::Answer(m) => ServerMessage::Answer(m),
            Signal::IceCandidate(m) => ServerMessage::IceCandidate(m),
        }
    }
}

impl ServerMessage {
    /// Room event to hand to the mesh; `None` for session frames
    pub fn into_signal(self) -> Option<Signal> {
        match self {
            ServerMessage::NewPeer { peer_id } => Some(Signal::NewPeer { peer_id }),
            ServerMessage::LostPeer { peer_id } => Some(Signal::LostPeer { peer_id }),
            ServerMessage::Offer(m) => Some(Signal::Offer(m)),
            ServerMessage::Answer(m) => Some(Signal::Answer(m)),
            ServerMessage::IceCandidate(m) => Some(Signal::IceCandidate(m)),
            ServerMessage::Joined { .. } | ServerMessage::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PeerId {
        s.parse().unwrap()
    }

    #[test]
    fn parse_new_peer() {
        let json = r#"{"event": "new_peer", "peerId": "peer_abc12345"}"#;
        let msg: Signal = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            Signal::NewPeer {
                peer_id: id("peer_abc12345")
            }
        );
    }

    #[test]
    fn parse_browser_offer() {
        let json = r#"{
            "event": "offer",
            "from": "a",
            "to": "b",
            "sdp": {"type": "offer", "sdp": "v=0\r\n"}
        }"#;
        let msg: Signal = serde_json::from_str(json).unwrap();
        let Signal::Offer(offer) = msg else {
            panic!("Expected Offer");
        };
        assert_eq!(offer.from, id("a"));
        assert_eq!(offer.to, id("b"));
        assert_eq!(offer.sdp.kind, SdpKind::Offer);
        assert_eq!(offer.sdp.sdp, "v=0\r\n");
    }

    #[test]
    fn parse_browser_candidate() {
        let json = r#"{
            "event": "ice_candidate",
            "from": "a",
            "to": "b",
            "candidate": {
                "candidate": "candidate:1 1 udp 2130706431 10.0.0.2 5000 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0,
                "usernameFragment": "abcd"
            }
        }"#;
        let msg: Signal = serde_json::from_str(json).unwrap();
        let Signal::IceCandidate(m) = msg else {
            panic!("Expected IceCandidate");
        };
        assert_eq!(m.candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(m.candidate.sdp_mline_index, Some(0));
        assert_eq!(m.candidate.username_fragment.as_deref(), Some("abcd"));
    }

    #[test]
    fn candidate_omits_missing_fields() {
        let candidate = IceCandidate {
            candidate: "candidate:1".to_string(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        };
        let json = serde_json::to_string(&candidate).unwrap();
        assert_eq!(json, r#"{"candidate":"candidate:1"}"#);
    }

    #[test]
    fn malformed_signal_is_rejected() {
        assert!(serde_json::from_str::<Signal>(r#"{"event": "offer", "from": "a"}"#).is_err());
        assert!(serde_json::from_str::<Signal>(r#"{"event": "bogus"}"#).is_err());
        assert!(serde_json::from_str::<Signal>(r#"{"event": "new_peer", "peerId": ""}"#).is_err());
    }

    #[test]
    fn route_of_presence_is_none() {
        let msg = Signal::LostPeer { peer_id: id("x") };
        assert_eq!(msg.route(), None);
        assert_eq!(msg.event_name(), "lost_peer");
    }

    #[test]
    fn parse_join() {
        let json = r#"{"event": "join", "room": "lobby"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        let ClientMessage::Join { room } = msg else {
            panic!("Expected Join");
        };
        assert_eq!(room.as_str(), "lobby");
    }

    #[test]
    fn parse_leave() {
        let msg: ClientMessage = serde_json::from_str(r#"{"event": "leave"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Leave));
    }

    #[test]
    fn client_presence_is_not_forwardable() {
        let presence = Signal::NewPeer { peer_id: id("x") };
        assert!(ClientMessage::from_signal(presence).is_none());
    }

    #[test]
    fn serialize_joined() {
        let msg = ServerMessage::Joined {
            peer_id: id("peer_abc12345"),
            room: RoomCode::parse("lobby").unwrap(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"event":"joined","peerId":"peer_abc12345","room":"lobby"}"#
        );
    }

    #[test]
    fn serialize_answer_relayed() {
        let msg = ServerMessage::from(Signal::Answer(SdpMessage {
            from: id("b"),
            to: id("a"),
            sdp: SessionDescription::answer("v=0"),
        }));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""event":"answer""#));
        assert!(json.contains(r#""type":"answer""#));
        assert!(json.contains(r#""from":"b""#));
    }

    #[test]
    fn server_frames_convert_to_signals() {
        let lost = ServerMessage::LostPeer { peer_id: id("x") };
        assert_eq!(lost.into_signal(), Some(Signal::LostPeer { peer_id: id("x") }));

        let err = ServerMessage::Error {
            message: "nope".to_string(),
        };
        assert!(err.into_signal().is_none());
    }
}
