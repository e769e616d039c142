//! WebSocket signaling: the room relay and the client that talks to it

mod actor;
mod client;
mod messages;
mod server;
mod types;

pub use actor::RoomManagerHandle;
pub use client::{DEFAULT_RELAY_URL, SignalingClient};
pub use messages::{
    CandidateMessage, ClientMessage, IceCandidate, SdpKind, SdpMessage, ServerMessage,
    SessionDescription, Signal,
};
pub use server::{DEFAULT_SIGNALING_PORT, SignalingServer};
pub use types::{OutboundMessage, PeerId, RoomCode, SignalingError};
