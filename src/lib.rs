//! Full-mesh peer-to-peer latency probing over WebRTC data channels.
//!
//! Peers meet in a room on a WebSocket relay ([`signaling`]), open a direct
//! connection to every other member ([`mesh`], [`transport`]) and sample
//! round-trip time with ping/pong over a data channel ([`latency`]).

pub mod config;
pub mod latency;
pub mod mesh;
pub mod signaling;
pub mod transport;
