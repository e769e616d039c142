//! Peer transport: the seam between the mesh and the actual peer connection
//!
//! The mesh only ever talks to a [`PeerTransport`]; everything WebRTC-specific
//! lives in [`rtc`]. Transports report asynchronous happenings (candidates,
//! channel open/close, inbound messages) through [`TransportEvents`].

mod rtc;

#[cfg(test)]
pub(crate) mod fake;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::signaling::{IceCandidate, PeerId, SdpKind, SessionDescription};

pub use rtc::{RtcTransport, RtcTransportFactory};

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("unexpected {0:?} description")]
    UnexpectedDescription(SdpKind),

    #[error("transport closed")]
    Closed,
}

/// Which side started the negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Creates the data channel and sends the offer
    Initiator,
    /// Answers an offer and waits for the remote-opened channel
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Responder => f.write_str("responder"),
        }
    }
}

/// Something that happened on a transport outside of a mesh-initiated call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    LocalCandidate(IceCandidate),
    ChannelOpen,
    Message(String),
    ChannelClosed,
    Failed(String),
}

/// Callback handed to a transport at creation; already bound to one peer
/// connection, so the transport never needs to know who it is talking to.
#[derive(Clone)]
pub struct TransportEvents {
    sink: Arc<dyn Fn(TransportEvent) -> bool + Send + Sync>,
}

impl TransportEvents {
    pub(crate) fn new(sink: impl Fn(TransportEvent) -> bool + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Report an event; returns false once nobody is listening anymore
    pub fn emit(&self, event: TransportEvent) -> bool {
        (self.sink)(event)
    }
}

/// One direct connection to one remote peer
pub trait PeerTransport: Send + Sync + 'static {
    /// Produce an offer and install it as the local description
    fn create_offer(
        &self,
    ) -> impl Future<Output = Result<SessionDescription, TransportError>> + Send;

    /// Apply a remote offer and produce (and install) the answer
    fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> impl Future<Output = Result<SessionDescription, TransportError>> + Send;

    fn apply_answer(
        &self,
        answer: SessionDescription,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn add_remote_candidate(
        &self,
        candidate: IceCandidate,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Queue a text message on the data channel
    fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Close synchronously from the caller's point of view: no event is
    /// emitted after this returns, even if teardown finishes later.
    fn close(&self);
}

/// Creates transports for new peer connections
pub trait TransportFactory: Send + Sync + 'static {
    type Transport: PeerTransport;

    fn connect(
        &self,
        peer: PeerId,
        role: Role,
        events: TransportEvents,
    ) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;
}
