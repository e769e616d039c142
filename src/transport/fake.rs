//! In-memory transport for driving the mesh in tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use super::{PeerTransport, Role, TransportError, TransportEvent, TransportEvents, TransportFactory};
use crate::signaling::{IceCandidate, PeerId, SessionDescription};

/// A mesh-initiated call on a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    CreateOffer,
    AcceptOffer(String),
    ApplyAnswer(String),
    AddCandidate(String),
}

struct Endpoint {
    role: Option<Role>,
    events: Option<TransportEvents>,
    calls: Vec<Call>,
    sent: Vec<String>,
    closed: bool,
}

#[derive(Default)]
struct State {
    /// Every transport ever created for a peer, oldest first
    endpoints: HashMap<PeerId, Vec<Endpoint>>,
    hold_offers: bool,
    reject_answers: bool,
}

/// Shared record of every fake transport, inspected by tests
#[derive(Clone, Default)]
pub(crate) struct FakeNetwork {
    state: Arc<Mutex<State>>,
    gate: Arc<Notify>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> FakeFactory {
        FakeFactory { net: self.clone() }
    }

    /// A transport not wired to any mesh
    pub fn transport_for(&self, peer: PeerId) -> FakeTransport {
        self.add_endpoint(peer, None, None)
    }

    fn add_endpoint(
        &self,
        peer: PeerId,
        role: Option<Role>,
        events: Option<TransportEvents>,
    ) -> FakeTransport {
        let mut state = self.state.lock().unwrap();
        let endpoints = state.endpoints.entry(peer).or_default();
        endpoints.push(Endpoint {
            role,
            events,
            calls: Vec::new(),
            sent: Vec::new(),
            closed: false,
        });
        FakeTransport {
            peer,
            index: endpoints.len() - 1,
            net: self.clone(),
        }
    }

    /// Make `create_offer` wait for [`FakeNetwork::release`]
    pub fn hold_offers(&self) {
        self.state.lock().unwrap().hold_offers = true;
    }

    pub fn release(&self) {
        self.state.lock().unwrap().hold_offers = false;
        self.gate.notify_one();
    }

    pub fn reject_answers(&self) {
        self.state.lock().unwrap().reject_answers = true;
    }

    /// Fire an event on the newest transport for `peer`
    pub fn emit(&self, peer: PeerId, event: TransportEvent) -> bool {
        let events = {
            let state = self.state.lock().unwrap();
            state
                .endpoints
                .get(&peer)
                .and_then(|eps| eps.last())
                .and_then(|ep| ep.events.clone())
        };
        events.is_some_and(|events| events.emit(event))
    }

    pub fn calls(&self, peer: PeerId) -> Vec<Call> {
        self.latest(peer, |ep| ep.calls.clone()).unwrap_or_default()
    }

    /// Data channel messages written to the newest transport for `peer`
    pub fn sent(&self, peer: PeerId) -> Vec<String> {
        self.latest(peer, |ep| ep.sent.clone()).unwrap_or_default()
    }

    pub fn role(&self, peer: PeerId) -> Option<Role> {
        self.latest(peer, |ep| ep.role).flatten()
    }

    pub fn is_closed(&self, peer: &PeerId) -> bool {
        self.latest(*peer, |ep| ep.closed).unwrap_or(false)
    }

    /// Whether every transport ever created for `peer` has been closed
    pub fn all_closed(&self, peer: &PeerId) -> bool {
        let state = self.state.lock().unwrap();
        state
            .endpoints
            .get(peer)
            .is_none_or(|eps| eps.iter().all(|ep| ep.closed))
    }

    pub fn endpoint_count(&self, peer: &PeerId) -> usize {
        let state = self.state.lock().unwrap();
        state.endpoints.get(peer).map_or(0, Vec::len)
    }

    fn latest<R>(&self, peer: PeerId, f: impl FnOnce(&Endpoint) -> R) -> Option<R> {
        let state = self.state.lock().unwrap();
        state.endpoints.get(&peer).and_then(|eps| eps.last()).map(f)
    }
}

pub(crate) struct FakeFactory {
    net: FakeNetwork,
}

impl TransportFactory for FakeFactory {
    type Transport = FakeTransport;

    async fn connect(
        &self,
        peer: PeerId,
        role: Role,
        events: TransportEvents,
    ) -> Result<FakeTransport, TransportError> {
        Ok(self.net.add_endpoint(peer, Some(role), Some(events)))
    }
}

pub(crate) struct FakeTransport {
    peer: PeerId,
    index: usize,
    net: FakeNetwork,
}

impl FakeTransport {
    fn with_endpoint<R>(&self, f: impl FnOnce(&mut Endpoint) -> R) -> R {
        let mut state = self.net.state.lock().unwrap();
        let endpoint = &mut state.endpoints.get_mut(&self.peer).unwrap()[self.index];
        f(endpoint)
    }

    fn record(&self, call: Call) -> Result<(), TransportError> {
        self.with_endpoint(|ep| {
            if ep.closed {
                return Err(TransportError::Closed);
            }
            ep.calls.push(call);
            Ok(())
        })
    }
}

impl PeerTransport for FakeTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.record(Call::CreateOffer)?;
        let held = self.net.state.lock().unwrap().hold_offers;
        if held {
            self.net.gate.notified().await;
        }
        Ok(SessionDescription::offer(format!("offer:{}", self.peer)))
    }

    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        self.record(Call::AcceptOffer(offer.sdp))?;
        Ok(SessionDescription::answer(format!("answer:{}", self.peer)))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), TransportError> {
        self.record(Call::ApplyAnswer(answer.sdp))?;
        let rejected = self.net.state.lock().unwrap().reject_answers;
        if rejected {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.record(Call::AddCandidate(candidate.candidate))
    }

    fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.with_endpoint(|ep| {
            if ep.closed {
                return Err(TransportError::Closed);
            }
            ep.sent.push(text.to_string());
            Ok(())
        })
    }

    fn close(&self) {
        self.with_endpoint(|ep| {
            ep.closed = true;
            ep.events = None;
        });
    }
}
