//! Offer/answer/candidate exchange, one state machine per remote peer

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::actor::{Completion, Mesh, Step};
use crate::signaling::{
    CandidateMessage, IceCandidate, PeerId, SdpKind, SdpMessage, SessionDescription, Signal,
};
use crate::transport::{PeerTransport, Role, TransportFactory};

/// Negotiation progress for one peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    New,
    /// Initiator: transport and offer are being produced
    CreatingOffer,
    /// Initiator: offer sent, waiting for the answer
    AwaitingAnswer,
    /// Initiator: answer received, being applied
    ApplyingAnswer,
    /// Responder: offer received, answer being produced
    Answering,
    /// Descriptions exchanged, waiting for the data channel
    ConnectedPendingChannel,
    Open,
    /// Negotiation rejected by the transport; stays put until re-announced
    Failed,
    /// Data channel lost; entry kept until the peer departs
    Closed,
}

impl NegotiationState {
    /// Still expected to make progress or carry traffic
    pub fn is_live(&self) -> bool {
        !matches!(self, NegotiationState::Failed | NegotiationState::Closed)
    }

    /// Our own offer is outstanding
    pub fn is_offering(&self) -> bool {
        matches!(
            self,
            NegotiationState::CreatingOffer | NegotiationState::AwaitingAnswer
        )
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationState::New => "new",
            NegotiationState::CreatingOffer => "creating offer",
            NegotiationState::AwaitingAnswer => "awaiting answer",
            NegotiationState::ApplyingAnswer => "applying answer",
            NegotiationState::Answering => "answering",
            NegotiationState::ConnectedPendingChannel => "pending channel",
            NegotiationState::Open => "open",
            NegotiationState::Failed => "failed",
            NegotiationState::Closed => "closed",
        };
        f.write_str(name)
    }
}

impl<F: TransportFactory> Mesh<F> {
    pub(super) fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::NewPeer { peer_id } => self.on_new_peer(peer_id),
            Signal::LostPeer { peer_id } => {
                if self.registry.is_self(&peer_id) {
                    debug!("Ignoring lost_peer for ourselves");
                    return;
                }
                self.remove_peer(peer_id);
            }
            addressed => {
                let Some(local) = self.registry.local_id() else {
                    warn!(
                        "Dropping {} received before local identity is known",
                        addressed.event_name()
                    );
                    return;
                };
                let Some((from, to)) = addressed.route() else {
                    return;
                };
                if from == local {
                    debug!("Ignoring self-originated {}", addressed.event_name());
                    return;
                }
                if to != local {
                    debug!("Ignoring {} addressed to {}", addressed.event_name(), to);
                    return;
                }

                match addressed {
                    Signal::Offer(m) => self.on_offer(local, m.from, m.sdp),
                    Signal::Answer(m) => self.on_answer(m.from, m.sdp),
                    Signal::IceCandidate(m) => self.on_remote_candidate(m.from, m.candidate),
                    Signal::NewPeer { .. } | Signal::LostPeer { .. } => {}
                }
            }
        }
    }

    fn on_new_peer(&mut self, peer: PeerId) {
        if self.registry.local_id().is_none() {
            if self.config.infer_local_identity {
                info!("Adopting first announced peer {} as local identity", peer);
                self.registry.register_self(peer);
            } else {
                warn!("Ignoring new_peer {} before local identity is known", peer);
            }
            return;
        }
        if self.registry.is_self(&peer) {
            return;
        }

        info!("New peer {}", peer);
        self.start_offer(peer);
    }

    /// Initiator path: transport with one local data channel, then an offer
    fn start_offer(&mut self, peer: PeerId) {
        self.aggregator.on_peer_lost(&peer);
        let conn = self.registry.replace_peer(peer, Role::Initiator);
        conn.state = NegotiationState::CreatingOffer;
        let generation = conn.generation;

        let factory = self.factory.clone();
        let events = self.transport_events(peer, generation);
        self.spawn_step(peer, generation, async move {
            let transport = Arc::new(factory.connect(peer, Role::Initiator, events).await?);
            match transport.create_offer().await {
                Ok(offer) => Ok(Step::OfferReady { transport, offer }),
                Err(e) => {
                    transport.close();
                    Err(e)
                }
            }
        });
    }

    /// Responder path: apply the offer and produce an answer
    fn on_offer(&mut self, local: PeerId, from: PeerId, offer: SessionDescription) {
        if offer.kind != SdpKind::Offer {
            warn!("Dropping offer from {} carrying an {:?} description", from, offer.kind);
            return;
        }

        if let Some(existing) = self.registry.get(&from) {
            if existing.state.is_offering() {
                // Both sides offered: the lower id keeps its offer.
                if local < from {
                    info!("Offer collision with {}: keeping our offer", from);
                    return;
                }
                info!("Offer collision with {}: answering theirs", from);
            } else {
                info!("Renegotiating with {} (was {})", from, existing.state);
            }
        }

        self.aggregator.on_peer_lost(&from);
        let conn = self.registry.replace_peer(from, Role::Responder);
        conn.state = NegotiationState::Answering;
        let generation = conn.generation;

        let factory = self.factory.clone();
        let events = self.transport_events(from, generation);
        self.spawn_step(from, generation, async move {
            let transport = Arc::new(factory.connect(from, Role::Responder, events).await?);
            match transport.accept_offer(offer).await {
                Ok(answer) => Ok(Step::AnswerReady { transport, answer }),
                Err(e) => {
                    transport.close();
                    Err(e)
                }
            }
        });
    }

    fn on_answer(&mut self, from: PeerId, answer: SessionDescription) {
        if answer.kind != SdpKind::Answer {
            warn!("Dropping answer from {} carrying an {:?} description", from, answer.kind);
            return;
        }
        let Some(conn) = self.registry.get_mut(&from) else {
            warn!("Dropping answer from unknown peer {}", from);
            return;
        };
        if conn.state != NegotiationState::AwaitingAnswer {
            warn!("Dropping unexpected answer from {} while {}", from, conn.state);
            return;
        }
        let Some(transport) = conn.transport.clone() else {
            warn!("Dropping answer from {}: no transport", from);
            return;
        };

        conn.state = NegotiationState::ApplyingAnswer;
        let generation = conn.generation;
        self.spawn_step(from, generation, async move {
            transport.apply_answer(answer).await?;
            Ok(Step::AnswerApplied)
        });
    }

    fn on_remote_candidate(&mut self, from: PeerId, candidate: IceCandidate) {
        let Some(conn) = self.registry.get_mut(&from) else {
            debug!("Dropping candidate from unknown peer {}", from);
            return;
        };
        if !conn.state.is_live() {
            debug!("Dropping candidate from {} while {}", from, conn.state);
            return;
        }

        match (&conn.transport, conn.remote_description_applied) {
            (Some(transport), true) => {
                let transport = transport.clone();
                let generation = conn.generation;
                self.apply_candidates(from, generation, transport, vec![candidate]);
            }
            _ => conn.pending_remote_candidates.push(candidate),
        }
    }

    pub(super) fn handle_completion(&mut self, done: Completion<F::Transport>) {
        let Completion {
            peer,
            generation,
            step,
        } = done;

        let Some(local) = self.registry.local_id() else {
            return;
        };
        let Some(conn) = self.registry.get_live(&peer, generation) else {
            debug!("Discarding stale completion for {}", peer);
            if let Ok(Step::OfferReady { transport, .. } | Step::AnswerReady { transport, .. }) =
                step
            {
                transport.close();
            }
            return;
        };

        match step {
            Ok(Step::OfferReady { transport, offer }) => {
                conn.transport = Some(transport);
                conn.state = NegotiationState::AwaitingAnswer;
                conn.description_sent = true;
                let held = std::mem::take(&mut conn.pending_local_candidates);

                debug!("Sending offer to {}", peer);
                self.send(Signal::Offer(SdpMessage {
                    from: local,
                    to: peer,
                    sdp: offer,
                }));
                self.send_candidates(local, peer, held);
            }

            Ok(Step::AnswerReady { transport, answer }) => {
                conn.transport = Some(transport.clone());
                if conn.state == NegotiationState::Answering {
                    conn.state = NegotiationState::ConnectedPendingChannel;
                }
                conn.description_sent = true;
                conn.remote_description_applied = true;
                let held_local = std::mem::take(&mut conn.pending_local_candidates);
                let held_remote = std::mem::take(&mut conn.pending_remote_candidates);

                debug!("Sending answer to {}", peer);
                self.send(Signal::Answer(SdpMessage {
                    from: local,
                    to: peer,
                    sdp: answer,
                }));
                self.send_candidates(local, peer, held_local);
                self.apply_candidates(peer, generation, transport, held_remote);
            }

            Ok(Step::AnswerApplied) => {
                if conn.state == NegotiationState::ApplyingAnswer {
                    conn.state = NegotiationState::ConnectedPendingChannel;
                }
                conn.remote_description_applied = true;
                let held_remote = std::mem::take(&mut conn.pending_remote_candidates);
                if let Some(transport) = conn.transport.clone() {
                    self.apply_candidates(peer, generation, transport, held_remote);
                }
            }

            Ok(Step::CandidateApplied) => {}

            Err(e) => {
                warn!("Negotiation with {} failed: {}", peer, e);
                self.mark_failed(peer);
            }
        }
    }

    fn apply_candidates(
        &self,
        peer: PeerId,
        generation: u64,
        transport: Arc<F::Transport>,
        candidates: Vec<IceCandidate>,
    ) {
        for candidate in candidates {
            let transport = transport.clone();
            self.spawn_step(peer, generation, async move {
                transport.add_remote_candidate(candidate).await?;
                Ok(Step::CandidateApplied)
            });
        }
    }

    /// Forward a locally discovered candidate, or hold it until our
    /// description has gone out so it can never overtake the offer.
    pub(super) fn on_local_candidate(&mut self, peer: PeerId, candidate: IceCandidate) {
        let Some(local) = self.registry.local_id() else {
            return;
        };
        let Some(conn) = self.registry.get_mut(&peer) else {
            return;
        };
        if conn.description_sent {
            self.send_candidates(local, peer, vec![candidate]);
        } else {
            conn.pending_local_candidates.push(candidate);
        }
    }

    fn send_candidates(&self, local: PeerId, peer: PeerId, candidates: Vec<IceCandidate>) {
        for candidate in candidates {
            self.send(Signal::IceCandidate(CandidateMessage {
                from: local,
                to: peer,
                candidate,
            }));
        }
    }

    /// Negotiation or connection failure: stop sampling, keep the entry
    pub(super) fn mark_failed(&mut self, peer: PeerId) {
        if let Some(conn) = self.registry.get_mut(&peer) {
            conn.state = NegotiationState::Failed;
            conn.close();
        }
        self.aggregator.on_peer_lost(&peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offering_states() {
        assert!(NegotiationState::CreatingOffer.is_offering());
        assert!(NegotiationState::AwaitingAnswer.is_offering());
        assert!(!NegotiationState::ApplyingAnswer.is_offering());
        assert!(!NegotiationState::Open.is_offering());
    }

    #[test]
    fn live_states() {
        assert!(NegotiationState::New.is_live());
        assert!(NegotiationState::Open.is_live());
        assert!(!NegotiationState::Failed.is_live());
        assert!(!NegotiationState::Closed.is_live());
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&NegotiationState::ConnectedPendingChannel).unwrap();
        assert_eq!(json, "\"connected_pending_channel\"");
    }
}
