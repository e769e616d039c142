use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::negotiator::NegotiationState;
use super::registry::PeerRegistry;
use crate::config::MeshConfig;
use crate::latency::{LatencyAggregator, LatencyProber, LatencySink, LatencySnapshot, ProbeMessage};
use crate::signaling::{PeerId, SessionDescription, Signal};
use crate::transport::{
    PeerTransport, Role, TransportError, TransportEvent, TransportEvents, TransportFactory,
};

/// Mesh errors
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("mesh actor stopped")]
    Stopped,
}

/// Commands sent to the mesh actor
pub(crate) enum MeshCommand {
    RegisterSelf(PeerId),
    Signal(Signal),
    Transport {
        peer: PeerId,
        generation: u64,
        event: TransportEvent,
    },
    PingDue {
        peer: PeerId,
        generation: u64,
    },
    Peers {
        reply: oneshot::Sender<Vec<PeerStatus>>,
    },
    Snapshot {
        reply: oneshot::Sender<LatencySnapshot>,
    },
    Shutdown,
}

/// Result of an asynchronous negotiation step
pub(super) enum Step<T> {
    OfferReady {
        transport: Arc<T>,
        offer: SessionDescription,
    },
    AnswerReady {
        transport: Arc<T>,
        answer: SessionDescription,
    },
    AnswerApplied,
    CandidateApplied,
}

pub(super) struct Completion<T> {
    pub peer: PeerId,
    pub generation: u64,
    pub step: Result<Step<T>, TransportError>,
}

/// Point-in-time view of one peer connection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerStatus {
    pub peer: PeerId,
    pub role: Role,
    pub state: NegotiationState,
    /// Latest round trip in milliseconds, once sampled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt: Option<f64>,
    /// Change between the last two round trips
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter: Option<f64>,
}

/// State owned by the mesh actor task; nothing else touches it
pub(crate) struct Mesh<F: TransportFactory> {
    pub(super) registry: PeerRegistry<F::Transport>,
    pub(super) aggregator: LatencyAggregator,
    pub(super) factory: Arc<F>,
    pub(super) config: MeshConfig,
    outbound: mpsc::UnboundedSender<Signal>,
    /// Weak so that timers and transports never keep the actor alive
    commands: mpsc::WeakUnboundedSender<MeshCommand>,
    done: mpsc::UnboundedSender<Completion<F::Transport>>,
}

async fn mesh_actor<F: TransportFactory>(
    mut mesh: Mesh<F>,
    mut rx: mpsc::UnboundedReceiver<MeshCommand>,
    mut done_rx: mpsc::UnboundedReceiver<Completion<F::Transport>>,
) {
    loop {
        tokio::select! {
            biased;

            Some(done) = done_rx.recv() => mesh.handle_completion(done),

            cmd = rx.recv() => match cmd {
                Some(MeshCommand::Shutdown) | None => break,
                Some(cmd) => mesh.handle_command(cmd),
            },
        }
    }

    mesh.registry.clear();
    info!("Mesh stopped");
}

impl<F: TransportFactory> Mesh<F> {
    fn handle_command(&mut self, cmd: MeshCommand) {
        match cmd {
            MeshCommand::RegisterSelf(id) => {
                self.registry.register_self(id);
            }
            MeshCommand::Signal(signal) => self.handle_signal(signal),
            MeshCommand::Transport {
                peer,
                generation,
                event,
            } => self.handle_transport_event(peer, generation, event),
            MeshCommand::PingDue { peer, generation } => self.on_ping_due(peer, generation),
            MeshCommand::Peers { reply } => {
                let _ = reply.send(self.statuses());
            }
            MeshCommand::Snapshot { reply } => {
                let _ = reply.send(self.aggregator.snapshot());
            }
            MeshCommand::Shutdown => {}
        }
    }

    pub(super) fn send(&self, signal: Signal) {
        let _ = self.outbound.send(signal);
    }

    /// Event callback bound to one incarnation of one peer connection
    pub(super) fn transport_events(&self, peer: PeerId, generation: u64) -> TransportEvents {
        let commands = self.commands.clone();
        TransportEvents::new(move |event| match commands.upgrade() {
            Some(tx) => tx
                .send(MeshCommand::Transport {
                    peer,
                    generation,
                    event,
                })
                .is_ok(),
            None => false,
        })
    }

    /// Run a suspended negotiation step off the actor and report back
    pub(super) fn spawn_step<Fut>(&self, peer: PeerId, generation: u64, step: Fut)
    where
        Fut: Future<Output = Result<Step<F::Transport>, TransportError>> + Send + 'static,
    {
        let done = self.done.clone();
        tokio::spawn(async move {
            let step = step.await;
            let _ = done.send(Completion {
                peer,
                generation,
                step,
            });
        });
    }

    pub(super) fn remove_peer(&mut self, peer: PeerId) {
        if self.registry.remove_peer(&peer) {
            info!("Lost peer {}", peer);
        }
        self.aggregator.on_peer_lost(&peer);
    }

    fn handle_transport_event(&mut self, peer: PeerId, generation: u64, event: TransportEvent) {
        if self.registry.get_live(&peer, generation).is_none() {
            debug!("Dropping late transport event for {}: {:?}", peer, event);
            return;
        }

        match event {
            TransportEvent::LocalCandidate(candidate) => self.on_local_candidate(peer, candidate),
            TransportEvent::ChannelOpen => self.on_channel_open(peer),
            TransportEvent::Message(text) => self.on_channel_message(peer, &text),
            TransportEvent::ChannelClosed => self.on_channel_closed(peer),
            TransportEvent::Failed(reason) => {
                warn!("Connection to {} failed: {}", peer, reason);
                self.mark_failed(peer);
            }
        }
    }

    fn on_channel_open(&mut self, peer: PeerId) {
        let Some(conn) = self.registry.get_mut(&peer) else {
            return;
        };
        if !conn.state.is_live() || conn.state == NegotiationState::Open {
            debug!("Ignoring channel open for {} while {}", peer, conn.state);
            return;
        }
        let Some(transport) = conn.transport.clone() else {
            warn!("Channel to {} opened before its transport was ready", peer);
            return;
        };

        conn.state = NegotiationState::Open;
        info!("Data channel to {} open ({})", peer, conn.role);

        let mut prober = LatencyProber::new();
        if send_probe(transport.as_ref(), peer, ProbeMessage::Ping) {
            prober.ping_sent(Instant::now());
        }
        conn.prober = Some(prober);
    }

    fn on_channel_message(&mut self, peer: PeerId, text: &str) {
        match ProbeMessage::parse(text) {
            Some(ProbeMessage::Ping) => {
                let transport = self
                    .registry
                    .get(&peer)
                    .and_then(|conn| conn.transport.clone());
                if let Some(transport) = transport {
                    send_probe(transport.as_ref(), peer, ProbeMessage::Pong);
                }
            }
            Some(ProbeMessage::Pong) => self.on_pong(peer),
            None => debug!("Ignoring unexpected message from {}: {:?}", peer, text),
        }
    }

    fn on_pong(&mut self, peer: PeerId) {
        let received = Instant::now();
        let Some(conn) = self.registry.get_mut(&peer) else {
            return;
        };
        let generation = conn.generation;
        let Some(prober) = conn.prober.as_mut() else {
            debug!("Ignoring pong from {}: channel not sampling", peer);
            return;
        };
        let Some(sample) = prober.pong_received(received) else {
            debug!("Ignoring pong from {} with no ping in flight", peer);
            return;
        };

        let interval = self.config.ping_interval;
        let commands = self.commands.clone();
        prober.schedule(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(MeshCommand::PingDue { peer, generation });
            }
        }));

        self.aggregator.on_sample_updated(peer, sample);
    }

    fn on_ping_due(&mut self, peer: PeerId, generation: u64) {
        let Some(conn) = self.registry.get_live(&peer, generation) else {
            return;
        };
        let Some(prober) = conn.prober.as_mut() else {
            return;
        };
        prober.timer_fired();
        if conn.state != NegotiationState::Open {
            return;
        }
        let Some(transport) = conn.transport.as_ref() else {
            return;
        };
        if send_probe(transport.as_ref(), peer, ProbeMessage::Ping) {
            prober.ping_sent(Instant::now());
        }
    }

    fn on_channel_closed(&mut self, peer: PeerId) {
        let Some(conn) = self.registry.get_mut(&peer) else {
            return;
        };
        if !conn.state.is_live() {
            return;
        }
        info!("Data channel to {} closed", peer);
        conn.state = NegotiationState::Closed;
        conn.prober = None;
        self.aggregator.on_peer_lost(&peer);
    }

    fn statuses(&self) -> Vec<PeerStatus> {
        let mut statuses: Vec<PeerStatus> = self
            .registry
            .iter()
            .map(|(peer, conn)| PeerStatus {
                peer: *peer,
                role: conn.role,
                state: conn.state,
                rtt: conn
                    .prober
                    .as_ref()
                    .and_then(|prober| prober.current())
                    .map(|sample| sample.rtt),
                jitter: conn.prober.as_ref().and_then(|prober| prober.jitter()),
            })
            .collect();
        statuses.sort_by(|a, b| a.peer.cmp(&b.peer));
        statuses
    }
}

fn send_probe<T: PeerTransport>(transport: &T, peer: PeerId, msg: ProbeMessage) -> bool {
    match transport.send_text(msg.as_str()) {
        Ok(()) => true,
        Err(e) => {
            debug!("Failed to send {} to {}: {}", msg.as_str(), peer, e);
            false
        }
    }
}

/// Handle to communicate with the mesh actor
#[derive(Clone)]
pub struct MeshHandle {
    tx: mpsc::UnboundedSender<MeshCommand>,
}

impl MeshHandle {
    /// Start the mesh actor. Returns the handle and the stream of signals the
    /// mesh wants delivered through the relay.
    pub fn spawn<F: TransportFactory>(
        factory: F,
        config: MeshConfig,
        sink: impl LatencySink,
    ) -> (Self, mpsc::UnboundedReceiver<Signal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (done, done_rx) = mpsc::unbounded_channel();

        let mesh = Mesh {
            registry: PeerRegistry::new(),
            aggregator: LatencyAggregator::new(sink),
            factory: Arc::new(factory),
            config,
            outbound,
            commands: tx.downgrade(),
            done,
        };
        tokio::spawn(mesh_actor(mesh, rx, done_rx));

        (Self { tx }, outbound_rx)
    }

    /// Tell the mesh who we are (from the relay's `joined` frame)
    pub fn register_self(&self, id: PeerId) -> Result<(), MeshError> {
        self.send(MeshCommand::RegisterSelf(id))
    }

    /// Deliver a signaling event from the relay
    pub fn signal(&self, signal: Signal) -> Result<(), MeshError> {
        self.send(MeshCommand::Signal(signal))
    }

    pub async fn peers(&self) -> Result<Vec<PeerStatus>, MeshError> {
        let (reply, rx) = oneshot::channel();
        self.send(MeshCommand::Peers { reply })?;
        rx.await.map_err(|_| MeshError::Stopped)
    }

    pub async fn snapshot(&self) -> Result<LatencySnapshot, MeshError> {
        let (reply, rx) = oneshot::channel();
        self.send(MeshCommand::Snapshot { reply })?;
        rx.await.map_err(|_| MeshError::Stopped)
    }

    /// Close every peer connection and stop the actor
    pub fn shutdown(&self) {
        let _ = self.tx.send(MeshCommand::Shutdown);
    }

    fn send(&self, cmd: MeshCommand) -> Result<(), MeshError> {
        self.tx.send(cmd).map_err(|_| MeshError::Stopped)
    }
}
