use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::{PeerTransport, Role, TransportError, TransportEvent, TransportEvents, TransportFactory};
use crate::config::MeshConfig;
use crate::signaling::{IceCandidate, PeerId, SdpKind, SessionDescription};

type Outbox = Arc<Mutex<Option<mpsc::UnboundedReceiver<String>>>>;

/// Builds webrtc-rs peer connections with one data channel each
#[derive(Debug, Clone)]
pub struct RtcTransportFactory {
    ice_servers: Vec<String>,
    label: String,
}

impl RtcTransportFactory {
    pub fn new(config: &MeshConfig) -> Self {
        Self {
            ice_servers: config.ice_servers.clone(),
            label: config.data_channel_label.clone(),
        }
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

impl TransportFactory for RtcTransportFactory {
    type Transport = RtcTransport;

    async fn connect(
        &self,
        peer: PeerId,
        role: Role,
        events: TransportEvents,
    ) -> Result<RtcTransport, TransportError> {
        let api = APIBuilder::new().build();
        let pc = Arc::new(api.new_peer_connection(self.rtc_configuration()).await?);

        let closed = Arc::new(AtomicBool::new(false));
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel::<String>();
        let outbox: Outbox = Arc::new(Mutex::new(Some(outbox_rx)));

        let candidate_events = events.clone();
        let candidate_closed = closed.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            let closed = candidate_closed.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                if closed.load(Ordering::Acquire) {
                    return;
                }
                match candidate.to_json() {
                    Ok(init) => {
                        events.emit(TransportEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => warn!("Failed to encode local candidate for {}: {}", peer, e),
                }
            })
        }));

        let state_events = events.clone();
        let state_closed = closed.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = state_events.clone();
            let closed = state_closed.clone();
            Box::pin(async move {
                debug!("Peer connection to {} is {}", peer, state);
                if state == RTCPeerConnectionState::Failed && !closed.load(Ordering::Acquire) {
                    events.emit(TransportEvent::Failed(format!("peer connection {}", state)));
                }
            })
        }));

        match role {
            Role::Initiator => {
                let channel = pc.create_data_channel(&self.label, None).await?;
                attach_channel(channel, events, closed.clone(), outbox);
            }
            Role::Responder => {
                let channel_closed = closed.clone();
                pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                    debug!("Remote opened data channel {} for {}", channel.label(), peer);
                    attach_channel(
                        channel,
                        events.clone(),
                        channel_closed.clone(),
                        outbox.clone(),
                    );
                    Box::pin(async {})
                }));
            }
        }

        Ok(RtcTransport {
            pc,
            outbox: outbox_tx,
            closed,
        })
    }
}

/// Wire a data channel's callbacks into the mesh and start its writer once open
fn attach_channel(
    channel: Arc<RTCDataChannel>,
    events: TransportEvents,
    closed: Arc<AtomicBool>,
    outbox: Outbox,
) {
    let weak: Weak<RTCDataChannel> = Arc::downgrade(&channel);

    let open_events = events.clone();
    let open_closed = closed.clone();
    channel.on_open(Box::new(move || {
        let events = open_events.clone();
        let closed = open_closed.clone();
        let outbox = outbox.clone();
        let weak = weak.clone();
        Box::pin(async move {
            let Some(channel) = weak.upgrade() else {
                return;
            };
            let rx = outbox.lock().ok().and_then(|mut slot| slot.take());
            if let Some(rx) = rx {
                tokio::spawn(write_loop(channel, rx));
            }
            if !closed.load(Ordering::Acquire) {
                events.emit(TransportEvent::ChannelOpen);
            }
        })
    }));

    let message_events = events.clone();
    let message_closed = closed.clone();
    channel.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = message_events.clone();
        let closed = message_closed.clone();
        Box::pin(async move {
            if !closed.load(Ordering::Acquire) {
                let text = String::from_utf8_lossy(&msg.data).into_owned();
                events.emit(TransportEvent::Message(text));
            }
        })
    }));

    channel.on_close(Box::new(move || {
        let events = events.clone();
        let closed = closed.clone();
        Box::pin(async move {
            if !closed.load(Ordering::Acquire) {
                events.emit(TransportEvent::ChannelClosed);
            }
        })
    }));
}

/// Drain queued text onto the channel in order
async fn write_loop(channel: Arc<RTCDataChannel>, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(text) = rx.recv().await {
        if let Err(e) = channel.send_text(text).await {
            debug!("Data channel {} write failed: {}", channel.label(), e);
            break;
        }
    }
}

/// A webrtc-rs peer connection plus the outbox of its single data channel
pub struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
    outbox: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

impl PeerTransport for RtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        if offer.kind != SdpKind::Offer {
            return Err(TransportError::UnexpectedDescription(offer.kind));
        }
        self.pc
            .set_remote_description(RTCSessionDescription::offer(offer.sdp)?)
            .await?;
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), TransportError> {
        if answer.kind != SdpKind::Answer {
            return Err(TransportError::UnexpectedDescription(answer.kind));
        }
        self.pc
            .set_remote_description(RTCSessionDescription::answer(answer.sdp)?)
            .await?;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.outbox
            .send(text.to_owned())
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let pc = self.pc.clone();
        tokio::spawn(async move {
            if let Err(e) = pc.close().await {
                debug!("Error closing peer connection: {}", e);
            }
        });
    }
}
