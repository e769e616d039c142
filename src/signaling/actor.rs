use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::messages::{ServerMessage, Signal};
use super::types::{OutboundMessage, PeerId, PeerState, Room, RoomCode, SignalingError};

/// Commands sent to the room manager actor
pub(crate) enum RoomCommand {
    Join {
        room: RoomCode,
        peer_tx: mpsc::UnboundedSender<OutboundMessage>,
        reply: oneshot::Sender<Result<PeerId, SignalingError>>,
    },
    Leave {
        peer_id: PeerId,
    },
    Relay {
        sender: PeerId,
        signal: Signal,
    },
}

/// Owns every room; all membership changes and routing go through here
pub(crate) async fn room_manager_actor(mut rx: mpsc::Receiver<RoomCommand>) {
    let mut rooms: HashMap<RoomCode, Room> = HashMap::new();
    let mut peer_rooms: HashMap<PeerId, RoomCode> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RoomCommand::Join {
                room: code,
                peer_tx,
                reply,
            } => {
                let result = join(&mut rooms, &mut peer_rooms, code, peer_tx);
                let _ = reply.send(result);
            }

            RoomCommand::Leave { peer_id } => {
                leave(&mut rooms, &mut peer_rooms, peer_id);
            }

            RoomCommand::Relay { sender, signal } => {
                if let Err(e) = relay(&rooms, &peer_rooms, sender, signal) {
                    warn!("Rejected signal from {}: {}", sender, e);
                    let room = peer_rooms.get(&sender).and_then(|code| rooms.get(code));
                    if let Some(peer) = room.and_then(|room| room.peers.get(&sender)) {
                        let err = ServerMessage::Error {
                            message: e.to_string(),
                        };
                        if let Ok(msg) = OutboundMessage::json(&err) {
                            let _ = peer.tx.send(msg);
                        }
                    }
                }
            }
        }
    }
}

fn join(
    rooms: &mut HashMap<RoomCode, Room>,
    peer_rooms: &mut HashMap<PeerId, RoomCode>,
    code: RoomCode,
    peer_tx: mpsc::UnboundedSender<OutboundMessage>,
) -> Result<PeerId, SignalingError> {
    let mut peer_id = PeerId::generate();
    while peer_rooms.contains_key(&peer_id) {
        peer_id = PeerId::generate();
    }

    // The newcomer learns its own id before any room event reaches it.
    let joined = OutboundMessage::json(&ServerMessage::Joined {
        peer_id,
        room: code,
    })?;
    let _ = peer_tx.send(joined);

    let room = rooms.entry(code).or_default();
    room.peers.insert(peer_id, PeerState { tx: peer_tx });
    peer_rooms.insert(peer_id, code);

    let announce = OutboundMessage::json(&ServerMessage::NewPeer { peer_id })?;
    room.broadcast(&announce, None);

    info!(
        "Peer {} joined room {} ({} members)",
        peer_id,
        code,
        room.peers.len()
    );
    Ok(peer_id)
}

fn leave(
    rooms: &mut HashMap<RoomCode, Room>,
    peer_rooms: &mut HashMap<PeerId, RoomCode>,
    peer_id: PeerId,
) {
    let Some(code) = peer_rooms.remove(&peer_id) else {
        return;
    };
    if let Some(room) = rooms.get_mut(&code) {
        room.peers.remove(&peer_id);

        if room.peers.is_empty() {
            rooms.remove(&code);
            info!("Room {} removed (empty)", code);
        } else if let Ok(msg) = OutboundMessage::json(&ServerMessage::LostPeer { peer_id }) {
            room.broadcast(&msg, None);
        }
    }
    info!("Peer {} left room {}", peer_id, code);
}

fn relay(
    rooms: &HashMap<RoomCode, Room>,
    peer_rooms: &HashMap<PeerId, RoomCode>,
    sender: PeerId,
    signal: Signal,
) -> Result<(), SignalingError> {
    let Some((from, to)) = signal.route() else {
        return Err(SignalingError::Internal(format!(
            "{} is relay-only",
            signal.event_name()
        )));
    };
    if from != sender {
        return Err(SignalingError::SpoofedSender {
            claimed: from,
            actual: sender,
        });
    }

    let room = peer_rooms
        .get(&sender)
        .and_then(|code| rooms.get(code))
        .ok_or(SignalingError::NotJoined)?;
    let target = room.peers.get(&to).ok_or(SignalingError::UnknownPeer(to))?;

    debug!("Relaying {} {} -> {}", signal.event_name(), from, to);
    let msg = OutboundMessage::json(&ServerMessage::from(signal))?;
    let _ = target.tx.send(msg);
    Ok(())
}

/// Handle to communicate with the room manager actor
#[derive(Clone)]
pub struct RoomManagerHandle {
    pub(crate) tx: mpsc::Sender<RoomCommand>,
}

impl RoomManagerHandle {
    /// Join (or create) a room; the relay assigns the peer id
    pub async fn join_room(
        &self,
        room: RoomCode,
        peer_tx: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Result<PeerId, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(RoomCommand::Join {
                room,
                peer_tx,
                reply: reply_tx,
            })
            .await;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))?
    }

    /// Leave the current room
    pub async fn leave_room(&self, peer_id: &PeerId) {
        let _ = self.tx.send(RoomCommand::Leave { peer_id: *peer_id }).await;
    }

    /// Route an addressed signal to its recipient
    pub async fn relay(&self, sender: PeerId, signal: Signal) {
        let _ = self.tx.send(RoomCommand::Relay { sender, signal }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::messages::{SdpMessage, SessionDescription};

    fn spawn_manager() -> RoomManagerHandle {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(room_manager_actor(rx));
        RoomManagerHandle { tx }
    }

    fn next(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> ServerMessage {
        let msg = rx.try_recv().expect("expected a message");
        serde_json::from_str(msg.into_inner().as_str()).unwrap()
    }

    #[tokio::test]
    async fn join_announces_self_after_joined() {
        let handle = spawn_manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let lobby = RoomCode::parse("lobby").unwrap();

        let id = handle.join_room(lobby, tx).await.unwrap();

        match next(&mut rx) {
            ServerMessage::Joined { peer_id, room } => {
                assert_eq!(peer_id, id);
                assert_eq!(room, lobby);
            }
            other => panic!("Expected Joined, got {:?}", other),
        }
        match next(&mut rx) {
            ServerMessage::NewPeer { peer_id } => assert_eq!(peer_id, id),
            other => panic!("Expected NewPeer, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn leave_notifies_remaining_members() {
        let handle = spawn_manager();
        let lobby = RoomCode::parse("lobby").unwrap();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();

        let _a = handle.join_room(lobby, tx_a).await.unwrap();
        let b = handle.join_room(lobby, tx_b).await.unwrap();
        handle.leave_room(&b).await;
        // Round-trip through the actor so the leave has been processed.
        let (tx_c, _rx_c) = mpsc::unbounded_channel();
        let c = handle.join_room(lobby, tx_c).await.unwrap();

        let events: Vec<ServerMessage> = std::iter::from_fn(|| rx_a.try_recv().ok())
            .map(|m| serde_json::from_str(m.into_inner().as_str()).unwrap())
            .collect();
        assert!(matches!(events[3], ServerMessage::LostPeer { peer_id } if peer_id == b));
        assert!(matches!(events[4], ServerMessage::NewPeer { peer_id } if peer_id == c));
    }

    #[tokio::test]
    async fn relay_routes_to_addressed_peer_only() {
        let handle = spawn_manager();
        let lobby = RoomCode::parse("lobby").unwrap();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_c, mut rx_c) = mpsc::unbounded_channel();

        let a = handle.join_room(lobby, tx_a).await.unwrap();
        let b = handle.join_room(lobby, tx_b).await.unwrap();
        let _c = handle.join_room(lobby, tx_c).await.unwrap();
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}
        while rx_c.try_recv().is_ok() {}

        let offer = Signal::Offer(SdpMessage {
            from: a,
            to: b,
            sdp: SessionDescription::offer("v=0"),
        });
        handle.relay(a, offer.clone()).await;
        let (tx_d, _rx_d) = mpsc::unbounded_channel();
        handle.join_room(lobby, tx_d).await.unwrap();

        assert_eq!(next(&mut rx_b).into_signal(), Some(offer));
        assert!(matches!(next(&mut rx_c), ServerMessage::NewPeer { .. }));
    }

    #[tokio::test]
    async fn relay_rejects_spoofed_sender() {
        let handle = spawn_manager();
        let lobby = RoomCode::parse("lobby").unwrap();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        let a = handle.join_room(lobby, tx_a).await.unwrap();
        let b = handle.join_room(lobby, tx_b).await.unwrap();
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        let spoof = Signal::Answer(SdpMessage {
            from: b,
            to: b,
            sdp: SessionDescription::answer("v=0"),
        });
        handle.relay(a, spoof).await;
        let (tx_c, _rx_c) = mpsc::unbounded_channel();
        handle.join_room(lobby, tx_c).await.unwrap();

        assert!(matches!(next(&mut rx_a), ServerMessage::Error { .. }));
        assert!(matches!(next(&mut rx_b), ServerMessage::NewPeer { .. }));
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let handle = spawn_manager();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();

        handle
            .join_room(RoomCode::parse("one").unwrap(), tx_a)
            .await
            .unwrap();
        handle
            .join_room(RoomCode::parse("two").unwrap(), tx_b)
            .await
            .unwrap();

        assert!(matches!(next(&mut rx_a), ServerMessage::Joined { .. }));
        assert!(matches!(next(&mut rx_a), ServerMessage::NewPeer { .. }));
        assert!(rx_a.try_recv().is_err());
    }
}
