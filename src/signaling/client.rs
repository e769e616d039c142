use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::messages::{ClientMessage, ServerMessage, Signal};
use super::types::{PeerId, RoomCode, SignalingError};
use crate::mesh::MeshHandle;

pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:3479";
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Relay connection for one room membership
pub struct SignalingClient {
    ws: WsStream,
    local_id: PeerId,
    room: RoomCode,
}

impl SignalingClient {
    /// Connect, join `room` and wait for the relay to assign our id
    pub async fn join(url: &str, room: RoomCode) -> Result<Self, SignalingError> {
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await?;
        debug!("Connected to relay {}", url);

        let join = serde_json::to_string(&ClientMessage::Join { room })?;
        ws.send(Message::Text(join.into())).await?;

        let local_id = tokio::time::timeout(JOIN_TIMEOUT, wait_for_joined(&mut ws))
            .await
            .map_err(|_| SignalingError::Handshake("timed out waiting for joined".to_string()))??;

        info!("Joined room {} as {}", room, local_id);
        Ok(Self { ws, local_id, room })
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn room(&self) -> RoomCode {
        self.room
    }

    /// Pump room events into the mesh and mesh signals out to the relay.
    ///
    /// Returns when the relay hangs up or the mesh stops; in the latter case
    /// the room is left explicitly.
    pub async fn run(
        self,
        mesh: MeshHandle,
        mut outbound: mpsc::UnboundedReceiver<Signal>,
    ) -> Result<(), SignalingError> {
        let room = self.room;
        let (mut ws_tx, mut ws_rx) = self.ws.split();

        loop {
            tokio::select! {
                signal = outbound.recv() => {
                    let Some(signal) = signal else {
                        info!("Leaving room {}", room);
                        let leave = serde_json::to_string(&ClientMessage::Leave)?;
                        ws_tx.send(Message::Text(leave.into())).await?;
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    };
                    let Some(msg) = ClientMessage::from_signal(signal) else {
                        continue;
                    };
                    let text = serde_json::to_string(&msg)?;
                    ws_tx.send(Message::Text(text.into())).await?;
                }

                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if !dispatch(&text, &mesh) {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Relay closed the connection");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }

        Ok(())
    }
}

async fn wait_for_joined(ws: &mut WsStream) -> Result<PeerId, SignalingError> {
    while let Some(msg) = ws.next().await {
        let Message::Text(text) = msg? else {
            continue;
        };
        match serde_json::from_str::<ServerMessage>(&text)? {
            ServerMessage::Joined { peer_id, .. } => return Ok(peer_id),
            ServerMessage::Error { message } => return Err(SignalingError::Handshake(message)),
            other => debug!("Ignoring {:?} before joined", other),
        }
    }
    Err(SignalingError::Handshake(
        "relay closed the connection".to_string(),
    ))
}

/// Hand one relay frame to the mesh; false once the mesh is gone
fn dispatch(text: &str, mesh: &MeshHandle) -> bool {
    let msg = match serde_json::from_str::<ServerMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Dropping malformed relay frame: {}", e);
            return true;
        }
    };

    match msg {
        ServerMessage::Error { message } => {
            warn!("Relay error: {}", message);
            true
        }
        ServerMessage::Joined { peer_id, .. } => {
            debug!("Ignoring repeated joined for {}", peer_id);
            true
        }
        other => match other.into_signal() {
            Some(signal) => mesh.signal(signal).is_ok(),
            None => true,
        },
    }
}
