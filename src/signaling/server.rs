use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tracing::{debug, error, info, warn};

use super::actor::{RoomCommand, RoomManagerHandle, room_manager_actor};
use super::messages::{ClientMessage, ServerMessage};
use super::types::{OutboundMessage, PeerId, SignalingError};

pub const DEFAULT_SIGNALING_PORT: u16 = 3479;
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Room relay: assigns peer ids, announces membership, routes addressed signals
pub struct SignalingServer {
    listener: TcpListener,
    handle: RoomManagerHandle,
}

impl SignalingServer {
    /// Bind the listener and start the room manager
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let (tx, rx) = mpsc::channel::<RoomCommand>(1024);
        tokio::spawn(room_manager_actor(rx));

        info!("Signaling server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            handle: RoomManagerHandle { tx },
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) -> std::io::Result<()> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            let handle = self.handle.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, handle).await {
                    error!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handle: RoomManagerHandle,
) -> Result<(), SignalingError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    info!("WebSocket connection from {}", addr);

    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Message>();

    let mut peer_id: Option<PeerId> = None;
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    let mut waiting_for_pong = false;
    let mut pong_deadline: Option<tokio::time::Instant> = None;

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let ws_msg = Message::Text(msg.into_inner());
                    if ws_tx.send(ws_msg).await.is_err() {
                        break;
                    }
                }
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    if ws_tx.send(ctrl_msg).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    loop {
        let pong_timeout = async {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_interval.tick() => {
                if waiting_for_pong {
                    warn!("No Pong received, disconnecting {}", addr);
                    break;
                }
                if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break;
                }
                waiting_for_pong = true;
                pong_deadline = Some(tokio::time::Instant::now() + PONG_TIMEOUT);
                debug!("Ping sent to {}", addr);
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting {}", addr);
                break;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        if let Err(e) = handle_text_message(&text, &tx, &handle, &mut peer_id).await {
                            warn!("Message handling error from {}: {}", addr, e);
                            send_error(&tx, &e);
                        }
                    }
                    Message::Pong(_) => {
                        waiting_for_pong = false;
                        pong_deadline = None;
                        debug!("Pong received from {}", addr);
                    }
                    Message::Close(_) => {
                        info!("Close received from {}", addr);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    if let Some(ref pid) = peer_id {
        handle.leave_room(pid).await;
    }

    send_task.abort();
    info!("WebSocket disconnected: {}", addr);

    Ok(())
}

async fn handle_text_message(
    text: &str,
    tx: &mpsc::UnboundedSender<OutboundMessage>,
    handle: &RoomManagerHandle,
    peer_id: &mut Option<PeerId>,
) -> Result<(), SignalingError> {
    let client_msg: ClientMessage = serde_json::from_str(text)?;

    match client_msg {
        ClientMessage::Join { room } => {
            if peer_id.is_some() {
                return Err(SignalingError::AlreadyJoined(room));
            }
            *peer_id = Some(handle.join_room(room, tx.clone()).await?);
        }

        ClientMessage::Leave => {
            if let Some(pid) = peer_id.take() {
                handle.leave_room(&pid).await;
            }
        }

        other => {
            let sender = (*peer_id).ok_or(SignalingError::NotJoined)?;
            if let Some(signal) = other.into_signal() {
                handle.relay(sender, signal).await;
            }
        }
    }

    Ok(())
}

fn send_error(tx: &mpsc::UnboundedSender<OutboundMessage>, e: &SignalingError) {
    let err = ServerMessage::Error {
        message: e.to_string(),
    };
    if let Ok(msg) = OutboundMessage::json(&err) {
        let _ = tx.send(msg);
    }
}
