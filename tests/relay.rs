use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use meshping::signaling::{PeerId, ServerMessage, SignalingServer};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_relay() -> String {
    let server = SignalingServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    format!("ws://{}", addr)
}

async fn connect(url: &str) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

async fn send(ws: &mut Ws, json: String) {
    ws.send(Message::Text(json.into())).await.unwrap();
}

async fn recv(ws: &mut Ws) -> ServerMessage {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for relay")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn assert_silent(ws: &mut Ws) {
    let next = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(next.is_err(), "unexpected frame: {:?}", next);
}

/// Join and consume the `joined` + own `new_peer` frames
async fn join(url: &str, room: &str) -> (Ws, PeerId) {
    let mut ws = connect(url).await;
    send(&mut ws, format!(r#"{{"event":"join","room":"{}"}}"#, room)).await;

    let ServerMessage::Joined { peer_id, room: joined } = recv(&mut ws).await else {
        panic!("Expected joined");
    };
    assert_eq!(joined.as_str(), room);

    let ServerMessage::NewPeer { peer_id: announced } = recv(&mut ws).await else {
        panic!("Expected own new_peer");
    };
    assert_eq!(announced, peer_id);
    (ws, peer_id)
}

fn offer_json(from: PeerId, to: PeerId) -> String {
    format!(
        r#"{{"event":"offer","from":"{}","to":"{}","sdp":{{"type":"offer","sdp":"v=0"}}}}"#,
        from, to
    )
}

#[tokio::test]
async fn members_are_announced_to_the_room() {
    let url = start_relay().await;
    let (mut a, a_id) = join(&url, "lobby").await;
    let (_b, b_id) = join(&url, "lobby").await;

    let ServerMessage::NewPeer { peer_id } = recv(&mut a).await else {
        panic!("Expected new_peer");
    };
    assert_eq!(peer_id, b_id);
    assert_ne!(a_id, b_id);
}

#[tokio::test]
async fn rooms_are_isolated() {
    let url = start_relay().await;
    let (mut a, _) = join(&url, "red").await;
    let (_b, _) = join(&url, "blue").await;

    assert_silent(&mut a).await;
}

#[tokio::test]
async fn offer_is_routed_only_to_its_target() {
    let url = start_relay().await;
    let (mut a, a_id) = join(&url, "lobby").await;
    let (mut b, b_id) = join(&url, "lobby").await;
    let (mut c, _) = join(&url, "lobby").await;

    // Drain arrival notices.
    recv(&mut a).await;
    recv(&mut a).await;
    recv(&mut b).await;

    send(&mut a, offer_json(a_id, b_id)).await;

    let ServerMessage::Offer(offer) = recv(&mut b).await else {
        panic!("Expected offer");
    };
    assert_eq!(offer.from, a_id);
    assert_eq!(offer.to, b_id);
    assert_eq!(offer.sdp.sdp, "v=0");

    assert_silent(&mut c).await;
    assert_silent(&mut a).await;
}

#[tokio::test]
async fn spoofed_sender_is_rejected() {
    let url = start_relay().await;
    let (mut a, a_id) = join(&url, "lobby").await;
    let (mut b, b_id) = join(&url, "lobby").await;
    recv(&mut a).await;

    send(&mut a, offer_json(b_id, a_id)).await;

    let ServerMessage::Error { message } = recv(&mut a).await else {
        panic!("Expected error");
    };
    assert!(message.contains("does not match"));
    assert_silent(&mut b).await;
}

#[tokio::test]
async fn unknown_target_is_rejected() {
    let url = start_relay().await;
    let (mut a, a_id) = join(&url, "lobby").await;
    let ghost: PeerId = "peer_deadbeef".parse().unwrap();

    send(&mut a, offer_json(a_id, ghost)).await;

    let ServerMessage::Error { message } = recv(&mut a).await else {
        panic!("Expected error");
    };
    assert!(message.contains("not in this room"));
}

#[tokio::test]
async fn signal_before_join_is_rejected() {
    let url = start_relay().await;
    let mut ws = connect(&url).await;
    let a: PeerId = "peer_00000001".parse().unwrap();
    let b: PeerId = "peer_00000002".parse().unwrap();

    send(&mut ws, offer_json(a, b)).await;

    let ServerMessage::Error { message } = recv(&mut ws).await else {
        panic!("Expected error");
    };
    assert_eq!(message, "not in a room");
}

#[tokio::test]
async fn invalid_room_is_rejected() {
    let url = start_relay().await;
    let mut ws = connect(&url).await;

    send(&mut ws, r#"{"event":"join","room":"no spaces"}"#.to_string()).await;

    assert!(matches!(recv(&mut ws).await, ServerMessage::Error { .. }));
}

#[tokio::test]
async fn disconnect_announces_lost_peer() {
    let url = start_relay().await;
    let (mut a, _) = join(&url, "lobby").await;
    let (mut b, b_id) = join(&url, "lobby").await;
    recv(&mut a).await;

    b.close(None).await.unwrap();

    let ServerMessage::LostPeer { peer_id } = recv(&mut a).await else {
        panic!("Expected lost_peer");
    };
    assert_eq!(peer_id, b_id);
}

#[tokio::test]
async fn explicit_leave_announces_lost_peer() {
    let url = start_relay().await;
    let (mut a, _) = join(&url, "lobby").await;
    let (mut b, b_id) = join(&url, "lobby").await;
    recv(&mut a).await;

    send(&mut b, r#"{"event":"leave"}"#.to_string()).await;

    let ServerMessage::LostPeer { peer_id } = recv(&mut a).await else {
        panic!("Expected lost_peer");
    };
    assert_eq!(peer_id, b_id);
}
