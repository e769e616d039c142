use std::time::Duration;

/// Quiescence delay between a pong and the next ping
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(1000);

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

pub const DATA_CHANNEL_LABEL: &str = "pingpong";

/// Mesh settings
#[derive(Debug, Clone)]
pub struct MeshConfig {
    pub ping_interval: Duration,
    /// ICE server urls handed to every peer connection
    pub ice_servers: Vec<String>,
    pub data_channel_label: String,
    /// Adopt the first `new_peer` id as our own identity when the relay does
    /// not say who we are. Only for relays without a `joined` handshake.
    pub infer_local_identity: bool,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            data_channel_label: DATA_CHANNEL_LABEL.to_string(),
            infer_local_identity: false,
        }
    }
}
