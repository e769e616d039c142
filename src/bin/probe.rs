use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use meshping::config::{DEFAULT_PING_INTERVAL, DEFAULT_STUN_SERVER, MeshConfig};
use meshping::latency::LatencySnapshot;
use meshping::mesh::MeshHandle;
use meshping::signaling::{DEFAULT_RELAY_URL, PeerId, RoomCode, SignalingClient};
use meshping::transport::RtcTransportFactory;

/// Join a room and report latency to every other member
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Relay WebSocket url
    #[arg(long, default_value = DEFAULT_RELAY_URL)]
    relay: String,

    #[arg(long, default_value = "lobby")]
    room: RoomCode,

    /// STUN server url (repeatable)
    #[arg(long = "stun", default_value = DEFAULT_STUN_SERVER)]
    stun: Vec<String>,

    /// Delay between a pong and the next ping
    #[arg(long, default_value_t = DEFAULT_PING_INTERVAL.as_millis() as u64)]
    ping_interval_ms: u64,

    /// Print each snapshot as one JSON object per line
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let client = SignalingClient::join(&args.relay, args.room).await?;
    let local = client.local_id();

    let config = MeshConfig {
        ping_interval: Duration::from_millis(args.ping_interval_ms),
        ice_servers: args.stun,
        ..MeshConfig::default()
    };
    let factory = RtcTransportFactory::new(&config);
    let (snapshot_tx, mut snapshots) = mpsc::unbounded_channel();
    let (mesh, outbound) = MeshHandle::spawn(factory, config, snapshot_tx);
    mesh.register_self(local)?;

    if !args.json {
        println!("   meshping probe");
        println!("   Room {} as {}", client.room(), local);
        println!("   Press Ctrl+C to stop\n");
    }

    let mut relay = tokio::spawn(client.run(mesh.clone(), outbound));
    let mut relay_finished = false;

    loop {
        tokio::select! {
            Some(snapshot) = snapshots.recv() => print_snapshot(local, &snapshot, args.json)?,

            result = &mut relay => {
                relay_finished = true;
                match result {
                    Ok(Ok(())) => info!("Relay session ended"),
                    Ok(Err(e)) => error!("Relay session failed: {}", e),
                    Err(e) => error!("Relay task aborted: {}", e),
                }
                break;
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    mesh.shutdown();
    if !relay_finished {
        // Let the client send its leave frame once the mesh lets go.
        let _ = tokio::time::timeout(Duration::from_secs(2), relay).await;
    }
    Ok(())
}

fn print_snapshot(
    local: PeerId,
    snapshot: &LatencySnapshot,
    json: bool,
) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }

    if snapshot.is_empty() {
        println!("[{}] no peers sampled", local);
        return Ok(());
    }
    for (peer, report) in snapshot.iter() {
        println!(
            "[{}] {:<16} rtt {:>8.2} ms   one-way {:>8.2} ms",
            local, peer.as_str(), report.rtt, report.estimated_one_way_latency
        );
    }
    Ok(())
}
