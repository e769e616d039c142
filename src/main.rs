use clap::Parser;
use tracing_subscriber::EnvFilter;

use meshping::signaling::{DEFAULT_SIGNALING_PORT, SignalingServer};

/// Room relay for meshping peers
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value_t = format!("0.0.0.0:{}", DEFAULT_SIGNALING_PORT))]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    println!("   meshping relay");
    println!("   Binding to {}", args.bind);
    println!("   Press Ctrl+C to stop\n");

    let server = SignalingServer::bind(&args.bind).await?;
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {}
    }
    Ok(())
}
