//! Ping-pong latency sampling and the snapshot published to consumers

mod aggregator;
mod prober;

pub use aggregator::{LatencyAggregator, LatencyReport, LatencySink, LatencySnapshot};
pub use prober::{LatencyProber, LatencySample, ProbeMessage};
