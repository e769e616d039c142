use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use super::prober::LatencySample;
use crate::signaling::PeerId;

/// What consumers see for one peer, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencyReport {
    pub rtt: f64,
    #[serde(rename = "estimatedOneWayLatency")]
    pub estimated_one_way_latency: f64,
}

impl From<&LatencySample> for LatencyReport {
    fn from(sample: &LatencySample) -> Self {
        Self {
            rtt: sample.rtt,
            estimated_one_way_latency: sample.estimated_one_way_latency,
        }
    }
}

/// Latest latency for every peer with an open channel, rebuilt on each update
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LatencySnapshot {
    peers: BTreeMap<PeerId, LatencyReport>,
}

impl LatencySnapshot {
    pub fn get(&self, peer: &PeerId) -> Option<&LatencyReport> {
        self.peers.get(peer)
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &LatencyReport)> {
        self.peers.iter()
    }
}

/// Receives every published snapshot
pub trait LatencySink: Send + 'static {
    fn publish(&mut self, snapshot: LatencySnapshot);
}

impl LatencySink for mpsc::UnboundedSender<LatencySnapshot> {
    fn publish(&mut self, snapshot: LatencySnapshot) {
        let _ = self.send(snapshot);
    }
}

/// Merges per-peer samples and pushes the whole snapshot on every change
pub struct LatencyAggregator {
    samples: HashMap<PeerId, LatencySample>,
    sink: Box<dyn LatencySink>,
}

impl LatencyAggregator {
    pub fn new(sink: impl LatencySink) -> Self {
        Self {
            samples: HashMap::new(),
            sink: Box::new(sink),
        }
    }

    pub fn on_sample_updated(&mut self, peer: PeerId, sample: LatencySample) {
        debug!(
            "RTT for peer {}: {:.1}ms (one-way {:.1}ms)",
            peer, sample.rtt, sample.estimated_one_way_latency
        );
        self.samples.insert(peer, sample);
        self.publish();
    }

    /// Forget a peer; republishes only if it was part of the snapshot
    pub fn on_peer_lost(&mut self, peer: &PeerId) {
        if self.samples.remove(peer).is_some() {
            self.publish();
        }
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            peers: self
                .samples
                .iter()
                .map(|(peer, sample)| (*peer, LatencyReport::from(sample)))
                .collect(),
        }
    }

    fn publish(&mut self) {
        let snapshot = self.snapshot();
        self.sink.publish(snapshot);
    }
}
