use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::negotiator::NegotiationState;
use crate::latency::LatencyProber;
use crate::signaling::{IceCandidate, PeerId};
use crate::transport::{PeerTransport, Role};

/// Everything the mesh knows about one remote peer
pub(crate) struct PeerConnection<T> {
    pub role: Role,
    /// Bumped every time the entry is recreated; completions and transport
    /// events carry it so late ones for a previous incarnation are dropped.
    pub generation: u64,
    pub state: NegotiationState,
    /// `None` until the transport has been created
    pub transport: Option<Arc<T>>,
    /// Our offer/answer has gone out; local candidates may follow it
    pub description_sent: bool,
    /// The remote description has been applied; remote candidates may be too
    pub remote_description_applied: bool,
    pub pending_local_candidates: Vec<IceCandidate>,
    pub pending_remote_candidates: Vec<IceCandidate>,
    pub prober: Option<LatencyProber>,
}

impl<T: PeerTransport> PeerConnection<T> {
    fn new(role: Role, generation: u64) -> Self {
        Self {
            role,
            generation,
            state: NegotiationState::New,
            transport: None,
            description_sent: false,
            remote_description_applied: false,
            pending_local_candidates: Vec::new(),
            pending_remote_candidates: Vec::new(),
            prober: None,
        }
    }

    /// Tear down the transport and stop sampling
    pub fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.prober = None;
        self.pending_local_candidates.clear();
        self.pending_remote_candidates.clear();
    }
}

/// Local identity plus one entry per remote peer
pub(crate) struct PeerRegistry<T> {
    local: Option<PeerId>,
    peers: HashMap<PeerId, PeerConnection<T>>,
    next_generation: u64,
}

impl<T: PeerTransport> PeerRegistry<T> {
    pub fn new() -> Self {
        Self {
            local: None,
            peers: HashMap::new(),
            next_generation: 1,
        }
    }

    /// Establish our own id; only the first call has any effect
    pub fn register_self(&mut self, id: PeerId) -> bool {
        if let Some(existing) = self.local {
            if existing != id {
                debug!("Ignoring second identity {} (already {})", id, existing);
            }
            return false;
        }
        info!("Local peer id is {}", id);
        self.local = Some(id);
        // A stale entry under our own id would never be addressed again.
        if let Some(mut conn) = self.peers.remove(&id) {
            conn.close();
        }
        true
    }

    pub fn local_id(&self) -> Option<PeerId> {
        self.local
    }

    pub fn is_self(&self, id: &PeerId) -> bool {
        self.local.as_ref() == Some(id)
    }

    /// Existing entry for `id`, or a fresh one in `New`
    pub fn upsert_peer(&mut self, id: PeerId, role: Role) -> &mut PeerConnection<T> {
        let generation = self.next_generation;
        let conn = self.peers.entry(id).or_insert_with(|| PeerConnection::new(role, generation));
        if conn.generation == generation {
            self.next_generation += 1;
        }
        conn
    }

    /// Discard any existing entry for `id` and start a new one
    pub fn replace_peer(&mut self, id: PeerId, role: Role) -> &mut PeerConnection<T> {
        if let Some(mut stale) = self.peers.remove(&id) {
            debug!("Replacing {} entry for {} ({})", stale.role, id, stale.state);
            stale.close();
        }
        self.upsert_peer(id, role)
    }

    /// Close and forget `id`; returns whether it was known
    pub fn remove_peer(&mut self, id: &PeerId) -> bool {
        match self.peers.remove(id) {
            Some(mut conn) => {
                conn.close();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &PeerId) -> Option<&PeerConnection<T>> {
        self.peers.get(id)
    }

    pub fn get_mut(&mut self, id: &PeerId) -> Option<&mut PeerConnection<T>> {
        self.peers.get_mut(id)
    }

    /// Entry for `id` only if it is still the incarnation that `generation` names
    pub fn get_live(&mut self, id: &PeerId, generation: u64) -> Option<&mut PeerConnection<T>> {
        self.peers
            .get_mut(id)
            .filter(|conn| conn.generation == generation)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn peer_ids(&self) -> impl Iterator<Item = &PeerId> {
        self.peers.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &PeerConnection<T>)> {
        self.peers.iter()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Close every connection (room teardown)
    pub fn clear(&mut self) {
        for (_, mut conn) in self.peers.drain() {
            conn.close();
        }
    }
}
