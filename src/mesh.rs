//! Full-mesh peer connections: registry, negotiation, and the actor driving both

mod actor;
mod negotiator;
mod registry;


pub use actor::{MeshError, MeshHandle, PeerStatus};
pub use negotiator::NegotiationState;
