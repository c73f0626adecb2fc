//! Handshake Events
//!
//! Events produced by the state machine, for logging, tests and replay.

use serde::{Serialize, Deserialize};
use crate::handshake::peer::{EffectId, PeerId};

/// Order of events within one tick for the same peer.
///
/// Lower value = reported first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventKind {
    /// Guard dropped and the handshake was abandoned
    Aborted = 0,
    /// Target cleared after the blend decayed
    CandidateLost = 1,
    /// New candidate captured
    CandidateAcquired = 2,
    /// Effect swapped
    Committed = 3,
}

/// Event data.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum HandshakeEventData {
    /// A fresh candidate was captured into the stacked target.
    CandidateAcquired {
        /// Peer that became the candidate
        candidate: PeerId,
        /// Effect it offered at acquisition
        effect: EffectId,
        /// Hand distance at acquisition
        distance: f32,
    },

    /// Blend decayed to zero and the target was cleared.
    CandidateLost {
        /// Stacked effect that was dropped
        stacked: Option<EffectId>,
    },

    /// Handshake completed and the current effect changed.
    Committed {
        /// Effect before the swap
        from: EffectId,
        /// Effect after the swap
        to: EffectId,
    },

    /// Role or game mode reset while a handshake was in progress.
    Aborted {
        /// Engaged ticks accumulated when aborted
        progress: u32,
    },
}

impl HandshakeEventData {
    /// Ordering key.
    pub fn kind(&self) -> EventKind {
        match self {
            HandshakeEventData::CandidateAcquired { .. } => EventKind::CandidateAcquired,
            HandshakeEventData::CandidateLost { .. } => EventKind::CandidateLost,
            HandshakeEventData::Committed { .. } => EventKind::Committed,
            HandshakeEventData::Aborted { .. } => EventKind::Aborted,
        }
    }
}

/// A handshake event with its tick and local peer.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct HandshakeEvent {
    /// Tick when the event occurred
    pub tick: u64,

    /// Peer whose state machine produced it
    pub peer: PeerId,

    /// Event data
    pub data: HandshakeEventData,
}

impl HandshakeEvent {
    /// Create a new event.
    pub fn new(tick: u64, peer: PeerId, data: HandshakeEventData) -> Self {
        Self { tick, peer, data }
    }

    /// Create candidate acquired event.
    pub fn candidate_acquired(tick: u64, peer: PeerId, candidate: PeerId, effect: EffectId, distance: f32) -> Self {
        Self::new(tick, peer, HandshakeEventData::CandidateAcquired { candidate, effect, distance })
    }

    /// Create candidate lost event.
    pub fn candidate_lost(tick: u64, peer: PeerId, stacked: Option<EffectId>) -> Self {
        Self::new(tick, peer, HandshakeEventData::CandidateLost { stacked })
    }

    /// Create committed event.
    pub fn committed(tick: u64, peer: PeerId, from: EffectId, to: EffectId) -> Self {
        Self::new(tick, peer, HandshakeEventData::Committed { from, to })
    }

    /// Create aborted event.
    pub fn aborted(tick: u64, peer: PeerId, progress: u32) -> Self {
        Self::new(tick, peer, HandshakeEventData::Aborted { progress })
    }

    /// Ordering key.
    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }
}

impl PartialEq for HandshakeEvent {
    fn eq(&self, other: &Self) -> bool {
        self.tick == other.tick
            && self.peer == other.peer
            && self.kind() == other.kind()
    }
}

impl Eq for HandshakeEvent {}

impl PartialOrd for HandshakeEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HandshakeEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Sort by: tick, then peer, then kind
        self.tick
            .cmp(&other.tick)
            .then(self.peer.cmp(&other.peer))
            .then(self.kind().cmp(&other.kind()))
    }
}
