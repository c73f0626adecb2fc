//! Peer Definitions
//!
//! Identity, role, pose, and the read-only view of a peer that the
//! eligibility checks and the state machine consume.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::vec3::Vec3;
use crate::handshake::replicated::ReplicaSnapshot;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Stable network identity, assigned at join.
///
/// Implements Ord so rosters iterate in a fixed order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Create from a raw id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Index of a visual effect in the effect catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct EffectId(pub u32);

impl EffectId {
    /// Create from an index.
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Index as usize for slice access.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Wire form, if the index fits in an `i32`.
    pub fn try_to_wire(self) -> Option<i32> {
        i32::try_from(self.0).ok()
    }

    /// Wire form with `-1` standing for "no effect".
    ///
    /// Indexes above `i32::MAX` have no wire form and also map to `-1`.
    pub fn to_wire(effect: Option<EffectId>) -> i32 {
        effect.and_then(EffectId::try_to_wire).unwrap_or(-1)
    }

    /// Parse the wire form; any negative value means "no effect".
    pub fn from_wire(raw: i32) -> Option<EffectId> {
        u32::try_from(raw).ok().map(EffectId)
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "effect-{}", self.0)
    }
}

/// Effect a peer starts with: `id mod effect_count`.
///
/// Collisions between peers are fine; no coordination is attempted.
/// Returns None when there are no effects to choose from.
pub fn initial_effect(id: PeerId, effect_count: usize) -> Option<EffectId> {
    if effect_count == 0 {
        return None;
    }
    Some(EffectId((id.0 % effect_count as u64) as u32))
}

// =============================================================================
// ROLE
// =============================================================================

/// What a participant does in the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PeerRole {
    /// Owns an effect and can exchange it with others.
    #[default]
    Player,
    /// Watches other peers' effects.
    Spectator,
    /// Runs the server side; watches like a spectator.
    Host,
}

impl PeerRole {
    /// Only players run the handshake.
    #[inline]
    pub fn runs_handshake(self) -> bool {
        matches!(self, PeerRole::Player)
    }
}

/// Session mode chosen at game start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GameMode {
    /// No game running; nothing ticks.
    #[default]
    Undefined,
    /// Alone; the roster is never polled.
    SinglePlayer,
    /// Networked with other peers.
    MultiplePlayer,
}

impl GameMode {
    /// Whether other peers take part.
    #[inline]
    pub fn is_networked(self) -> bool {
        matches!(self, GameMode::MultiplePlayer)
    }
}

// =============================================================================
// POSES
// =============================================================================

/// Body position and facing direction.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct BodyPose {
    /// World-space position
    pub position: Vec3,
    /// Facing direction (need not be normalized)
    pub forward: Vec3,
}

impl BodyPose {
    /// Create a body pose.
    pub const fn new(position: Vec3, forward: Vec3) -> Self {
        Self { position, forward }
    }

    /// Create from a position and Euler rotation in degrees.
    pub fn from_euler_deg(position: Vec3, pitch: f32, yaw: f32) -> Self {
        Self {
            position,
            forward: Vec3::forward_from_euler_deg(pitch, yaw),
        }
    }
}

/// Pose sampled for a peer on one tick.
///
/// `None` means the tracker produced nothing for that part this tick.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct LocalPose {
    /// Body pose
    pub body: Option<BodyPose>,
    /// Hand position
    pub hand: Option<Vec3>,
}

impl LocalPose {
    /// Pose with both body and hand present.
    pub const fn new(body: BodyPose, hand: Vec3) -> Self {
        Self {
            body: Some(body),
            hand: Some(hand),
        }
    }
}

// =============================================================================
// PEER VIEW
// =============================================================================

/// Read-only view of a peer for one tick.
///
/// For remote peers the replicated triple is the last value delivered, so it
/// may be stale or internally inconsistent.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeerView {
    /// Peer identity
    pub id: PeerId,
    /// Peer role
    pub role: PeerRole,
    /// Body and hand pose
    pub pose: LocalPose,
    /// Last known replicated triple
    pub state: ReplicaSnapshot,
}

impl PeerView {
    /// Create a view.
    pub fn new(id: PeerId, role: PeerRole, pose: LocalPose, state: ReplicaSnapshot) -> Self {
        Self { id, role, pose, state }
    }

    /// Hand position, if tracked.
    #[inline]
    pub fn hand(&self) -> Option<Vec3> {
        self.pose.hand
    }

    /// Body pose, if tracked.
    #[inline]
    pub fn body(&self) -> Option<BodyPose> {
        self.pose.body
    }
}
