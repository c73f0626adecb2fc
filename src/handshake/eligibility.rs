//! Eligibility Checks
//!
//! Pure geometric predicates deciding whether another peer can take part in
//! a handshake with the local peer, and which one is closest.

use crate::config::HandshakeConfig;
use crate::core::remap::{remap, MapMode};
use crate::core::vec3::Vec3;
use crate::handshake::peer::{BodyPose, EffectId, LocalPose, PeerId, PeerView};

/// A peer that passed every eligibility check this tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    /// Candidate identity
    pub peer: PeerId,
    /// Effect the candidate currently displays
    pub effect: EffectId,
    /// Hand-to-hand distance
    pub distance: f32,
}

/// Both hands are tracked and not at the zero sentinel.
#[inline]
pub fn hand_visible(local: &LocalPose, other: &LocalPose) -> bool {
    let present = |hand: Option<Vec3>| hand.map_or(false, |h| !h.is_zero());
    present(local.hand) && present(other.hand)
}

/// Angle between `body`'s forward direction and the direction to `target`.
#[inline]
pub fn view_angle(body: &BodyPose, target: Vec3) -> f32 {
    body.forward.angle_deg(target - body.position)
}

/// Both bodies face each other within `threshold_deg`.
///
/// One-sided attention does not count.
pub fn facing(a: &BodyPose, b: &BodyPose, threshold_deg: f32) -> bool {
    let a_to_b = view_angle(a, b.position);
    let b_to_a = view_angle(b, a.position);
    a_to_b < threshold_deg && b_to_a < threshold_deg
}

/// Facing check on optional poses; a missing body never faces anyone.
pub fn poses_facing(a: &LocalPose, b: &LocalPose, threshold_deg: f32) -> bool {
    match (a.body, b.body) {
        (Some(a), Some(b)) => facing(&a, &b, threshold_deg),
        _ => false,
    }
}

/// Closest peer with visible hands that mutually faces `local`.
///
/// Peers are visited in roster order and only a strictly smaller distance
/// replaces the current best, so the first of several equidistant peers wins.
pub fn nearest_eligible<'a, I>(local: &PeerView, roster: I, config: &HandshakeConfig) -> Option<Candidate>
where
    I: IntoIterator<Item = &'a PeerView>,
{
    let local_hand = local.hand()?;
    let mut best: Option<Candidate> = None;

    for peer in roster {
        if peer.id == local.id {
            continue;
        }
        if !hand_visible(&local.pose, &peer.pose) {
            continue;
        }
        if !poses_facing(&local.pose, &peer.pose, config.view_angle_threshold_deg) {
            continue;
        }
        let Some(hand) = peer.hand() else {
            continue;
        };

        let distance = hand.distance(local_hand);
        if best.map_or(true, |b| distance < b.distance) {
            best = Some(Candidate {
                peer: peer.id,
                effect: peer.state.current,
                distance,
            });
        }
    }

    best
}

/// Highest blend reachable at hand distance `distance`.
///
/// 1 at or below `min`, 0 at or beyond `max`, linear in between.
#[inline]
pub fn falloff_ceiling(distance: f32, min: f32, max: f32) -> f32 {
    remap(distance, min, max, 1.0, 0.0, MapMode::Clamp).clamp(0.0, 1.0)
}
