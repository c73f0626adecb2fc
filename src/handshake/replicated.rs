//! Replicated Peer State
//!
//! Three fields per peer (current effect, target effect, blend fraction),
//! each owned by exactly one writer and mirrored read-only to everyone else.
//!
//! Propagation is per field. An observer may see `target` from tick N next
//! to `blend` from tick N-3; readers are expected to tolerate that. The owner
//! side queues a `FieldUpdate` for every change, and the transport delivers
//! each one independently.
//!
//! Every write bumps the field's sequence number. The owner can write a field
//! several times within one tick, so mirrors order deliveries by sequence,
//! not by tick. Re-sending a value under its existing sequence is harmless.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::handshake::peer::{EffectId, PeerId};

/// Replication errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReplicationError {
    /// Someone other than the designated writer tried to write.
    #[error("{by} may not write {field} owned by {owner}")]
    NotOwner {
        /// Field being written
        field: ReplicatedField,
        /// Rejected writer
        by: PeerId,
        /// Designated writer
        owner: PeerId,
    },
}

/// Names of the replicated fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicatedField {
    /// Effect currently displayed
    CurrentEffect,
    /// Effect being blended towards
    TargetEffect,
    /// Blend between current and target
    BlendFraction,
}

impl fmt::Display for ReplicatedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplicatedField::CurrentEffect => "current_effect",
            ReplicatedField::TargetEffect => "target_effect",
            ReplicatedField::BlendFraction => "blend_fraction",
        };
        f.write_str(name)
    }
}

// =============================================================================
// REPLICATED CELL
// =============================================================================

/// A single owner-written, everyone-read value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedCell<T> {
    value: T,
    writer: PeerId,
    seq: u64,
    last_update_tick: u64,
}

impl<T: Copy + PartialEq> ReplicatedCell<T> {
    /// Create a cell owned by `writer`.
    pub fn new(writer: PeerId, value: T) -> Self {
        Self {
            value,
            writer,
            seq: 0,
            last_update_tick: 0,
        }
    }

    /// Last delivered value.
    #[inline]
    pub fn get(&self) -> T {
        self.value
    }

    /// The only peer allowed to write this cell.
    #[inline]
    pub fn writer(&self) -> PeerId {
        self.writer
    }

    /// Sequence number of the last accepted write (0 = initial value).
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Tick of the last accepted write.
    #[inline]
    pub fn last_update_tick(&self) -> u64 {
        self.last_update_tick
    }

    /// Write iff `by` is the designated writer.
    ///
    /// Returns whether the value changed. Only a change takes a new sequence
    /// number.
    pub fn write(
        &mut self,
        field: ReplicatedField,
        by: PeerId,
        value: T,
        tick: u64,
    ) -> Result<bool, ReplicationError> {
        if by != self.writer {
            return Err(ReplicationError::NotOwner {
                field,
                by,
                owner: self.writer,
            });
        }
        Ok(self.advance(value, tick).is_some())
    }

    /// Accept a delivered value on the mirror side.
    ///
    /// Writes with a lower sequence number than the last accepted one are
    /// dropped (Ok(false)). An equal sequence number is the same write
    /// delivered again.
    pub fn accept(
        &mut self,
        field: ReplicatedField,
        by: PeerId,
        value: T,
        tick: u64,
        seq: u64,
    ) -> Result<bool, ReplicationError> {
        if by != self.writer {
            return Err(ReplicationError::NotOwner {
                field,
                by,
                owner: self.writer,
            });
        }
        if seq < self.seq {
            return Ok(false);
        }
        let changed = self.value != value;
        self.value = value;
        self.seq = seq;
        self.last_update_tick = tick;
        Ok(changed)
    }

    /// Owner-side store. Returns the new sequence number if the value changed.
    fn advance(&mut self, value: T, tick: u64) -> Option<u64> {
        if self.value == value {
            return None;
        }
        self.value = value;
        self.seq += 1;
        self.last_update_tick = tick;
        Some(self.seq)
    }
}

// =============================================================================
// SNAPSHOT & RENDER WEIGHTS
// =============================================================================

/// The replicated triple as read on one tick.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSnapshot {
    /// Effect currently displayed
    pub current: EffectId,
    /// Effect being blended towards, if any
    pub target: Option<EffectId>,
    /// 0 = fully current, 1 = fully target
    pub blend: f32,
}

impl ReplicaSnapshot {
    /// Triple for a freshly joined peer.
    pub fn initial(current: EffectId) -> Self {
        Self {
            current,
            target: None,
            blend: 0.0,
        }
    }

    /// Render weights for the observer side.
    ///
    /// The target weight is dropped when no target is set, even if a stale
    /// blend value is still non-zero.
    pub fn weights(&self) -> BlendWeights {
        let blend = self.blend.clamp(0.0, 1.0);
        BlendWeights {
            current: (self.current, 1.0 - blend),
            target: self.target.map(|target| (target, blend)),
        }
    }
}

/// How strongly each effect should be drawn for one peer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlendWeights {
    /// Current effect and its weight
    pub current: (EffectId, f32),
    /// Target effect and its weight
    pub target: Option<(EffectId, f32)>,
}

impl BlendWeights {
    /// Weight for a given effect (0 if it is neither current nor target).
    ///
    /// When current and target are the same effect the weights add up.
    pub fn weight_of(&self, effect: EffectId) -> f32 {
        let mut weight = 0.0;
        if self.current.0 == effect {
            weight += self.current.1;
        }
        if let Some((target, w)) = self.target {
            if target == effect {
                weight += w;
            }
        }
        weight
    }
}

// =============================================================================
// FIELD UPDATES
// =============================================================================

/// New value for one replicated field.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// New current effect
    CurrentEffect(EffectId),
    /// New target effect (None clears it)
    TargetEffect(Option<EffectId>),
    /// New blend fraction
    BlendFraction(f32),
}

impl FieldValue {
    /// Which field this value is for.
    pub fn field(&self) -> ReplicatedField {
        match self {
            FieldValue::CurrentEffect(_) => ReplicatedField::CurrentEffect,
            FieldValue::TargetEffect(_) => ReplicatedField::TargetEffect,
            FieldValue::BlendFraction(_) => ReplicatedField::BlendFraction,
        }
    }
}

/// One field change, as handed to the transport.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdate {
    /// Owner that wrote the value
    pub writer: PeerId,
    /// Owner's tick at write time
    pub tick: u64,
    /// Per-field write sequence, increasing with every change
    pub seq: u64,
    /// The value
    pub value: FieldValue,
}

// =============================================================================
// OWNER SIDE
// =============================================================================

/// The owner's copy of its replicated fields.
///
/// Every change is queued in an outbox for the transport to broadcast.
#[derive(Clone, Debug)]
pub struct LocalReplica {
    owner: PeerId,
    current: ReplicatedCell<EffectId>,
    target: ReplicatedCell<Option<EffectId>>,
    blend: ReplicatedCell<f32>,
    outbox: Vec<FieldUpdate>,
}

impl LocalReplica {
    /// Create the owner's replica with initial values.
    pub fn new(owner: PeerId, initial: EffectId) -> Self {
        Self {
            owner,
            current: ReplicatedCell::new(owner, initial),
            target: ReplicatedCell::new(owner, None),
            blend: ReplicatedCell::new(owner, 0.0),
            outbox: Vec::new(),
        }
    }

    /// Owning peer.
    pub fn owner(&self) -> PeerId {
        self.owner
    }

    /// Current effect.
    #[inline]
    pub fn current(&self) -> EffectId {
        self.current.get()
    }

    /// Target effect.
    #[inline]
    pub fn target(&self) -> Option<EffectId> {
        self.target.get()
    }

    /// Blend fraction.
    #[inline]
    pub fn blend(&self) -> f32 {
        self.blend.get()
    }

    /// Read all three fields.
    pub fn snapshot(&self) -> ReplicaSnapshot {
        ReplicaSnapshot {
            current: self.current(),
            target: self.target(),
            blend: self.blend(),
        }
    }

    /// Set the current effect.
    pub fn set_current(&mut self, effect: EffectId, tick: u64) {
        if let Some(seq) = self.current.advance(effect, tick) {
            self.queue(FieldValue::CurrentEffect(effect), tick, seq);
        }
    }

    /// Set or clear the target effect.
    pub fn set_target(&mut self, effect: Option<EffectId>, tick: u64) {
        if let Some(seq) = self.target.advance(effect, tick) {
            self.queue(FieldValue::TargetEffect(effect), tick, seq);
        }
    }

    /// Set the blend fraction, clamped to [0, 1].
    pub fn set_blend(&mut self, blend: f32, tick: u64) {
        let blend = blend.clamp(0.0, 1.0);
        if let Some(seq) = self.blend.advance(blend, tick) {
            self.queue(FieldValue::BlendFraction(blend), tick, seq);
        }
    }

    /// Return all three fields to their initial values.
    pub fn reset(&mut self, initial: EffectId, tick: u64) {
        self.set_current(initial, tick);
        self.set_target(None, tick);
        self.set_blend(0.0, tick);
    }

    /// Queue every field regardless of change, e.g. for a late joiner or to
    /// repair lost updates. Values go out under their existing sequence.
    pub fn queue_full_state(&mut self, tick: u64) {
        let (current, target, blend) = (self.current, self.target, self.blend);
        self.queue(FieldValue::CurrentEffect(current.get()), tick, current.seq());
        self.queue(FieldValue::TargetEffect(target.get()), tick, target.seq());
        self.queue(FieldValue::BlendFraction(blend.get()), tick, blend.seq());
    }

    /// Drain pending updates for the transport.
    pub fn take_outbox(&mut self) -> Vec<FieldUpdate> {
        std::mem::take(&mut self.outbox)
    }

    fn queue(&mut self, value: FieldValue, tick: u64, seq: u64) {
        self.outbox.push(FieldUpdate {
            writer: self.owner,
            tick,
            seq,
            value,
        });
    }
}

// =============================================================================
// OBSERVER SIDE
// =============================================================================

/// An observer's mirror of another peer's replicated fields.
#[derive(Clone, Debug)]
pub struct RemoteReplica {
    owner: PeerId,
    current: ReplicatedCell<EffectId>,
    target: ReplicatedCell<Option<EffectId>>,
    blend: ReplicatedCell<f32>,
}

impl RemoteReplica {
    /// Create a mirror seeded with the owner's predictable initial values.
    pub fn new(owner: PeerId, initial: EffectId) -> Self {
        Self {
            owner,
            current: ReplicatedCell::new(owner, initial),
            target: ReplicatedCell::new(owner, None),
            blend: ReplicatedCell::new(owner, 0.0),
        }
    }

    /// Mirrored peer.
    pub fn owner(&self) -> PeerId {
        self.owner
    }

    /// Apply one delivered update.
    ///
    /// Returns whether the mirrored value changed.
    pub fn apply(&mut self, update: &FieldUpdate) -> Result<bool, ReplicationError> {
        let field = update.value.field();
        match update.value {
            FieldValue::CurrentEffect(effect) => {
                self.current.accept(field, update.writer, effect, update.tick, update.seq)
            }
            FieldValue::TargetEffect(effect) => {
                self.target.accept(field, update.writer, effect, update.tick, update.seq)
            }
            FieldValue::BlendFraction(blend) => {
                self.blend.accept(field, update.writer, blend.clamp(0.0, 1.0), update.tick, update.seq)
            }
        }
    }

    /// Last delivered triple (fields may come from different ticks).
    pub fn snapshot(&self) -> ReplicaSnapshot {
        ReplicaSnapshot {
            current: self.current.get(),
            target: self.target.get(),
            blend: self.blend.get(),
        }
    }

    /// Per-field tick of the last accepted update.
    pub fn field_ticks(&self) -> [u64; 3] {
        [
            self.current.last_update_tick(),
            self.target.last_update_tick(),
            self.blend.last_update_tick(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: PeerId = PeerId(1);
    const OTHER: PeerId = PeerId(2);

    #[test]
    fn test_cell_rejects_foreign_writer() {
        let mut cell = ReplicatedCell::new(OWNER, 0.0f32);
        let result = cell.write(ReplicatedField::BlendFraction, OTHER, 0.5, 1);
        assert!(matches!(result, Err(ReplicationError::NotOwner { by, owner, .. }) if by == OTHER && owner == OWNER));
        assert_eq!(cell.get(), 0.0);

        assert_eq!(cell.write(ReplicatedField::BlendFraction, OWNER, 0.5, 1), Ok(true));
        assert_eq!(cell.get(), 0.5);
        assert_eq!(cell.last_update_tick(), 1);
    }

    #[test]
    fn test_cell_drops_stale_delivery() {
        let mut cell = ReplicatedCell::new(OWNER, EffectId(0));
        assert_eq!(cell.accept(ReplicatedField::CurrentEffect, OWNER, EffectId(3), 10, 4), Ok(true));
        assert_eq!(cell.accept(ReplicatedField::CurrentEffect, OWNER, EffectId(1), 7, 3), Ok(false));
        assert_eq!(cell.get(), EffectId(3));
        assert_eq!(cell.seq(), 4);
    }

    #[test]
    fn test_same_tick_writes_apply_in_write_order() {
        let mut owner = LocalReplica::new(OWNER, EffectId(1));
        let mut mirror = RemoteReplica::new(OWNER, EffectId(1));

        // Engaged and committed on the same tick
        owner.set_target(Some(EffectId(5)), 10);
        owner.set_blend(1.0, 10);
        owner.set_current(EffectId(5), 10);
        owner.set_target(None, 10);
        owner.set_blend(0.0, 10);
        let mut updates = owner.take_outbox();
        assert_eq!(updates.len(), 5);

        // Transport delivers them back to front
        updates.reverse();
        for update in &updates {
            mirror.apply(update).unwrap();
        }
        assert_eq!(mirror.snapshot(), owner.snapshot());
        assert_eq!(mirror.snapshot().target, None);
        assert_eq!(mirror.snapshot().blend, 0.0);
    }

    #[test]
    fn test_full_state_repairs_lost_update() {
        let mut owner = LocalReplica::new(OWNER, EffectId(1));
        let mut mirror = RemoteReplica::new(OWNER, EffectId(1));

        owner.set_blend(0.6, 3);
        for update in owner.take_outbox() {
            mirror.apply(&update).unwrap();
        }
        // This one is lost
        owner.set_blend(0.0, 4);
        owner.take_outbox();
        assert_eq!(mirror.snapshot().blend, 0.6);

        owner.queue_full_state(5);
        for update in owner.take_outbox() {
            mirror.apply(&update).unwrap();
        }
        assert_eq!(mirror.snapshot(), owner.snapshot());

        // A resend delivered twice changes nothing
        owner.queue_full_state(6);
        for update in owner.take_outbox() {
            assert_eq!(mirror.apply(&update), Ok(false));
        }
    }

    #[test]
    fn test_local_replica_queues_only_changes() {
        let mut replica = LocalReplica::new(OWNER, EffectId(2));
        replica.set_target(Some(EffectId(5)), 1);
        replica.set_target(Some(EffectId(5)), 2);
        replica.set_blend(0.1, 2);

        let outbox = replica.take_outbox();
        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox[0].value, FieldValue::TargetEffect(Some(EffectId(5))));
        assert_eq!(outbox[1].value, FieldValue::BlendFraction(0.1));
        assert!(outbox.iter().all(|u| u.writer == OWNER));
        assert!(replica.take_outbox().is_empty());
    }

    #[test]
    fn test_local_replica_clamps_blend() {
        let mut replica = LocalReplica::new(OWNER, EffectId(0));
        replica.set_blend(1.7, 1);
        assert_eq!(replica.blend(), 1.0);
        replica.set_blend(-0.3, 2);
        assert_eq!(replica.blend(), 0.0);
    }

    #[test]
    fn test_remote_fields_propagate_independently() {
        let mut owner = LocalReplica::new(OWNER, EffectId(2));
        let mut mirror = RemoteReplica::new(OWNER, EffectId(2));

        owner.set_target(Some(EffectId(5)), 1);
        owner.set_blend(0.4, 1);
        let updates = owner.take_outbox();

        // Only the target arrives so far
        mirror.apply(&updates[0]).unwrap();
        let seen = mirror.snapshot();
        assert_eq!(seen.target, Some(EffectId(5)));
        assert_eq!(seen.blend, 0.0);

        mirror.apply(&updates[1]).unwrap();
        assert_eq!(mirror.snapshot(), owner.snapshot());
        assert_eq!(mirror.field_ticks(), [0, 1, 1]);
    }

    #[test]
    fn test_remote_rejects_spoofed_update() {
        let mut mirror = RemoteReplica::new(OWNER, EffectId(0));
        let spoofed = FieldUpdate {
            writer: OTHER,
            tick: 5,
            seq: 1,
            value: FieldValue::CurrentEffect(EffectId(9)),
        };
        assert!(mirror.apply(&spoofed).is_err());
        assert_eq!(mirror.snapshot().current, EffectId(0));
    }

    #[test]
    fn test_weights() {
        let snapshot = ReplicaSnapshot {
            current: EffectId(1),
            target: Some(EffectId(4)),
            blend: 0.25,
        };
        let weights = snapshot.weights();
        assert_eq!(weights.weight_of(EffectId(1)), 0.75);
        assert_eq!(weights.weight_of(EffectId(4)), 0.25);
        assert_eq!(weights.weight_of(EffectId(2)), 0.0);

        // Stale blend without a target only weights the current effect
        let stale = ReplicaSnapshot {
            current: EffectId(1),
            target: None,
            blend: 0.5,
        };
        assert!(stale.weights().target.is_none());
        assert_eq!(stale.weights().weight_of(EffectId(1)), 0.5);
    }

    #[test]
    fn test_queue_full_state() {
        let mut replica = LocalReplica::new(OWNER, EffectId(3));
        replica.queue_full_state(9);
        let outbox = replica.take_outbox();
        assert_eq!(outbox.len(), 3);
        assert!(outbox.iter().all(|u| u.tick == 9 && u.seq == 0));
    }
}
