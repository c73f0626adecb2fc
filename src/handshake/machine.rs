//! Handshake State Machine
//!
//! Per-peer tick logic. Each tick the machine picks the nearest eligible
//! peer, raises its blend towards that peer's effect (capped by distance),
//! counts engaged ticks, and swaps its own effect once the count exceeds the
//! threshold.
//!
//! Phases are not stored. They follow from the owned fields:
//!
//! ```text
//! Idle ──candidate in range──► Approaching ──hands touching──► Engaged
//!  ▲                               │   ▲                          │
//!  └──blend decayed to 0───────────┘   └──hands apart─────────────┤
//!  ▲                                                              │
//!  └──────────────── Commit (progress > threshold) ◄──────────────┘
//! ```
//!
//! Only the owning peer ticks its machine and only it writes its replicated
//! fields. Nothing here blocks; waits are tick counts.

use serde::{Serialize, Deserialize};
use tracing::{debug, info, trace};

use crate::config::{ConfigError, HandshakeConfig};
use crate::core::clock::TickContext;
use crate::core::vec3::Vec3;
use crate::handshake::directory::PeerDirectory;
use crate::handshake::effects::{BlendFrame, EffectDispatcher};
use crate::handshake::eligibility::{falloff_ceiling, nearest_eligible, Candidate};
use crate::handshake::events::HandshakeEvent;
use crate::handshake::peer::{
    initial_effect, BodyPose, EffectId, GameMode, LocalPose, PeerId, PeerRole, PeerView,
};
use crate::handshake::replicated::{FieldUpdate, LocalReplica, ReplicaSnapshot};

/// Errors raised while wiring up a machine or session.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// A required collaborator was not supplied.
    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// The dispatcher offers no effects to choose from.
    #[error("Effect dispatcher has no effects")]
    NoEffects,

    /// Configuration rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

// =============================================================================
// POSE SOURCE
// =============================================================================

/// Supplies the local body and hand pose each tick.
pub trait PoseSource {
    /// Pose for this tick.
    fn sample(&mut self, ctx: &TickContext) -> LocalPose;
}

impl<T: PoseSource + ?Sized> PoseSource for Box<T> {
    fn sample(&mut self, ctx: &TickContext) -> LocalPose {
        (**self).sample(ctx)
    }
}

/// A pose that never moves, e.g. for running without a tracker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FixedPose {
    /// Pose returned every tick
    pub pose: LocalPose,
}

impl FixedPose {
    /// Fixed pose.
    pub fn new(pose: LocalPose) -> Self {
        Self { pose }
    }

    /// Fixed pose from a body position, Euler rotation (degrees) and hand position.
    pub fn from_euler(position: Vec3, pitch: f32, yaw: f32, hand: Vec3) -> Self {
        Self::new(LocalPose::new(BodyPose::from_euler_deg(position, pitch, yaw), hand))
    }
}

impl PoseSource for FixedPose {
    fn sample(&mut self, _ctx: &TickContext) -> LocalPose {
        self.pose
    }
}

// =============================================================================
// TICK OUTCOME
// =============================================================================

/// Phase derived from the owned fields after a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HandshakePhase {
    /// No target
    #[default]
    Idle,
    /// Target set, hands not yet touching
    Approaching,
    /// Target set, hands within the touch distance
    Engaged,
    /// Effect swapped this tick
    Commit,
}

/// What happened during one tick.
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Whether the guard let the machine run
    pub ran: bool,
    /// Phase after the tick
    pub phase: HandshakePhase,
    /// Nearest eligible peer, if any
    pub candidate: Option<Candidate>,
    /// New current effect if a commit happened
    pub committed: Option<EffectId>,
    /// Events generated this tick
    pub events: Vec<HandshakeEvent>,
}

// =============================================================================
// STATE MACHINE
// =============================================================================

/// Handshake state machine for one local peer.
///
/// Collaborators are injected: the dispatcher receives effect starts and
/// per-tick blend frames, the pose source supplies the local pose, and the
/// roster arrives as a `PeerDirectory` on every tick.
pub struct HandshakeStateMachine<D, P> {
    id: PeerId,
    config: HandshakeConfig,
    replica: LocalReplica,
    stacked: Option<EffectId>,
    progress: u32,
    last_change: f64,
    mode: GameMode,
    role: PeerRole,
    local_pose: LocalPose,
    dispatcher: D,
    pose_source: P,
}

impl<D: EffectDispatcher, P: PoseSource> HandshakeStateMachine<D, P> {
    /// Create a machine. It stays inert until `start` assigns a game mode.
    pub fn new(id: PeerId, config: HandshakeConfig, dispatcher: D, pose_source: P) -> Result<Self, SetupError> {
        config.validate()?;
        let initial = initial_effect(id, dispatcher.effect_count()).ok_or(SetupError::NoEffects)?;

        Ok(Self {
            id,
            config,
            replica: LocalReplica::new(id, initial),
            stacked: None,
            progress: 0,
            last_change: f64::NEG_INFINITY,
            mode: GameMode::Undefined,
            role: PeerRole::default(),
            local_pose: LocalPose::default(),
            dispatcher,
            pose_source,
        })
    }

    /// Assign game mode and role, and initialize the effect.
    ///
    /// The current effect becomes `id mod effect_count` and the protection
    /// window starts now.
    pub fn start(&mut self, mode: GameMode, role: PeerRole, ctx: &TickContext) {
        self.mode = mode;
        self.role = role;
        self.stacked = None;
        self.progress = 0;
        self.replica.set_target(None, ctx.tick);
        self.replica.set_blend(0.0, ctx.tick);
        self.set_effect(self.initial_effect(), ctx);
        info!("{} started as {:?} in {:?} with {}", self.id, role, mode, self.replica.current());
    }

    /// Drop the game mode; the next tick abandons any handshake in progress.
    pub fn reset_assignment(&mut self) {
        self.mode = GameMode::Undefined;
    }

    /// Change role; a non-player role abandons any handshake on the next tick.
    pub fn set_role(&mut self, role: PeerRole) {
        self.role = role;
    }

    /// Return every field to its initial value and drop the assignment.
    pub fn reset_all(&mut self, tick: u64) {
        let initial = self.initial_effect();
        self.mode = GameMode::Undefined;
        self.role = PeerRole::default();
        self.stacked = None;
        self.progress = 0;
        self.last_change = f64::NEG_INFINITY;
        self.replica.reset(initial, tick);
        debug!("{} reset to {}", self.id, initial);
    }

    /// Run one tick.
    pub fn tick(&mut self, ctx: &TickContext, directory: &PeerDirectory) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        if self.mode == GameMode::Undefined {
            self.abort_if_active(ctx, &mut outcome);
            outcome.phase = self.phase(None);
            return outcome;
        }

        self.local_pose = self.pose_source.sample(ctx);

        if !self.role.runs_handshake() {
            self.abort_if_active(ctx, &mut outcome);
        } else if ctx.now - self.last_change > self.config.effect_change_protection_secs {
            outcome.ran = true;
            self.step(ctx, directory, &mut outcome);
        } else {
            trace!("{} inside protection window at tick {}", self.id, ctx.tick);
        }

        if outcome.committed.is_none() {
            outcome.phase = self.phase(outcome.candidate.as_ref());
        }

        self.dispatcher.present(&BlendFrame {
            state: self.replica.snapshot(),
            dt: ctx.dt,
        });

        #[cfg(feature = "debug-tracing")]
        trace!(
            "{} tick {} phase={:?} blend={:.3} progress={} stacked={:?}",
            self.id,
            ctx.tick,
            outcome.phase,
            self.replica.blend(),
            self.progress,
            self.stacked
        );

        outcome
    }

    fn step(&mut self, ctx: &TickContext, directory: &PeerDirectory, outcome: &mut TickOutcome) {
        let local = self.local_view();
        let nearest = nearest_eligible(&local, directory.peers(), &self.config);
        outcome.candidate = nearest;

        let cfg = &self.config;
        let step = cfg.blending_speed * ctx.dt;

        match nearest {
            Some(candidate) if candidate.distance < cfg.max_distance_threshold => {
                if self.replica.target().is_none() {
                    self.stacked = Some(candidate.effect);
                    debug!(
                        "{} acquired {} offering {} at {:.3}",
                        self.id, candidate.peer, candidate.effect, candidate.distance
                    );
                    outcome.events.push(HandshakeEvent::candidate_acquired(
                        ctx.tick,
                        self.id,
                        candidate.peer,
                        candidate.effect,
                        candidate.distance,
                    ));
                }
                // Tracks the live effect; the stacked value stays as captured
                self.replica.set_target(Some(candidate.effect), ctx.tick);

                let ceiling = falloff_ceiling(
                    candidate.distance,
                    cfg.min_distance_threshold,
                    cfg.max_distance_threshold,
                );
                let blend = (self.replica.blend() + step).min(ceiling).min(1.0);
                self.replica.set_blend(blend, ctx.tick);

                if candidate.distance < cfg.min_distance_threshold {
                    self.progress += 1;
                    if self.progress > cfg.handshake_frame_threshold {
                        self.commit(ctx, outcome);
                    }
                } else {
                    self.progress = self.progress.saturating_sub(1);
                }
            }
            _ => {
                let blend = self.replica.blend() - step;
                if blend <= 0.0 {
                    self.replica.set_blend(0.0, ctx.tick);
                    if self.replica.target().is_some() {
                        debug!("{} lost candidate, stacked {:?} dropped", self.id, self.stacked);
                        outcome.events.push(HandshakeEvent::candidate_lost(ctx.tick, self.id, self.stacked));
                    }
                    self.clear_target(ctx.tick);
                } else {
                    self.replica.set_blend(blend, ctx.tick);
                }
                self.progress = self.progress.saturating_sub(1);
            }
        }
    }

    /// Swap to the stacked effect.
    ///
    /// The stacked peer is not checked for liveness here; if it left after
    /// being captured, the swap still goes to its last known effect.
    fn commit(&mut self, ctx: &TickContext, outcome: &mut TickOutcome) {
        let from = self.replica.current();
        let Some(to) = self.stacked else {
            self.clear_target(ctx.tick);
            self.progress = 0;
            return;
        };

        self.set_effect(to, ctx);
        self.clear_target(ctx.tick);
        self.replica.set_blend(0.0, ctx.tick);
        self.progress = 0;

        info!("{} committed {} -> {} at tick {}", self.id, from, to, ctx.tick);
        outcome.committed = Some(to);
        outcome.phase = HandshakePhase::Commit;
        outcome.events.push(HandshakeEvent::committed(ctx.tick, self.id, from, to));
    }

    fn abort_if_active(&mut self, ctx: &TickContext, outcome: &mut TickOutcome) {
        let active = self.stacked.is_some()
            || self.progress > 0
            || self.replica.target().is_some()
            || self.replica.blend() > 0.0;
        if !active {
            return;
        }

        debug!("{} aborted handshake at progress {}", self.id, self.progress);
        outcome.events.push(HandshakeEvent::aborted(ctx.tick, self.id, self.progress));
        self.progress = 0;
        self.clear_target(ctx.tick);
        self.replica.set_blend(0.0, ctx.tick);
    }

    fn set_effect(&mut self, effect: EffectId, ctx: &TickContext) {
        self.last_change = ctx.now;
        self.replica.set_current(effect, ctx.tick);
        self.dispatcher.start(effect);
    }

    fn clear_target(&mut self, tick: u64) {
        self.stacked = None;
        self.replica.set_target(None, tick);
    }

    fn initial_effect(&self) -> EffectId {
        // Non-zero effect count is checked in `new`
        initial_effect(self.id, self.dispatcher.effect_count()).unwrap_or_default()
    }

    fn phase(&self, candidate: Option<&Candidate>) -> HandshakePhase {
        if self.replica.target().is_none() {
            return HandshakePhase::Idle;
        }
        match candidate {
            Some(c) if c.distance <= self.config.min_distance_threshold => HandshakePhase::Engaged,
            _ => HandshakePhase::Approaching,
        }
    }

    /// Local peer id.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Configuration in use.
    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    /// Assigned game mode.
    pub fn mode(&self) -> GameMode {
        self.mode
    }

    /// Assigned role.
    pub fn role(&self) -> PeerRole {
        self.role
    }

    /// Owned replicated triple.
    pub fn snapshot(&self) -> ReplicaSnapshot {
        self.replica.snapshot()
    }

    /// Effect captured when the current handshake began.
    pub fn stacked(&self) -> Option<EffectId> {
        self.stacked
    }

    /// Engaged tick counter.
    pub fn progress(&self) -> u32 {
        self.progress
    }

    /// Time of the last effect change, in clock seconds.
    pub fn last_change(&self) -> f64 {
        self.last_change
    }

    /// Pose sampled on the last tick.
    pub fn local_pose(&self) -> LocalPose {
        self.local_pose
    }

    /// The local peer as other peers would see it.
    pub fn local_view(&self) -> PeerView {
        PeerView::new(self.id, self.role, self.local_pose, self.replica.snapshot())
    }

    /// Effect dispatcher.
    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// Pending field updates for the transport.
    pub fn take_outbox(&mut self) -> Vec<FieldUpdate> {
        self.replica.take_outbox()
    }

    /// Queue the whole triple, e.g. after a peer joined.
    pub fn queue_full_state(&mut self, tick: u64) {
        self.replica.queue_full_state(tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::TickClock;
    use crate::handshake::effects::EffectCatalog;
    use crate::handshake::events::HandshakeEventData;
    use proptest::prelude::*;

    const LOCAL: PeerId = PeerId(2);
    const OTHER: PeerId = PeerId(7);
    const HAND_Z: f32 = 0.3;

    type TestMachine = HandshakeStateMachine<EffectCatalog, FixedPose>;

    fn catalog() -> EffectCatalog {
        EffectCatalog::new((0..8).map(|i| format!("effect {}", i)))
    }

    fn local_pose() -> FixedPose {
        FixedPose::new(LocalPose::new(
            BodyPose::new(Vec3::ZERO, Vec3::FORWARD),
            Vec3::new(0.0, 1.0, HAND_Z),
        ))
    }

    /// Facing peer whose hand is `distance` in front of the local hand.
    fn candidate(effect: u32, distance: f32) -> PeerView {
        PeerView::new(
            OTHER,
            PeerRole::Player,
            LocalPose::new(
                BodyPose::new(Vec3::new(0.0, 0.0, 1.0), Vec3::BACK),
                Vec3::new(0.0, 1.0, HAND_Z + distance),
            ),
            ReplicaSnapshot::initial(EffectId(effect)),
        )
    }

    fn roster(views: Vec<PeerView>) -> PeerDirectory {
        let mut directory = PeerDirectory::new();
        directory.poll(&views);
        directory
    }

    fn started(config: HandshakeConfig) -> (TestMachine, TickClock) {
        let clock = TickClock::new(config.tick_rate);
        let mut machine = HandshakeStateMachine::new(LOCAL, config, catalog(), local_pose()).unwrap();
        machine.start(GameMode::MultiplePlayer, PeerRole::Player, &clock.context());
        (machine, clock)
    }

    fn past_protection(config: HandshakeConfig) -> (TestMachine, TickClock) {
        let secs = config.effect_change_protection_secs;
        let (machine, mut clock) = started(config);
        clock.skip_seconds(secs);
        (machine, clock)
    }

    #[test]
    fn test_start_initializes_effect() {
        let (machine, _) = started(HandshakeConfig::default());
        let state = machine.snapshot();
        assert_eq!(state.current, EffectId(2));
        assert_eq!(state.target, None);
        assert_eq!(state.blend, 0.0);
        assert_eq!(machine.dispatcher().start_history(), &[EffectId(2)]);
    }

    #[test]
    fn test_new_requires_effects() {
        let result = HandshakeStateMachine::new(LOCAL, HandshakeConfig::default(), EffectCatalog::default(), local_pose());
        assert!(matches!(result, Err(SetupError::NoEffects)));
    }

    #[test]
    fn test_commit_after_sustained_contact() {
        let (mut machine, mut clock) = past_protection(HandshakeConfig::default());
        let directory = roster(vec![candidate(5, 0.1)]);

        for i in 1..=60 {
            let outcome = machine.tick(&clock.advance(), &directory);
            assert!(outcome.ran);
            assert_eq!(outcome.phase, HandshakePhase::Engaged);
            assert_eq!(machine.progress(), i);
            assert_eq!(machine.stacked(), Some(EffectId(5)));
        }
        assert_eq!(machine.snapshot().current, EffectId(2));

        let outcome = machine.tick(&clock.advance(), &directory);
        assert_eq!(outcome.committed, Some(EffectId(5)));
        assert_eq!(outcome.phase, HandshakePhase::Commit);

        let state = machine.snapshot();
        assert_eq!(state.current, EffectId(5));
        assert_eq!(state.target, None);
        assert_eq!(state.blend, 0.0);
        assert_eq!(machine.progress(), 0);
        assert_eq!(machine.stacked(), None);
        assert_eq!(machine.dispatcher().start_history(), &[EffectId(2), EffectId(5)]);
        assert!(outcome
            .events
            .iter()
            .any(|e| e.data == HandshakeEventData::Committed { from: EffectId(2), to: EffectId(5) }));
    }

    #[test]
    fn test_first_tick_acquires_candidate() {
        let (mut machine, mut clock) = past_protection(HandshakeConfig::default());
        let directory = roster(vec![candidate(5, 0.6)]);

        let outcome = machine.tick(&clock.advance(), &directory);
        assert_eq!(outcome.phase, HandshakePhase::Approaching);
        assert!(matches!(
            outcome.events.as_slice(),
            [e] if matches!(e.data, HandshakeEventData::CandidateAcquired { candidate: peer, .. } if peer == OTHER)
        ));
        assert_eq!(machine.snapshot().target, Some(EffectId(5)));

        // Already acquired; no second event
        let outcome = machine.tick(&clock.advance(), &directory);
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn test_blend_capped_by_distance() {
        let (mut machine, mut clock) = past_protection(HandshakeConfig::default());
        // Ceiling at 0.52 is 0.6
        let directory = roster(vec![candidate(5, 0.52)]);

        for _ in 0..120 {
            machine.tick(&clock.advance(), &directory);
        }
        assert!((machine.snapshot().blend - 0.6).abs() < 1e-3);
        assert_eq!(machine.progress(), 0);
    }

    #[test]
    fn test_out_of_range_candidate_ignored() {
        let (mut machine, mut clock) = past_protection(HandshakeConfig::default());
        let directory = roster(vec![candidate(5, 1.5)]);

        let outcome = machine.tick(&clock.advance(), &directory);
        assert!(outcome.candidate.is_some());
        assert_eq!(outcome.phase, HandshakePhase::Idle);
        assert_eq!(machine.snapshot().target, None);
    }

    #[test]
    fn test_vanished_candidate_decays_before_clearing() {
        let config = HandshakeConfig::default();
        let step = config.blending_speed * config.dt();
        let (mut machine, mut clock) = past_protection(config);

        let near = roster(vec![candidate(5, 0.52)]);
        for _ in 0..60 {
            machine.tick(&clock.advance(), &near);
        }
        assert!((machine.snapshot().blend - 0.6).abs() < 1e-3);

        let empty = roster(Vec::new());
        let mut previous = machine.snapshot().blend;
        let mut cleared = false;
        for _ in 0..40 {
            let outcome = machine.tick(&clock.advance(), &empty);
            let state = machine.snapshot();
            if state.blend > 0.0 {
                assert!((previous - state.blend - step).abs() < 1e-4);
                assert_eq!(state.target, Some(EffectId(5)));
                assert_eq!(machine.stacked(), Some(EffectId(5)));
            } else if !cleared {
                cleared = true;
                assert_eq!(state.target, None);
                assert_eq!(machine.stacked(), None);
                assert!(outcome
                    .events
                    .iter()
                    .any(|e| matches!(e.data, HandshakeEventData::CandidateLost { .. })));
            }
            previous = state.blend;
        }
        assert!(cleared);
        assert_eq!(machine.snapshot().current, EffectId(2));
    }

    #[test]
    fn test_progress_decays_when_hands_apart() {
        let (mut machine, mut clock) = past_protection(HandshakeConfig::default());
        let close = roster(vec![candidate(5, 0.1)]);
        let apart = roster(vec![candidate(5, 0.5)]);

        for _ in 0..10 {
            machine.tick(&clock.advance(), &close);
        }
        assert_eq!(machine.progress(), 10);

        for _ in 0..4 {
            machine.tick(&clock.advance(), &apart);
        }
        assert_eq!(machine.progress(), 6);

        for _ in 0..20 {
            machine.tick(&clock.advance(), &apart);
        }
        assert_eq!(machine.progress(), 0);
    }

    #[test]
    fn test_protection_window_after_commit() {
        let config = HandshakeConfig::default();
        let window = config.effect_change_protection_secs;
        let (mut machine, mut clock) = past_protection(config);
        let directory = roster(vec![candidate(3, 0.1)]);

        let mut committed = false;
        for _ in 0..61 {
            committed |= machine.tick(&clock.advance(), &directory).committed.is_some();
        }
        assert!(committed);

        let window_ticks = clock.ticks_for(window);
        for _ in 0..window_ticks - 1 {
            let outcome = machine.tick(&clock.advance(), &directory);
            assert!(!outcome.ran);
            assert_eq!(machine.snapshot().target, None);
            assert_eq!(machine.snapshot().blend, 0.0);
        }

        machine.tick(&clock.advance(), &directory);
        let outcome = machine.tick(&clock.advance(), &directory);
        assert!(outcome.ran);
        assert_eq!(machine.snapshot().target, Some(EffectId(3)));
    }

    #[test]
    fn test_stacked_target_survives_candidate_change() {
        let (mut machine, mut clock) = past_protection(HandshakeConfig::default());
        let first = roster(vec![candidate(5, 0.1)]);
        for _ in 0..30 {
            machine.tick(&clock.advance(), &first);
        }

        // Candidate switches effect mid-handshake
        let switched = roster(vec![candidate(6, 0.1)]);
        let mut committed = None;
        for _ in 0..31 {
            let outcome = machine.tick(&clock.advance(), &switched);
            if outcome.committed.is_some() {
                committed = outcome.committed;
            }
            if committed.is_none() {
                assert_eq!(machine.snapshot().target, Some(EffectId(6)));
            }
        }
        assert_eq!(committed, Some(EffectId(5)));
    }

    #[test]
    fn test_spectator_never_runs() {
        let config = HandshakeConfig::default();
        let mut clock = TickClock::new(config.tick_rate);
        let mut machine = HandshakeStateMachine::new(LOCAL, config, catalog(), local_pose()).unwrap();
        machine.start(GameMode::MultiplePlayer, PeerRole::Spectator, &clock.context());
        clock.skip_seconds(10.0);

        let directory = roster(vec![candidate(5, 0.1)]);
        for _ in 0..100 {
            let outcome = machine.tick(&clock.advance(), &directory);
            assert!(!outcome.ran);
            assert!(outcome.events.is_empty());
        }
        assert_eq!(machine.snapshot().target, None);
    }

    #[test]
    fn test_unstarted_machine_is_inert() {
        let mut machine = HandshakeStateMachine::new(LOCAL, HandshakeConfig::default(), catalog(), local_pose()).unwrap();
        let mut clock = TickClock::new(60);
        clock.skip_seconds(10.0);
        let outcome = machine.tick(&clock.advance(), &roster(vec![candidate(5, 0.1)]));
        assert!(!outcome.ran);
        assert!(machine.dispatcher().start_history().is_empty());
    }

    #[test]
    fn test_reset_aborts_in_progress_handshake() {
        let (mut machine, mut clock) = past_protection(HandshakeConfig::default());
        let directory = roster(vec![candidate(5, 0.1)]);
        for _ in 0..20 {
            machine.tick(&clock.advance(), &directory);
        }
        assert_eq!(machine.progress(), 20);

        machine.reset_assignment();
        let outcome = machine.tick(&clock.advance(), &directory);
        assert!(!outcome.ran);
        assert!(matches!(
            outcome.events.as_slice(),
            [e] if e.data == HandshakeEventData::Aborted { progress: 20 }
        ));
        assert_eq!(machine.progress(), 0);
        assert_eq!(machine.stacked(), None);
        assert_eq!(machine.snapshot().target, None);
        assert_eq!(machine.snapshot().blend, 0.0);

        // Nothing left to abort
        assert!(machine.tick(&clock.advance(), &directory).events.is_empty());
    }

    #[test]
    fn test_role_change_aborts() {
        let (mut machine, mut clock) = past_protection(HandshakeConfig::default());
        let directory = roster(vec![candidate(5, 0.1)]);
        for _ in 0..5 {
            machine.tick(&clock.advance(), &directory);
        }
        machine.set_role(PeerRole::Spectator);
        let outcome = machine.tick(&clock.advance(), &directory);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(machine.stacked(), None);
    }

    #[test]
    fn test_reset_all_restores_initial_values() {
        let (mut machine, mut clock) = past_protection(HandshakeConfig::default());
        let directory = roster(vec![candidate(5, 0.1)]);
        for _ in 0..61 {
            machine.tick(&clock.advance(), &directory);
        }
        assert_eq!(machine.snapshot().current, EffectId(5));

        machine.reset_all(clock.tick());
        assert_eq!(machine.snapshot(), ReplicaSnapshot::initial(EffectId(2)));
        assert_eq!(machine.mode(), GameMode::Undefined);
        assert_eq!(machine.progress(), 0);
    }

    #[test]
    fn test_outbox_carries_owner_writes() {
        let (mut machine, mut clock) = past_protection(HandshakeConfig::default());
        machine.take_outbox();

        machine.tick(&clock.advance(), &roster(vec![candidate(5, 0.5)]));
        let updates = machine.take_outbox();
        assert_eq!(updates.len(), 2);
        assert!(updates.iter().all(|u| u.writer == LOCAL));
    }

    proptest! {
        #[test]
        fn prop_blend_and_progress_stay_in_bounds(
            distances in prop::collection::vec(prop::option::of(0.0f32..1.5), 1..300)
        ) {
            let config = HandshakeConfig {
                effect_change_protection_secs: 0.0,
                ..Default::default()
            };
            let (mut machine, mut clock) = started(config);

            for distance in distances {
                let directory = match distance {
                    Some(d) => roster(vec![candidate(5, d)]),
                    None => roster(Vec::new()),
                };
                let before = machine.progress();
                let outcome = machine.tick(&clock.advance(), &directory);
                let state = machine.snapshot();

                prop_assert!((0.0..=1.0).contains(&state.blend));
                prop_assert_eq!(state.target.is_none(), machine.stacked().is_none());
                prop_assert!(machine.progress() <= before + 1);
                if outcome.committed.is_some() {
                    prop_assert_eq!(before, 60);
                }
            }
        }
    }
}
