//! Loopback Network
//!
//! Runs several sessions in one process. Each peer has its own replication
//! bus, so every observer sees every other peer's fields with independent
//! delays. Poses come from a shared board that tests and demos script.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::config::HandshakeConfig;
use crate::core::clock::{TickClock, TickContext};
use crate::core::hash::{compute_state_hash, StateHash};
use crate::core::rng::derive_stream_seed;
use crate::handshake::directory::DirectoryEvent;
use crate::handshake::effects::EffectCatalog;
use crate::handshake::events::HandshakeEvent;
use crate::handshake::machine::{PoseSource, SetupError};
use crate::handshake::peer::{initial_effect, EffectId, GameMode, LocalPose, PeerId, PeerRole, PeerView};
use crate::handshake::replicated::{RemoteReplica, ReplicaSnapshot};
use crate::network::bus::{BusConfig, ReplicationBus};
use crate::network::session::{HandshakeSession, SessionError};

// =============================================================================
// POSE BOARD
// =============================================================================

/// Shared table of current poses, one per peer.
#[derive(Clone, Debug, Default)]
pub struct PoseBoard {
    poses: Arc<RwLock<BTreeMap<PeerId, LocalPose>>>,
}

impl PoseBoard {
    /// Empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a peer's pose.
    pub fn set(&self, id: PeerId, pose: LocalPose) {
        match self.poses.write() {
            Ok(mut poses) => {
                poses.insert(id, pose);
            }
            Err(_) => warn!("Pose board lock poisoned; dropping pose for {}", id),
        }
    }

    /// A peer's pose; untracked (all absent) when unknown.
    pub fn get(&self, id: PeerId) -> LocalPose {
        self.poses
            .read()
            .ok()
            .and_then(|poses| poses.get(&id).copied())
            .unwrap_or_default()
    }

    /// Pose source reading one peer's entry.
    pub fn source(&self, id: PeerId) -> BoardPose {
        BoardPose {
            board: self.clone(),
            id,
        }
    }
}

/// Pose source backed by a `PoseBoard` entry.
#[derive(Clone, Debug)]
pub struct BoardPose {
    board: PoseBoard,
    id: PeerId,
}

impl PoseSource for BoardPose {
    fn sample(&mut self, _ctx: &TickContext) -> LocalPose {
        self.board.get(self.id)
    }
}

// =============================================================================
// NETWORK
// =============================================================================

struct LoopbackPeer {
    role: PeerRole,
    session: HandshakeSession,
    bus: ReplicationBus,
    mirrors: BTreeMap<PeerId, RemoteReplica>,
}

/// Several peers wired together in-process.
pub struct LoopbackNetwork {
    config: HandshakeConfig,
    bus_config: BusConfig,
    effects: Vec<String>,
    board: PoseBoard,
    clock: TickClock,
    peers: BTreeMap<PeerId, LoopbackPeer>,
}

impl LoopbackNetwork {
    /// Create an empty network.
    pub fn new<I, S>(config: HandshakeConfig, bus_config: BusConfig, effects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let clock = TickClock::new(config.tick_rate);
        Self {
            config,
            bus_config,
            effects: effects.into_iter().map(Into::into).collect(),
            board: PoseBoard::new(),
            clock,
            peers: BTreeMap::new(),
        }
    }

    /// Connect a peer with an initial pose.
    pub fn add_peer(&mut self, id: PeerId, role: PeerRole, pose: LocalPose) -> Result<(), SetupError> {
        self.board.set(id, pose);
        let session = HandshakeSession::builder(id)
            .config(self.config.clone())
            .dispatcher(EffectCatalog::new(self.effects.iter().cloned()))
            .pose_source(self.board.source(id))
            .build()?;

        let bus = ReplicationBus::new(BusConfig {
            seed: derive_stream_seed(self.bus_config.seed, id.get()),
            ..self.bus_config.clone()
        });

        self.peers.insert(
            id,
            LoopbackPeer {
                role,
                session,
                bus,
                mirrors: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Disconnect a peer; others notice on their next roster poll.
    pub fn disconnect(&mut self, id: PeerId) -> bool {
        debug!("Disconnecting {}", id);
        self.peers.remove(&id).is_some()
    }

    /// Start every session in `mode`.
    pub async fn start_all(&mut self, mode: GameMode) -> Result<(), SessionError> {
        let ctx = self.clock.context();
        for peer in self.peers.values_mut() {
            let ready = || true;
            peer.session.start(mode, peer.role, &ready, &ctx).await?;
        }
        Ok(())
    }

    /// Advance one tick: deliver, tick every session, publish.
    pub fn step(&mut self) -> Vec<HandshakeEvent> {
        let ctx = self.clock.advance();
        let effect_count = self.effects.len();

        for peer in self.peers.values_mut() {
            for update in peer.bus.deliver_ready(ctx.tick) {
                let mirror = peer.mirrors.entry(update.writer).or_insert_with(|| {
                    let initial = initial_effect(update.writer, effect_count).unwrap_or_default();
                    RemoteReplica::new(update.writer, initial)
                });
                if let Err(e) = mirror.apply(&update) {
                    warn!("Rejected update: {}", e);
                }
            }
        }

        let rosters: BTreeMap<PeerId, Vec<PeerView>> = self
            .peers
            .keys()
            .map(|&observer| (observer, self.roster_for(observer)))
            .collect();

        let interval = self.bus_config.resync_interval_ticks;
        let resync = interval > 0 && ctx.tick % interval == 0;

        let mut events = Vec::new();
        let mut published = Vec::new();
        for (id, peer) in self.peers.iter_mut() {
            let roster = rosters.get(id).cloned().unwrap_or_default();
            if let Some(tick) = peer.session.tick(&roster, &ctx) {
                for event in &tick.roster {
                    if let DirectoryEvent::Left(gone) = event {
                        peer.mirrors.remove(gone);
                    }
                }
                events.extend(tick.outcome.events);
            }
            if resync {
                peer.session.queue_full_state(ctx.tick);
            }
            published.extend(peer.session.take_outbox());
        }

        for update in &published {
            for (id, peer) in self.peers.iter_mut() {
                if *id != update.writer {
                    peer.bus.publish(update, ctx.tick);
                }
            }
        }

        events.sort();
        events
    }

    /// Run `ticks` steps, collecting events.
    pub fn run(&mut self, ticks: u64) -> Vec<HandshakeEvent> {
        (0..ticks).flat_map(|_| self.step()).collect()
    }

    fn roster_for(&self, observer: PeerId) -> Vec<PeerView> {
        let Some(me) = self.peers.get(&observer) else {
            return Vec::new();
        };
        self.peers
            .iter()
            .filter(|(id, _)| **id != observer)
            .map(|(&id, peer)| {
                let state = me
                    .mirrors
                    .get(&id)
                    .map(|m| m.snapshot())
                    .unwrap_or_else(|| ReplicaSnapshot::initial(self.predicted_initial(id)));
                PeerView::new(id, peer.role, self.board.get(id), state)
            })
            .collect()
    }

    fn predicted_initial(&self, id: PeerId) -> EffectId {
        initial_effect(id, self.effects.len()).unwrap_or_default()
    }

    /// Shared pose board.
    pub fn board(&self) -> &PoseBoard {
        &self.board
    }

    /// Network clock.
    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    /// A peer's session.
    pub fn session(&self, id: PeerId) -> Option<&HandshakeSession> {
        self.peers.get(&id).map(|p| &p.session)
    }

    /// Mutable access to a peer's session.
    pub fn session_mut(&mut self, id: PeerId) -> Option<&mut HandshakeSession> {
        self.peers.get_mut(&id).map(|p| &mut p.session)
    }

    /// A peer's own replicated triple.
    pub fn snapshot(&self, id: PeerId) -> Option<ReplicaSnapshot> {
        self.session(id)?.machine().map(|m| m.snapshot())
    }

    /// What `observer` last received of `owner`'s triple.
    pub fn mirror_of(&self, observer: PeerId, owner: PeerId) -> Option<ReplicaSnapshot> {
        self.peers.get(&observer)?.mirrors.get(&owner).map(|m| m.snapshot())
    }

    /// Connected peer ids.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    /// Hash of every peer's owned and local-only handshake state.
    pub fn state_hash(&self) -> StateHash {
        compute_state_hash(self.clock.tick(), |h| {
            for (id, peer) in &self.peers {
                h.update_u64(id.get());
                let Some(machine) = peer.session.machine() else {
                    h.update_bool(false);
                    continue;
                };
                h.update_bool(true);
                let state = machine.snapshot();
                h.update_u32(state.current.0);
                h.update_i32(EffectId::to_wire(state.target));
                h.update_f32(state.blend);
                h.update_i32(EffectId::to_wire(machine.stacked()));
                h.update_u32(machine.progress());
                h.update_f64(machine.last_change());
            }
        })
    }
}
