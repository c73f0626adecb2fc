//! Handshake domain.
//!
//! Peers, replicated effect state, eligibility checks, the roster, effect
//! dispatch, and the per-peer state machine that ties them together.

pub mod peer;
pub mod replicated;
pub mod eligibility;
pub mod directory;
pub mod effects;
pub mod events;
pub mod machine;

pub use peer::{BodyPose, EffectId, GameMode, LocalPose, PeerId, PeerRole, PeerView, initial_effect};
pub use replicated::{
    BlendWeights, FieldUpdate, FieldValue, LocalReplica, RemoteReplica, ReplicaSnapshot,
    ReplicatedCell, ReplicatedField, ReplicationError,
};
pub use eligibility::{Candidate, facing, hand_visible, nearest_eligible, falloff_ceiling};
pub use directory::{DirectoryEvent, PeerDirectory, RosterSource};
pub use effects::{BlendFrame, EffectCatalog, EffectDispatcher, EffectSettings};
pub use events::{HandshakeEvent, HandshakeEventData};
pub use machine::{
    FixedPose, HandshakePhase, HandshakeStateMachine, PoseSource, SetupError, TickOutcome,
};
