//! Network Layer
//!
//! Wire format, best-effort delivery, and session plumbing around the
//! handshake. Transport and address discovery stay outside this crate;
//! the loopback network stands in for them in tests and the demo.

pub mod protocol;
pub mod bus;
pub mod session;
pub mod loopback;

pub use protocol::{FieldMessage, ProtocolError, WireField, decode_update, encode_update};
pub use bus::{BusConfig, BusStats, ReplicationBus};
pub use session::{
    HandshakeFeature, HandshakeSession, ReadinessError, ReadinessProbe, SessionBuilder,
    SessionError, SessionId, SessionState, SessionTick, wait_until_ready,
};
pub use loopback::{BoardPose, LoopbackNetwork, PoseBoard};
